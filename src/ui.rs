use std::cell::RefCell;

use anyhow::Result;
use colored::Colorize;

use tree::{NodeId, Tree};
use util::Timer;

use crate::driver::{DriverState, Outcome, PassReport};
use crate::postprocess::Summary;

/// All interactions with the text UI should go through this struct.
pub struct Ui {
    /// -v setting, displays extra text info to user
    pub verbose: bool,
    /// -y setting, ignores all points where the user is prompted to enter 'y'
    override_confirmation: bool,
    /// keeps track of time for each phase
    timer: Timer,
    /// buffer to hold strings internally when getting input
    strbuf: RefCell<String>,
}

impl Ui {
    pub fn new(verbose: bool, yes: bool) -> Self {
        Self {
            verbose,
            override_confirmation: yes,
            timer: Timer::now(),
            // Refcell so we can call confirm() w/o needing a unique reference:
            strbuf: RefCell::new(String::with_capacity(16)),
        }
    }

    pub fn confirm(&self, prompt: &str) -> Result<bool> {
        if self.override_confirmation {
            return Ok(true);
        }
        eprintln!("{} (y/N)", prompt);

        let mut strbuf = self.strbuf.borrow_mut();

        strbuf.clear();
        std::io::stdin().read_line(&mut strbuf)?;
        match strbuf.chars().next() {
            Some('y') => Ok(true),
            _ => Ok(false),
        }
    }

    pub fn start_timer(&mut self) {
        if self.verbose {
            self.timer.reset();
        }
    }

    pub fn print_elapsed(&mut self, phase: &str) -> Result<(), std::time::SystemTimeError> {
        if self.verbose {
            self.timer.print_elapsed(phase)
        } else {
            Ok(())
        }
    }

    pub fn verbose_progress(&self, msg: &str) {
        if self.verbose {
            eprint!("{}... ", msg.magenta());
        }
    }

    pub fn verbose_progress_debug<T: std::fmt::Debug>(&self, msg: &str, arg: T) {
        if self.verbose {
            eprint!("{} {:?}... ", msg.magenta(), arg);
        }
    }

    pub fn done(&self) {
        if self.verbose {
            eprintln!("{}.", "done".green());
        }
    }

    /// One line per node of the pass, then a tally.
    pub fn print_pass(&self, tree: &Tree, report: &PassReport) {
        let g = match report.state {
            DriverState::AllCompleted => {
                if report.root_tagged {
                    eprintln!("{} {}", "COMPLETED".green(), tree.root_dir().display());
                }
                eprintln!("{}", "All descendants of root are completed.".green());
                return;
            }
            DriverState::Pending(g) => g,
        };

        eprintln!("\n{} {g}:", "Generation".magenta());
        for (id, outcome) in &report.lines {
            let path = tree.abs_path(*id);
            match outcome {
                Outcome::Completed => eprintln!("{} {}", "COMPLETED".green(), path.display()),
                Outcome::Running => eprintln!("{} {}", "RUNNING".cyan(), path.display()),
                Outcome::Queuing => eprintln!("{} {}", "QUEUING".yellow(), path.display()),
                Outcome::Submitted(job) => {
                    eprintln!("{} {} (job {job})", "SUBMIT".magenta(), path.display())
                }
                Outcome::WouldSubmit => {
                    eprintln!("{} {} (dry run)", "SUBMIT".magenta(), path.display())
                }
                Outcome::Failed => eprintln!("{} {}", "FAILED".red(), path.display()),
            }
        }
        eprintln!(
            "\n{} completed, {} running, {} queuing, {} submitted, {} failed.",
            report.count(|o| *o == Outcome::Completed),
            report.count(|o| *o == Outcome::Running),
            report.count(|o| *o == Outcome::Queuing),
            report.submitted(),
            report.count(|o| *o == Outcome::Failed),
        );
    }

    pub fn print_status(&self, tree: &Tree, lines: &[(NodeId, status::Tags)]) {
        for (id, tags) in lines {
            let label = if tags.contains_key(status::COMPLETED) {
                "COMPLETED".green()
            } else if tags.contains_key(status::STARTED) {
                "STARTED".cyan()
            } else {
                "PENDING".yellow()
            };
            eprintln!("{label} {}", tree.node(*id).path.display());
            if self.verbose {
                for (tag, time) in tags {
                    eprintln!("    {tag}: {time}");
                }
            }
        }
    }

    pub fn print_summary(&self, summary: &Summary) {
        eprintln!(
            "Collected {} nodes of generation {}.",
            summary.rows.len(),
            summary.generation
        );
        if !summary.problematic.is_empty() {
            eprintln!(
                "\nThe following nodes are {}:",
                "missing declared outputs".red()
            );
            for path in &summary.problematic {
                eprintln!("{} {}", "PROBLEM".red(), path.display());
            }
        }
    }
}
