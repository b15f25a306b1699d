use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;

use tree::Tree;

use crate::backend::{Shell, SystemShell};
use crate::driver::ScanDriver;
use crate::fs::Fs;
use crate::materialize::Materializer;
use crate::settings::{Action, Settings, TreeLocation};
use crate::study::StudyConfig;
use crate::ui::Ui;
use crate::{inspect, postprocess};

/// This struct actually runs the command-line app.
pub struct App {
    /// Interpreted command line settings
    settings: Settings,
    /// User interface
    ui: Ui,
    /// How scheduler commands are run
    shell: Arc<dyn Shell>,
}

impl App {
    /// Create a new `App` that runs scheduler commands as real subprocesses.
    pub fn new(settings: Settings) -> Self {
        Self::with_shell(settings, Arc::new(SystemShell::default()))
    }

    /// Create a new `App` with a custom way of running scheduler commands.
    pub fn with_shell(settings: Settings, shell: Arc<dyn Shell>) -> Self {
        let ui = Ui::new(settings.verbose > 0, settings.yes);
        Self {
            settings,
            ui,
            shell,
        }
    }

    /// Run the app, using settings to determine which action to take.
    pub fn run(mut self) -> Result<()> {
        match self.settings.action.clone() {
            Action::Materialize {
                config,
                force,
                workers,
            } => self.materialize(&config, force, workers),
            Action::Drive(location) => self.drive(&location),
            Action::Postprocess {
                location,
                generation,
                force,
            } => self.postprocess(&location, generation, force),
            Action::Status { location, pending } => self.status(&location, pending),
            Action::Tag { marker, tag } => self.tag(&marker, &tag),
        }
    }

    fn materialize(&mut self, config_path: &Path, force: bool, workers: usize) -> Result<()> {
        self.ui.start_timer();
        self.ui.verbose_progress("Reading study config");
        let config = StudyConfig::load(config_path)?;
        self.ui.done();

        let mut fs = Fs::new(&self.settings.output.join(&config.name), self.settings.dry_run);
        if self.settings.verbose > 0 {
            eprintln!("Using study directory {:?}", fs.study_dir());
        }
        fs.ensure_study_dir_exists(self.settings.verbose > 0)?;

        let config_dir = Settings::config_parent_dir(config_path)?;
        let tree = config.into_tree(fs.study_dir(), config_dir)?;
        self.ui.print_elapsed("Building tree")?;
        if self.settings.verbose > 0 {
            eprintln!(
                "Tree has {} nodes over {} generations.",
                tree.len(),
                tree.height()
            );
        }

        let materializer = Materializer::new(&fs, &tree, workers, self.settings.verbose > 0)?;
        if self.settings.dry_run {
            return materializer.print_plan();
        }

        if force {
            let prompt = format!(
                "Delete all status markers and node directories in {:?}?",
                fs.study_dir()
            );
            if !self.ui.confirm(&prompt)? {
                eprintln!("Not materializing.");
                return Ok(());
            }
            self.reset(&fs, &tree, workers)?;
        }

        let text = tree.to_json_string().context("serializing tree")?;
        fs.write_file(fs.tree_json(), &text)?;

        self.ui.start_timer();
        materializer.materialize()?;
        self.ui.print_elapsed("Cloning")?;

        eprintln!(
            "{} {} nodes in {}",
            "Materialized".green(),
            tree.len() - 1,
            fs.study_dir().display()
        );
        Ok(())
    }

    /// Wipe the study as described by its previous snapshot, falling back to `tree`.
    fn reset(&self, fs: &Fs, tree: &Tree, workers: usize) -> Result<()> {
        let previous = if fs.exists(fs.tree_json()) {
            let mut previous = Tree::from_json(fs.tree_json())?;
            previous.relocate(fs.study_dir());
            Some(previous)
        } else {
            None
        };
        let target = previous.as_ref().unwrap_or(tree);
        let cleaned = target.clean_log()?;
        log::info!("deleted {cleaned} status markers");
        Materializer::new(fs, target, workers, false)?.rm_children_folders()?;
        Ok(())
    }

    fn drive(&mut self, location: &TreeLocation) -> Result<()> {
        let tree = self.load_tree(location)?;
        let fs = Fs::new(tree.root_dir(), self.settings.dry_run);

        self.ui.start_timer();
        let driver = ScanDriver::new(&fs, &tree, self.shell.clone(), self.settings.dry_run);
        let report = driver.pass()?;
        self.ui.print_pass(&tree, &report);
        self.ui.print_elapsed("Pass")?;
        Ok(())
    }

    fn postprocess(
        &mut self,
        location: &TreeLocation,
        generation: Option<usize>,
        force: bool,
    ) -> Result<()> {
        let tree = self.load_tree(location)?;
        let Some(summary) = postprocess::summarize(&tree, generation, force)? else {
            eprintln!("Complete first all jobs");
            return Ok(());
        };
        self.ui.print_summary(&summary);
        if self.settings.dry_run {
            return Ok(());
        }
        let fs = Fs::new(tree.root_dir(), false);
        let path = postprocess::write(&fs, &summary)?;
        eprintln!("{} {}", "Wrote".green(), path.display());
        Ok(())
    }

    fn status(&mut self, location: &TreeLocation, pending: bool) -> Result<()> {
        let tree = self.load_tree(location)?;
        let lines = inspect::node_status(&tree, pending)?;
        self.ui.print_status(&tree, &lines);
        Ok(())
    }

    fn tag(&mut self, marker: &Path, tag: &str) -> Result<()> {
        if self.settings.dry_run {
            eprintln!("Dry run. Not tagging {marker:?} as {tag}");
            return Ok(());
        }
        status::tag_it(marker, tag)?;
        Ok(())
    }

    fn load_tree(&mut self, location: &TreeLocation) -> Result<Tree> {
        self.ui.verbose_progress_debug("Loading tree", &location.snapshot);
        let mut tree = Tree::from_json(&location.snapshot)?;
        self.ui.done();
        if let Some(dir) = &location.relocate {
            tree.relocate(dir);
        }
        Ok(tree)
    }
}
