use clap::{Parser, Subcommand};

const CMD_NAME: &str = "st";
const DEFAULT_CONFIG: &str = "study.yaml";
const DEFAULT_OUTPUT: &str = "scans";
const DEFAULT_WORKERS: usize = 8;

/// Stores our command-line args format.
#[derive(Parser)]
#[command(name = CMD_NAME, version, about = None, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Output directory holding study directories
    #[arg(short, long, value_name = "DIR", default_value = DEFAULT_OUTPUT, global = true)]
    #[arg(env = "SCAN_TREE_OUTPUT")]
    pub output: String,

    /// Bypass user confirmation
    #[arg(short, long, global = true)]
    pub yes: bool,

    /// Print additional info; repeat for more
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Dry run; print info but don't modify anything.
    #[arg(short = 'n', long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build the job tree from a study config and create every node directory
    Materialize {
        /// Study config file
        #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG)]
        #[arg(env = "SCAN_TREE_CONFIG")]
        config: String,

        /// Delete existing status markers and node directories first
        #[arg(short, long)]
        force: bool,

        /// Number of concurrent cloning workers
        #[arg(short = 'j', long, value_name = "N", default_value_t = DEFAULT_WORKERS)]
        jobs: usize,
    },
    /// Run one reconciliation and submission pass
    Drive {
        #[command(flatten)]
        tree: TreeArgs,
    },
    /// Collect parameters, tags and outputs of one generation
    Postprocess {
        #[command(flatten)]
        tree: TreeArgs,

        /// Generation to collect (default: the deepest)
        #[arg(short, long, value_name = "N")]
        generation: Option<usize>,

        /// Collect even if not every job is completed
        #[arg(short, long)]
        force: bool,
    },
    /// List every node with its status tags
    Status {
        #[command(flatten)]
        tree: TreeArgs,

        /// Only list nodes that haven't been completed
        #[arg(short, long)]
        pending: bool,
    },
    /// Apply a tag to a status marker, e.g. from a job's shell script
    Tag {
        /// Status marker file
        marker: String,
        /// Tag to apply, e.g. "started" or "completed"
        tag: String,
    },
}

/// Locating an existing study.
#[derive(clap::Args)]
pub struct TreeArgs {
    /// Tree snapshot written by `materialize`
    #[arg(short, long, value_name = "FILE")]
    #[arg(env = "SCAN_TREE_TREE")]
    pub tree: String,

    /// Current study directory, if it was moved after materializing
    #[arg(short, long, value_name = "DIR")]
    pub relocate: Option<String>,
}
