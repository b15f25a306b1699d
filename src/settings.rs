use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::args::{Args, Command, TreeArgs};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Study config {0:?} does not exist")]
    ConfigNotFound(PathBuf),
    #[error("Tree snapshot {0:?} does not exist")]
    TreeNotFound(PathBuf),
    #[error("Invalid config path has no parent (should not happen)")]
    ConfigHasNoParent,
    #[error("Need at least one cloning worker")]
    NoWorkers,
    #[error("Relocation target {0:?} is not a directory")]
    RelocateNotDir(PathBuf),
}

/// Where to find an existing study.
#[derive(Debug, Clone)]
pub struct TreeLocation {
    /// canonicalized tree snapshot
    pub snapshot: PathBuf,
    /// new root directory, if the study was moved
    pub relocate: Option<PathBuf>,
}

/// What the user asked for.
#[derive(Debug, Clone)]
pub enum Action {
    Materialize {
        config: PathBuf,
        force: bool,
        workers: usize,
    },
    Drive(TreeLocation),
    Postprocess {
        location: TreeLocation,
        generation: Option<usize>,
        force: bool,
    },
    Status {
        location: TreeLocation,
        pending: bool,
    },
    Tag {
        marker: PathBuf,
        tag: String,
    },
}

/// Settings are like Args, except all the logic has
/// been applied so e.g. paths are checked and resolved.
#[derive(Debug)]
pub struct Settings {
    pub action: Action,
    pub output: PathBuf,
    pub yes: bool,
    pub verbose: u8,
    pub dry_run: bool,
}

impl Settings {
    /// Get the dir that relative template paths in the study config are resolved against.
    pub fn config_parent_dir(config: &Path) -> Result<&Path, Error> {
        config.parent().ok_or(Error::ConfigHasNoParent)
    }
}

impl TryFrom<Args> for Settings {
    type Error = anyhow::Error;
    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let action = match args.command {
            Command::Materialize {
                config,
                force,
                jobs,
            } => {
                let config = PathBuf::from(config);
                if !config.is_file() {
                    return Err(Error::ConfigNotFound(config).into());
                }
                if jobs == 0 {
                    return Err(Error::NoWorkers.into());
                }
                Action::Materialize {
                    config: config.canonicalize()?,
                    force,
                    workers: jobs,
                }
            }
            Command::Drive { tree } => Action::Drive(tree.try_into()?),
            Command::Postprocess {
                tree,
                generation,
                force,
            } => Action::Postprocess {
                location: tree.try_into()?,
                generation,
                force,
            },
            Command::Status { tree, pending } => Action::Status {
                location: tree.try_into()?,
                pending,
            },
            Command::Tag { marker, tag } => Action::Tag {
                marker: PathBuf::from(marker),
                tag,
            },
        };

        Ok(Self {
            action,
            output: PathBuf::from(&args.output),
            yes: args.yes,
            verbose: args.verbose,
            dry_run: args.dry_run,
        })
    }
}

impl TryFrom<TreeArgs> for TreeLocation {
    type Error = anyhow::Error;
    fn try_from(args: TreeArgs) -> Result<Self, Self::Error> {
        let snapshot = PathBuf::from(args.tree);
        if !snapshot.is_file() {
            return Err(Error::TreeNotFound(snapshot).into());
        }
        // node dirs are compared against absolute scheduler paths:
        let relocate = match args.relocate.map(PathBuf::from) {
            Some(dir) if !dir.is_dir() => return Err(Error::RelocateNotDir(dir).into()),
            Some(dir) => Some(dir.canonicalize()?),
            None => None,
        };
        Ok(Self {
            snapshot: snapshot.canonicalize()?,
            relocate,
        })
    }
}
