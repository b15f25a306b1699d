/// High-level command line app
mod app;
/// Definition of command-line args
mod args;
/// Scheduler backends and reconciliation with their live state
pub mod backend;
/// One pass of generation-gated submission
pub mod driver;
/// Filesystem operations
pub mod fs;
/// Listing node status
mod inspect;
/// Cloning templates into node directories
pub mod materialize;
/// Collecting results once a study is done
pub mod postprocess;
/// Combined command-line and config file run settings
mod settings;
/// Study config and tree expansion
pub mod study;
/// Text UI
mod ui;

// exported for tests:
pub use app::App;
pub use args::{Args, Command, TreeArgs};
pub use settings::{Action, Settings, TreeLocation};

/// Run the command-line app.
pub fn run() -> Result<(), anyhow::Error> {
    use clap::Parser;
    let args = Args::parse();

    // INTERPRET SETTINGS ///////////////
    let settings: Settings = args.try_into()?;

    let log_level = match settings.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    simple_logging::log_to_stderr(log_level);

    // RUN THE THING /////////////////
    let app = App::new(settings);
    app.run()?;

    Ok(())
}
