use crate::cli::{actions::Action, commands, dispatch::handler, telemetry};
use anyhow::Result;
use tracing::Level;

/// Parse the command line, initialise logging and resolve the action to run.
///
/// # Errors
/// Returns an error if telemetry cannot be initialised or the arguments are
/// inconsistent.
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();

    let verbosity_level = match matches.get_one::<u8>("verbosity").copied().unwrap_or(0) {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };

    telemetry::init(Some(verbosity_level))?;

    handler(&matches)
}
