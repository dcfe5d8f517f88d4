//! Command dispatch: bridges CLI args -> core operations -> output formatting.

pub mod battery;
pub mod discover;
pub mod pair;
pub mod util;
pub mod watch;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a device-bound command to its handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Pair(args) => pair::handle(args, global).await,
        Command::PairOne(args) => pair::handle_one(args, global).await,
        Command::Discover(args) => discover::handle(args, global).await,
        Command::Watch(args) => watch::handle(args, global).await,
        Command::Battery(args) => battery::handle(args, global).await,
        // Completions are handled before dispatch
        Command::Completions(_) => Ok(()),
    }
}
