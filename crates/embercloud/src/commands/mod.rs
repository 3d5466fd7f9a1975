//! Command dispatch: bridges CLI args -> core calls -> output formatting.

pub mod config_cmd;
pub mod devices;
pub mod send;
pub mod util;
pub mod watch;

use embercloud_core::Controller;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch an account-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    controller: &Controller,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Devices => devices::handle(controller, global).await,
        Command::Watch(args) => watch::handle(controller, args, global).await,
        Command::Raw(args) => send::raw(controller, args, global).await,
        cmd @ (Command::SetTemp(_)
        | Command::SetProbeTemp(_)
        | Command::SetTimer(_)
        | Command::ResetTimer(_)
        | Command::ShutdownGrill(_)
        | Command::Refresh(_)) => send::typed(controller, cmd, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Err(CliError::Validation {
            field: "command".into(),
            reason: "handled without an account".into(),
        }),
    }
}
