//! Command handlers: typed helpers and raw codes.

use embercloud_core::{Command as GrillCommand, Controller};

use crate::cli::{Command, GlobalOpts, RawCommandArgs};
use crate::error::CliError;

use super::util;

/// Map a typed CLI subcommand onto its grill command.
fn grill_command(cmd: Command) -> Result<(String, GrillCommand), CliError> {
    let mapped = match cmd {
        Command::SetTemp(a) => (a.device, GrillCommand::SetTemperature(a.temperature)),
        Command::SetProbeTemp(a) => (a.device, GrillCommand::SetProbeTemperature(a.temperature)),
        Command::SetTimer(a) => (a.device, GrillCommand::SetTimer(a.seconds)),
        Command::ResetTimer(a) => (a.device, GrillCommand::ResetTimer),
        Command::ShutdownGrill(a) => (a.device, GrillCommand::Shutdown),
        Command::Refresh(a) => (a.device, GrillCommand::RefreshStatus),
        other => {
            return Err(CliError::Validation {
                field: "command".into(),
                reason: format!("{other:?} is not a grill command"),
            });
        }
    };
    Ok(mapped)
}

pub async fn typed(
    controller: &Controller,
    cmd: Command,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let (identifier, command) = grill_command(cmd)?;
    let device = util::resolve_device(controller, &identifier).await?;

    controller.send_command(&device, command.clone()).await?;
    if !global.quiet {
        eprintln!("✓ Sent {command} to {device}");
    }
    Ok(())
}

pub async fn raw(
    controller: &Controller,
    args: RawCommandArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    if args.code.is_empty() || args.code.contains(',') {
        return Err(CliError::Validation {
            field: "code".into(),
            reason: "expected a bare command code such as 11".into(),
        });
    }
    let device = util::resolve_device(controller, &args.device).await?;

    controller
        .send_raw_command(&device, &args.code, &args.args)
        .await?;
    if !global.quiet {
        eprintln!("✓ Sent command {} to {device}", args.code);
    }
    Ok(())
}
