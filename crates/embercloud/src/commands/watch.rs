//! Live status stream.
//!
//! Registers a listener per grill, starts the connection core, and prints
//! every status change until Ctrl-C or until the core stops on its own.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::debug;

use embercloud_core::Controller;

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::util;

/// How often the loop checks that the core is still running.
const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

pub async fn handle(
    controller: &Controller,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let devices = if args.devices.is_empty() {
        controller.load_directory().await?;
        controller.device_ids()
    } else {
        let mut resolved = Vec::with_capacity(args.devices.len());
        for identifier in &args.devices {
            resolved.push(util::resolve_device(controller, identifier).await?);
        }
        resolved
    };

    let (updates_tx, mut updates) = mpsc::unbounded_channel::<String>();
    for device in &devices {
        let tx = updates_tx.clone();
        let id = device.clone();
        controller.register_listener(device, move || {
            let _ = tx.send(id.clone());
        });
    }
    drop(updates_tx);

    controller.start(Duration::from_secs(args.delay)).await?;
    if !global.quiet {
        eprintln!("Watching {} grill(s), Ctrl-C to stop", devices.len());
    }

    let color = output::should_color(&global.color);
    let mut states = controller.watch_supervisor_state();
    let mut liveness = tokio::time::interval(LIVENESS_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        tokio::select! {
            _ = &mut ctrl_c => break Ok(()),
            Some(device) = updates.recv() => {
                let line = render_update(controller, &device, &global.output, color);
                output::print_output(&line, global.quiet);
            }
            Ok(()) = states.changed() => {
                let state = *states.borrow_and_update();
                debug!(%state, "broker session state");
            }
            _ = liveness.tick() => {
                if !controller.is_running() {
                    break Err(CliError::ConnectionLost);
                }
            }
        }
    };

    controller.shutdown().await;
    result
}

fn render_update(controller: &Controller, device: &str, format: &OutputFormat, color: bool) -> String {
    let connected = controller.connectivity(device);
    let status = controller.status(device).unwrap_or(Value::Null);

    match format {
        OutputFormat::Json | OutputFormat::JsonCompact => json!({
            "device": device,
            "connected": connected,
            "status": status,
        })
        .to_string(),
        OutputFormat::Plain => format!("{device} {connected}"),
        OutputFormat::Table => format!(
            "{}  {device:<20} {:<8} grill {:>4} / {:<4} probe {:>4} / {:<4} state {}",
            chrono::Local::now().format("%H:%M:%S"),
            output::connectivity_label(connected, color),
            field(&status, "grill"),
            field(&status, "set"),
            field(&status, "probe"),
            field(&status, "probe_set"),
            field(&status, "system_status"),
        ),
    }
}

fn field(status: &Value, key: &str) -> String {
    match status.get(key) {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => "-".into(),
    }
}
