//! Shared helpers for command handlers.

use embercloud_core::Controller;

use crate::error::CliError;

/// Resolve a grill by thing name, or by friendly name ignoring case.
pub async fn resolve_device(controller: &Controller, identifier: &str) -> Result<String, CliError> {
    let directory = controller.load_directory().await?;

    if let Some(thing) = directory.iter().find(|t| t.thing_name == identifier) {
        return Ok(thing.thing_name.clone());
    }
    directory
        .iter()
        .find(|t| {
            t.friendly_name
                .as_deref()
                .is_some_and(|name| name.eq_ignore_ascii_case(identifier))
        })
        .map(|t| t.thing_name.clone())
        .ok_or_else(|| CliError::DeviceNotFound {
            identifier: identifier.into(),
        })
}
