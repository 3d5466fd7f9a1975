// ── Device commands ──
//
// Typed command requests and their opaque wire strings, plus the HTTPS
// submission path shared by the controller and the scheduler.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use embercloud_api::CloudClient;

use crate::error::CoreError;
use crate::session::CredentialSession;

/// A command sent to one device through the cloud command endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask the device to publish a full status document (`90`).
    RefreshStatus,
    /// Grill setpoint, in the device's configured unit (`11,<t>`).
    SetTemperature(u32),
    /// Probe setpoint (`14,<t>`).
    SetProbeTemperature(u32),
    /// Switch commands are bare codes (`<code>`).
    SetSwitch(u32),
    /// Cook timer in seconds (`12,<sssss>`).
    SetTimer(u32),
    /// Clear the cook timer (`13`).
    ResetTimer,
    /// Begin the shutdown cycle (`17`).
    Shutdown,
    /// Any other code with comma-separated arguments.
    Raw { code: String, args: Vec<String> },
}

impl Command {
    /// The string posted as `{"command": ...}`.
    pub fn to_wire(&self) -> String {
        match self {
            Self::RefreshStatus => "90".into(),
            Self::SetTemperature(t) => format!("11,{t}"),
            Self::SetProbeTemperature(t) => format!("14,{t}"),
            Self::SetSwitch(code) => code.to_string(),
            Self::SetTimer(secs) => format!("12,{secs:05}"),
            Self::ResetTimer => "13".into(),
            Self::Shutdown => "17".into(),
            Self::Raw { code, args } => {
                std::iter::once(code.as_str())
                    .chain(args.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join(",")
            }
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// Authenticated command submission. Each call is independent.
#[derive(Clone)]
pub(crate) struct CommandChannel {
    session: Arc<CredentialSession>,
    cloud: Arc<CloudClient>,
}

impl CommandChannel {
    pub(crate) fn new(session: Arc<CredentialSession>, cloud: Arc<CloudClient>) -> Self {
        Self { session, cloud }
    }

    pub(crate) async fn submit(&self, device: &str, wire: &str) -> Result<(), CoreError> {
        let token = self.session.token().await?;
        self.cloud
            .send_command(token.expose(), device, wire)
            .await
            .map_err(|e| CoreError::command(device, e))?;
        debug!(device, command = wire, "command accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings() {
        assert_eq!(Command::RefreshStatus.to_wire(), "90");
        assert_eq!(Command::SetTemperature(225).to_wire(), "11,225");
        assert_eq!(Command::SetProbeTemperature(165).to_wire(), "14,165");
        assert_eq!(Command::SetSwitch(21).to_wire(), "21");
        assert_eq!(Command::ResetTimer.to_wire(), "13");
        assert_eq!(Command::Shutdown.to_wire(), "17");
    }

    #[test]
    fn timer_is_zero_padded_to_five_digits() {
        assert_eq!(Command::SetTimer(90).to_wire(), "12,00090");
        assert_eq!(Command::SetTimer(36_000).to_wire(), "12,36000");
    }

    #[test]
    fn raw_joins_args_with_commas() {
        let raw = Command::Raw {
            code: "16".into(),
            args: vec!["1".into(), "2".into()],
        };
        assert_eq!(raw.to_wire(), "16,1,2");
        assert_eq!(
            Command::Raw {
                code: "90".into(),
                args: Vec::new()
            }
            .to_string(),
            "90"
        );
    }
}
