//! Clap derive structures for the `embercloud` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// embercloud -- talk to cloud-connected pellet grills
#[derive(Debug, Parser)]
#[command(
    name = "embercloud",
    version,
    about = "Monitor and control cloud-connected pellet grills",
    long_about = "Signs in to the grill vendor's cloud, keeps a broker session alive,\n\
        streams live status, and sends commands to your grills.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Account profile to use
    #[arg(long, short = 'p', env = "EMBERCLOUD_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Account e-mail (overrides profile)
    #[arg(long, short = 'u', env = "EMBERCLOUD_USERNAME", global = true)]
    pub username: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "EMBERCLOUD_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "EMBERCLOUD_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the grills registered to the account
    #[command(alias = "ls")]
    Devices,

    /// Stream live status until interrupted
    Watch(WatchArgs),

    /// Send a raw command code with optional arguments
    #[command(name = "command")]
    Raw(RawCommandArgs),

    /// Set the grill target temperature
    SetTemp(TemperatureArgs),

    /// Set the probe target temperature
    SetProbeTemp(TemperatureArgs),

    /// Start the cook timer
    SetTimer(TimerArgs),

    /// Clear the cook timer
    ResetTimer(DeviceArg),

    /// Start the shutdown cycle
    ShutdownGrill(DeviceArg),

    /// Ask a grill to publish a full status update
    Refresh(DeviceArg),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Command Arguments ────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Seconds to wait before the first keepalive cycle
    #[arg(long, default_value = "0")]
    pub delay: u64,

    /// Only watch these grills (ID or name); default is all
    pub devices: Vec<String>,
}

#[derive(Debug, Args)]
pub struct DeviceArg {
    /// Grill ID or friendly name
    pub device: String,
}

#[derive(Debug, Args)]
pub struct RawCommandArgs {
    /// Grill ID or friendly name
    pub device: String,

    /// Command code (e.g. 11 for grill temperature)
    pub code: String,

    /// Arguments appended after the code, comma separated on the wire
    pub args: Vec<String>,
}

#[derive(Debug, Args)]
pub struct TemperatureArgs {
    /// Grill ID or friendly name
    pub device: String,

    /// Target temperature in the grill's configured unit
    pub temperature: u32,
}

#[derive(Debug, Args)]
pub struct TimerArgs {
    /// Grill ID or friendly name
    pub device: String,

    /// Timer length in seconds
    pub seconds: u32,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create a config file with guided setup
    Init,

    /// Display the current configuration (passwords redacted)
    Show,

    /// Print the config file path
    Path,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
