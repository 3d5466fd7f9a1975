mod cli;
mod commands;
mod error;
mod output;

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use embercloud_config::{self as config, ConfigError, Profile};
use embercloud_core::{CloudConfig, Controller};

use crate::cli::{Cli, Command, GlobalOpts};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose, cli.global.log_json);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, json: bool) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Config commands don't need an account
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),

        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "embercloud", &mut std::io::stdout());
            Ok(())
        }

        cmd => {
            let cloud_config = build_cloud_config(&cli.global)?;
            let controller = Controller::new(cloud_config)?;

            tracing::debug!(command = ?cmd, "dispatching command");
            commands::dispatch(cmd, &controller, &cli.global).await
        }
    }
}

/// Build a `CloudConfig` from the config file, profile, and CLI overrides.
fn build_cloud_config(global: &GlobalOpts) -> Result<CloudConfig, CliError> {
    let cfg = config::load_config_or_default();

    let mut cloud = match cfg.profile(global.profile.as_deref()) {
        Ok((name, profile)) => config::profile_to_cloud_config(profile, &name, &cfg.defaults)?,
        Err(ConfigError::UnknownProfile { profile }) if global.profile.is_some() => {
            let mut available: Vec<_> = cfg.profiles.keys().cloned().collect();
            available.sort();
            return Err(CliError::ProfileNotFound {
                name: profile,
                available: if available.is_empty() {
                    "(none)".into()
                } else {
                    available.join(", ")
                },
            });
        }
        // No profile: credentials from flags / env alone
        Err(ConfigError::UnknownProfile { profile }) => {
            let adhoc = Profile {
                username: global.username.clone(),
                ..Profile::default()
            };
            config::profile_to_cloud_config(&adhoc, &profile, &cfg.defaults)?
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(ref username) = global.username {
        cloud.username.clone_from(username);
    }
    if let Some(secs) = global.timeout {
        cloud.timeout = Duration::from_secs(secs);
    }

    Ok(cloud)
}
