//! Config subcommand handlers.

use dialoguer::{Input, Select};
use serde_json::Value;

use embercloud_config::{self as config, Config, PASSWORD_ENV, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

const REDACTED: &str = "********";

fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init => init(global),
        ConfigCommand::Show => {
            let cfg = config::load_config()?;
            let redacted = redacted(&cfg);
            let out = output::render_single(
                &global.output,
                &redacted,
                |_| toml::to_string_pretty(&strip_nulls(&redacted)).unwrap_or_default(),
                |_| config::config_path().display().to_string(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", config::config_path().display());
            Ok(())
        }
    }
}

// ── Init: interactive wizard ────────────────────────────────────────

fn init(global: &GlobalOpts) -> Result<(), CliError> {
    let config_path = config::config_path();
    eprintln!("embercloud configuration wizard");
    eprintln!("   Config path: {}\n", config_path.display());

    let profile_name: String = Input::new()
        .with_prompt("Profile name")
        .default(global.profile.clone().unwrap_or_else(|| "default".into()))
        .interact_text()
        .map_err(prompt_err)?;

    let mut username_prompt = Input::<String>::new().with_prompt("Account e-mail");
    if let Some(ref username) = global.username {
        username_prompt = username_prompt.default(username.clone());
    }
    let username = username_prompt.interact_text().map_err(prompt_err)?;

    let store_choices = &[
        "Read from an environment variable (recommended)",
        "Save to config file (plaintext)",
    ];
    let store_selection = Select::new()
        .with_prompt("Where should the password come from?")
        .items(store_choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    let (password, password_env) = if store_selection == 0 {
        let var: String = Input::new()
            .with_prompt("Environment variable")
            .default(PASSWORD_ENV.into())
            .interact_text()
            .map_err(prompt_err)?;
        (None, Some(var))
    } else {
        let pass = rpassword::prompt_password("Password: ").map_err(prompt_err)?;
        if pass.is_empty() {
            return Err(CliError::Validation {
                field: "password".into(),
                reason: "password cannot be empty".into(),
            });
        }
        (Some(pass), None)
    };

    if username.is_empty() {
        return Err(CliError::Validation {
            field: "username".into(),
            reason: "e-mail cannot be empty".into(),
        });
    }

    let profile = Profile {
        username: Some(username),
        password,
        password_env,
        ..Profile::default()
    };

    let mut cfg = config::load_config().unwrap_or_default();
    cfg.profiles.insert(profile_name.clone(), profile);
    cfg.default_profile = Some(profile_name.clone());
    config::save_config(&cfg)?;

    eprintln!("\n✓ Configuration written to {}", config_path.display());
    eprintln!("  Active profile: {profile_name}");
    eprintln!("\n  Test it: embercloud devices");
    Ok(())
}

// ── Show ────────────────────────────────────────────────────────────

/// The config as JSON with every plaintext password masked.
fn redacted(cfg: &Config) -> Value {
    let mut value = serde_json::to_value(cfg).unwrap_or(Value::Null);
    if let Some(profiles) = value.get_mut("profiles").and_then(Value::as_object_mut) {
        for profile in profiles.values_mut() {
            if let Some(password) = profile.get_mut("password") {
                if !password.is_null() {
                    *password = Value::String(REDACTED.into());
                }
            }
        }
    }
    value
}

/// TOML has no null; drop null fields before rendering.
fn strip_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "home".into(),
            Profile {
                username: Some("cook@example.com".into()),
                password: Some("hunter2".into()),
                ..Profile::default()
            },
        );
        cfg
    }

    #[test]
    fn show_masks_passwords() {
        let value = redacted(&sample());
        assert_eq!(value["profiles"]["home"]["password"], REDACTED);
        assert_eq!(value["profiles"]["home"]["username"], "cook@example.com");
        assert!(!value.to_string().contains("hunter2"));
    }

    #[test]
    fn toml_view_skips_unset_fields() {
        let rendered =
            toml::to_string_pretty(&strip_nulls(&redacted(&sample()))).unwrap_or_default();
        assert!(rendered.contains("[profiles.home]"));
        assert!(!rendered.contains("password_env"));
    }
}
