//! Configuration view and validation commands (`orgboard config`).

use std::path::Path;

use anyhow::Result;
use orgboard::config::AppConfig;

use super::super::ConfigCommands;

pub fn cmd_config(config_path: &Path, effective: &AppConfig, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No config file at {} (using defaults)", config_path.display());
            }
            println!();
            println!("Effective configuration (file + .env + environment):");
            println!();
            let mut shown = effective.clone();
            if shown.ai.api_key.is_some() {
                shown.ai.api_key = Some("********".to_string());
            }
            print!("{}", toml::to_string_pretty(&shown)?);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = effective.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            AppConfig::default().save(config_path)?;

            println!("Created {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, dev");
            println!("  - [database] path");
            println!("  - [media] dir, max_upload_bytes");
            println!("  - [ai] model, timeout_secs (key via GEMINI_API_KEY)");
            println!("  - [logging] level, format, dir");
            println!();
        }
    }

    Ok(())
}
