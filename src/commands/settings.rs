use super::open_storage;
use crate::cli::SettingsCommand;
use crate::config::Config;
use crate::error::Result;
use colored::Colorize;
use prettytable::{format, row, Table};

/// Handle settings commands
pub fn handle_settings(config: &Config, command: SettingsCommand) -> Result<()> {
    let storage = open_storage(config)?;

    match command {
        SettingsCommand::Show => {
            let snapshot = storage.settings_snapshot(
                &config.models.default_model,
                &config.models.default_image_model,
            )?;

            let mut table = Table::new();
            table.set_format(*format::consts::FORMAT_CLEAN);
            for (key, value) in snapshot {
                let shown = match value {
                    serde_json::Value::String(s) if s.is_empty() => "-".to_string(),
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                table.add_row(row![key.cyan(), shown]);
            }
            table.printstd();
            println!("Database: {}", storage.db_path().display());
        }
        SettingsCommand::Set { key, value } => {
            storage.set_setting(&key, &value)?;
            println!("{}", format!("Set {}", key).green());
        }
        SettingsCommand::AcceptTos => {
            storage.set_tos_accepted(true)?;
            println!("{}", "Terms of Service accepted".green());
        }
    }

    Ok(())
}
