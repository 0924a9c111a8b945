//! `openchat info`

use super::{open_storage, proxy_client};
use crate::config::Config;
use crate::error::Result;
use colored::Colorize;
use prettytable::{format, row, Table};
use serde_json::Value;

/// Fetch `/api/info` from the proxy and print it
pub async fn run_info(config: &Config, json: bool) -> Result<()> {
    let storage = open_storage(config)?;
    let client = proxy_client(config, &storage)?;
    let info = client.info().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!(
        "\n{} {}",
        info["name"].as_str().unwrap_or("OpenChat").bold(),
        info["version"].as_str().unwrap_or("").dimmed()
    );
    println!("Proxy: {}", client.base_url().cyan());

    if let Some(limit) = info.get("rate_limit") {
        println!(
            "Rate limit: {} requests per {} per {}",
            limit["requests"],
            limit["window"].as_str().unwrap_or("-"),
            limit["per"].as_str().unwrap_or("-")
        );
    }
    if info["password_required"].as_bool().unwrap_or(false) {
        println!("{}", "Deployment password required".yellow());
    }

    print_models_table(&info);

    let images: Vec<&str> = info["image_models"]
        .as_array()
        .map(|models| models.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    println!("Image models: {}", images.join(", "));

    if let Some(blocked) = info["pricing_filter"]["blocked_models"].as_array() {
        if !blocked.is_empty() {
            println!("\n{}", "Blocked by pricing filter:".yellow());
            for model in blocked {
                println!(
                    "  {} (input ${}, output ${})",
                    model["id"].as_str().unwrap_or("?"),
                    model["inputPrice"],
                    model["outputPrice"]
                );
            }
        }
    }
    println!();
    Ok(())
}

fn print_models_table(info: &Value) {
    let Some(models) = info["models"].as_array() else {
        return;
    };

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.set_titles(row!["Model", "Web", "Tools", "Vision", "Reasoning"]);

    let flag = |caps: &Value, key: &str| {
        if caps[key].as_bool().unwrap_or(false) {
            "yes"
        } else {
            "-"
        }
    };

    for model in models.iter().filter_map(Value::as_str) {
        let caps = &info["model_capabilities"][model];
        table.add_row(row![
            model,
            flag(caps, "supportsWebSearch"),
            flag(caps, "supportsFunctionCalling"),
            flag(caps, "supportsVision"),
            flag(caps, "supportsReasoning")
        ]);
    }

    println!();
    table.printstd();
}
