//! `openchat image` and `openchat upscale`

use super::{open_storage, proxy_client};
use crate::client::{encode_data_url, load_image_file, GeneratedImage};
use crate::config::Config;
use crate::error::{OpenChatError, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};

/// Arguments for image generation
#[derive(Debug, Clone)]
pub struct ImageArgs {
    /// Text prompt
    pub prompt: String,
    /// Model override
    pub model: Option<String>,
    /// `WIDTHxHEIGHT`
    pub size: String,
    /// Output format
    pub format: String,
    /// Destination file
    pub output: Option<PathBuf>,
}

/// Generate an image through the proxy
pub async fn run_image(config: &Config, args: ImageArgs) -> Result<()> {
    let storage = open_storage(config)?;
    let model = match args.model {
        Some(model) => model,
        None => storage.selected_image_model(&config.models.default_image_model)?,
    };
    let client = proxy_client(config, &storage)?;

    tracing::info!("Generating image with {} ({})", model, args.size);
    let image = client
        .generate_image(&args.prompt, Some(&model), &args.size, &args.format)
        .await?;

    let output = args
        .output
        .unwrap_or_else(|| default_output("openchat-image", &image.mime));
    save_image(&image, &output)
}

/// Upscale an image file through the proxy
pub async fn run_upscale(
    config: &Config,
    input: &Path,
    scale: f64,
    enhance: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let storage = open_storage(config)?;
    let client = proxy_client(config, &storage)?;
    let (mime, bytes) = load_image_file(input)?;

    tracing::info!("Upscaling {} by {}x", input.display(), scale);
    let image = client
        .upscale(&encode_data_url(&bytes, &mime), scale, enhance)
        .await?;

    let output = output.unwrap_or_else(|| default_output("openchat-upscaled", &image.mime));
    save_image(&image, &output)
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    }
}

fn default_output(stem: &str, mime: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    PathBuf::from(format!("{}-{}.{}", stem, stamp, extension_for(mime)))
}

fn save_image(image: &GeneratedImage, output: &Path) -> Result<()> {
    let bytes = image.decode()?;
    std::fs::write(output, &bytes).map_err(OpenChatError::Io)?;
    println!(
        "{} {} ({}, {} bytes)",
        "Saved".green(),
        output.display(),
        image.mime,
        bytes.len()
    );
    Ok(())
}
