//! `openchat render`

use crate::error::{OpenChatError, Result};
use crate::sanitize::render_message;
use crate::types::CitationMap;
use std::io::Read;
use std::path::Path;

/// Render markdown from a file or stdin and print the sanitized HTML
///
/// # Arguments
///
/// * `file` - Markdown source; stdin when `None`
/// * `citations` - Optional JSON file holding a citation map
///
/// # Errors
///
/// Returns `OpenChatError::Io` if an input cannot be read and
/// `OpenChatError::Validation` if the citation file is not a citation map.
pub fn run_render(file: Option<&Path>, citations: Option<&Path>) -> Result<()> {
    let content = match file {
        Some(path) => std::fs::read_to_string(path).map_err(OpenChatError::Io)?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .map_err(OpenChatError::Io)?;
            buffer
        }
    };

    let citations = match citations {
        Some(path) => load_citations(path)?,
        None => CitationMap::new(),
    };

    println!("{}", render_message(&content, &citations));
    Ok(())
}

fn load_citations(path: &Path) -> Result<CitationMap> {
    let raw = std::fs::read_to_string(path).map_err(OpenChatError::Io)?;
    serde_json::from_str(&raw).map_err(|e| {
        OpenChatError::Validation(format!(
            "Invalid citation map in {}: {}",
            path.display(),
            e
        ))
        .into()
    })
}
