pub mod batch;
pub mod cache;
pub mod format;
pub mod scan;
pub mod versions;

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};

/// Read a whole input from `path`, or stdin when it is absent or `-`.
pub fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        _ => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read stdin")?;
            Ok(text)
        }
    }
}
