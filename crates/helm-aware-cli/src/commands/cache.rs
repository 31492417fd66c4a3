use std::path::Path;

use anyhow::Result;
use helm_aware::VersionCache;

pub async fn info(cache: &VersionCache, path: &Path) -> Result<()> {
    println!("Database: {}", path.display());
    println!("Record:   {}", cache.record_id());

    match cache.metadata().await {
        Some(metadata) => {
            println!("Created:  {}", metadata.created_at.to_rfc3339());
            println!("Charts:   {}", metadata.entry_count);
        }
        None => println!("Charts:   0 (cache is empty)"),
    }
    Ok(())
}

pub async fn clear(cache: &VersionCache) -> Result<()> {
    if !cache.clear().await {
        anyhow::bail!("failed to clear cache record {}", cache.record_id());
    }
    println!("Cache cleared.");
    Ok(())
}
