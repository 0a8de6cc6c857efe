//! Cache administration: `pageforge cache info|clear-expired|delete`.

use anyhow::{Context, Result, bail};

use pageforge::config::ServiceConfig;
use pageforge::service::cache::ResultCache;

use super::super::CacheCommands;

pub async fn cmd_cache(config: &ServiceConfig, command: &CacheCommands) -> Result<()> {
    let cache = ResultCache::open(config.cache.dir.clone(), config.cache.ttl())
        .await
        .with_context(|| format!("Failed to open cache at {}", config.cache.dir.display()))?;

    match command {
        CacheCommands::Info => {
            let info = cache.info().await.context("Failed to read cache")?;
            println!("Cache directory: {}", info.cache_dir);
            println!("TTL:             {} hours", info.ttl_hours);
            println!(
                "Entries:         {} ({} valid, {} expired)",
                info.total_entries, info.valid_entries, info.expired_entries
            );
            println!("Size:            {} bytes", info.total_size_bytes);
        }
        CacheCommands::ClearExpired => {
            let cleared = cache.clear_expired().await.context("Failed to clear cache")?;
            println!("Cleared {} expired cache entries", cleared);
        }
        CacheCommands::Delete { key } => {
            if !cache.delete(key).await.context("Failed to delete cache entry")? {
                bail!("No cache entry for '{}'", key);
            }
            println!("Deleted cache entry '{}'", key);
        }
    }
    Ok(())
}
