//! Configuration for the page cache pipeline

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ReaderError, Result};

/// Default database location for the persistent page store
pub const DEFAULT_DATABASE_URL: &str = "sqlite:./pdf-reader-cache.db";

#[derive(Debug, Clone, Default)]
pub struct ReaderConfig {
    pub store: StoreConfig,
    pub preload: PreloadConfig,
    pub render: RenderOptions,
    pub visibility: VisibilityConfig,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    /// Max persisted pages across all documents
    pub max_cache_size: usize,
    /// Max age before a cached page is treated as absent
    pub cache_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct PreloadConfig {
    /// Pages to prefetch in each direction
    pub preload_range: u32,
    /// Extra distance beyond `preload_range` kept in memory
    pub cleanup_slack: u32,
    /// Debounce before pruning distant in-memory pages
    pub cleanup_delay: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    /// Render resolution multiplier
    pub scale: f32,
    /// Lossy encode quality in (0, 1]
    pub image_quality: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct VisibilityConfig {
    /// Intersection lookahead in px
    pub margin_px: f64,
    /// Visible fraction needed to count as visible
    pub threshold: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_cache_size: 50,
            cache_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl Default for PreloadConfig {
    fn default() -> Self {
        PreloadConfig {
            preload_range: 2,
            cleanup_slack: 5,
            cleanup_delay: Duration::from_millis(2000),
        }
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            scale: 1.5,
            image_quality: 0.85,
        }
    }
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        VisibilityConfig {
            margin_px: 200.0,
            threshold: 0.01,
        }
    }
}

impl ReaderConfig {
    /// Build a config from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = ReaderConfig::default();

        let config = ReaderConfig {
            store: StoreConfig {
                database_url: env::var("PAGE_CACHE_URL")
                    .unwrap_or(defaults.store.database_url),
                max_cache_size: parse_var("PAGE_CACHE_MAX_PAGES")?
                    .unwrap_or(defaults.store.max_cache_size),
                cache_ttl: parse_var::<u64>("PAGE_CACHE_TTL_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.store.cache_ttl),
            },
            preload: PreloadConfig {
                preload_range: parse_var("PRELOAD_RANGE")?
                    .unwrap_or(defaults.preload.preload_range),
                cleanup_slack: parse_var("CLEANUP_SLACK")?
                    .unwrap_or(defaults.preload.cleanup_slack),
                cleanup_delay: parse_var::<u64>("CLEANUP_DELAY_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.preload.cleanup_delay),
            },
            render: RenderOptions {
                scale: parse_var("RENDER_SCALE")?.unwrap_or(defaults.render.scale),
                image_quality: parse_var("RENDER_QUALITY")?
                    .unwrap_or(defaults.render.image_quality),
            },
            visibility: VisibilityConfig {
                margin_px: parse_var("VISIBILITY_MARGIN_PX")?
                    .unwrap_or(defaults.visibility.margin_px),
                threshold: defaults.visibility.threshold,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.max_cache_size == 0 {
            return Err(ReaderError::Config("max_cache_size must be at least 1".into()));
        }
        if !(self.render.scale > 0.0) {
            return Err(ReaderError::Config(format!(
                "scale must be positive, got {}",
                self.render.scale
            )));
        }
        if !(self.render.image_quality > 0.0 && self.render.image_quality <= 1.0) {
            return Err(ReaderError::Config(format!(
                "image_quality must be in (0, 1], got {}",
                self.render.image_quality
            )));
        }
        if self.visibility.margin_px < 0.0 {
            return Err(ReaderError::Config("visibility margin cannot be negative".into()));
        }
        Ok(())
    }
}

impl PreloadConfig {
    /// Distance from the current page beyond which in-memory state is pruned
    pub fn retain_distance(&self) -> u32 {
        self.preload_range.saturating_add(self.cleanup_slack)
    }
}

fn parse_var<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ReaderError::Config(format!("{key} has invalid value {raw:?}"))),
        Err(_) => Ok(None),
    }
}
