//! On-disk TOML configuration.
//!
//! All fields are optional so partial configs work; the CLI merges a CWD
//! `.litpipe.toml` over the platform config file, and flags over both.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::rate_limit::{ServiceLimits, ServiceRateLimiter};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub general: Option<GeneralConfig>,
    pub download: Option<DownloadConfig>,
    pub matcher: Option<MatcherConfig>,
    /// Per-service overrides of the built-in rate limits.
    pub rate_limits: Option<HashMap<String, LimitEntry>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub db_path: Option<String>,
    pub download_dir: Option<String>,
    /// Contact address sent to OpenAlex/Crossref/Unpaywall.
    pub mailto: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Sci-Hub mirrors tried in rotation. The hard-coded defaults go stale;
    /// this is the knob to refresh them without a rebuild.
    pub scihub_mirrors: Option<Vec<String>>,
    pub libgen_enabled: Option<bool>,
    pub libgen_base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatcherConfig {
    pub fetch_references: Option<bool>,
    pub fetch_citations: Option<bool>,
    pub max_citations: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LimitEntry {
    pub rps: Option<u32>,
    pub rpm: Option<u32>,
    pub tpm: Option<u64>,
    pub rpd: Option<u32>,
}

impl From<LimitEntry> for ServiceLimits {
    fn from(e: LimitEntry) -> Self {
        ServiceLimits {
            rps: e.rps,
            rpm: e.rpm,
            tpm: e.tpm,
            rpd: e.rpd,
        }
    }
}

/// Platform config path: `<config_dir>/litpipe/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("litpipe").join("config.toml"))
}

/// Load config by cascading CWD `.litpipe.toml` over the platform config.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(&PathBuf::from(".litpipe.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. `None` if missing or unparsable.
pub fn load_from_path(path: &PathBuf) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    fn pick<T: Clone>(over: Option<&T>, base: Option<&T>) -> Option<T> {
        over.or(base).cloned()
    }

    let general = Some(GeneralConfig {
        db_path: pick(
            overlay.general.as_ref().and_then(|g| g.db_path.as_ref()),
            base.general.as_ref().and_then(|g| g.db_path.as_ref()),
        ),
        download_dir: pick(
            overlay.general.as_ref().and_then(|g| g.download_dir.as_ref()),
            base.general.as_ref().and_then(|g| g.download_dir.as_ref()),
        ),
        mailto: pick(
            overlay.general.as_ref().and_then(|g| g.mailto.as_ref()),
            base.general.as_ref().and_then(|g| g.mailto.as_ref()),
        ),
    });

    let download = Some(DownloadConfig {
        scihub_mirrors: pick(
            overlay.download.as_ref().and_then(|d| d.scihub_mirrors.as_ref()),
            base.download.as_ref().and_then(|d| d.scihub_mirrors.as_ref()),
        ),
        libgen_enabled: overlay
            .download
            .as_ref()
            .and_then(|d| d.libgen_enabled)
            .or(base.download.as_ref().and_then(|d| d.libgen_enabled)),
        libgen_base_url: pick(
            overlay.download.as_ref().and_then(|d| d.libgen_base_url.as_ref()),
            base.download.as_ref().and_then(|d| d.libgen_base_url.as_ref()),
        ),
        timeout_secs: overlay
            .download
            .as_ref()
            .and_then(|d| d.timeout_secs)
            .or(base.download.as_ref().and_then(|d| d.timeout_secs)),
    });

    let matcher = Some(MatcherConfig {
        fetch_references: overlay
            .matcher
            .as_ref()
            .and_then(|m| m.fetch_references)
            .or(base.matcher.as_ref().and_then(|m| m.fetch_references)),
        fetch_citations: overlay
            .matcher
            .as_ref()
            .and_then(|m| m.fetch_citations)
            .or(base.matcher.as_ref().and_then(|m| m.fetch_citations)),
        max_citations: overlay
            .matcher
            .as_ref()
            .and_then(|m| m.max_citations)
            .or(base.matcher.as_ref().and_then(|m| m.max_citations)),
    });

    // Rate-limit tables merge per service, overlay entries winning.
    let rate_limits = match (base.rate_limits, overlay.rate_limits) {
        (None, None) => None,
        (Some(b), None) => Some(b),
        (None, Some(o)) => Some(o),
        (Some(b), Some(o)) => {
            let mut merged = b;
            merged.extend(o);
            Some(merged)
        }
    };

    ConfigFile {
        general,
        download,
        matcher,
        rate_limits,
    }
}

/// Build the process-wide rate limiter: built-in defaults with any
/// `[rate_limits.<service>]` entries applied on top.
pub fn build_rate_limiter(config: &ConfigFile) -> ServiceRateLimiter {
    let mut limiter = ServiceRateLimiter::default();
    if let Some(overrides) = &config.rate_limits {
        for (service, entry) in overrides {
            limiter.register(service, ServiceLimits::from(*entry));
        }
    }
    limiter
}
