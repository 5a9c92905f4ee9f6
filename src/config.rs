use std::path::PathBuf;
use std::time::Duration;

use crate::album::SyncConfig;
use crate::flickr::{FlickrConfig, MAX_PAGE_SIZE};

/// Application configuration, built once from the command line and handed
/// to the clients and the controller at construction.
pub struct Config {
    pub db_path: PathBuf,
    pub api_key: Option<String>,
    pub api_base: String,

    pub timeout: Duration,
    pub max_concurrent: usize,
    pub page_size: u32,

    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("db_path", &self.db_path)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("page_size", &self.page_size)
            .field("max_concurrent", &self.max_concurrent)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(cli: &crate::cli::Cli) -> anyhow::Result<Self> {
        if cli.page_size == 0 || cli.page_size > MAX_PAGE_SIZE {
            anyhow::bail!(
                "--page-size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                cli.page_size
            );
        }
        if cli.max_concurrent == 0 {
            anyhow::bail!("--max-concurrent must be at least 1");
        }
        if cli.timeout_secs == 0 {
            anyhow::bail!("--timeout-secs must be at least 1");
        }

        Ok(Self {
            db_path: expand_tilde(&cli.db_path),
            api_key: cli.api_key.clone().filter(|key| !key.trim().is_empty()),
            api_base: cli.api_base.clone(),
            timeout: Duration::from_secs(cli.timeout_secs),
            max_concurrent: cli.max_concurrent,
            page_size: cli.page_size,
            no_progress_bar: cli.no_progress_bar,
        })
    }

    /// Settings for the Flickr client. Fails without an API key.
    pub fn flickr_config(&self) -> anyhow::Result<FlickrConfig> {
        let Some(api_key) = self.api_key.clone() else {
            anyhow::bail!("A Flickr API key is required: pass --api-key or set FLICKR_API_KEY");
        };
        Ok(FlickrConfig {
            api_key,
            api_base: self.api_base.clone(),
            page_size: self.page_size,
        })
    }

    /// Fan-out never exceeds one page, however large the concurrency limit.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            max_concurrent: self.max_concurrent.min(self.page_size as usize),
        }
    }
}
