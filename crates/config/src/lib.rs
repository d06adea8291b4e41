//! Layered configuration for folio.
//!
//! Values come from, in increasing priority: built-in defaults, a TOML file
//! (by default `config.toml` in the platform configuration directory) and
//! `FOLIO_`-prefixed environment variables, with `__` separating nested keys:
//!
//! ```text
//! FOLIO_PAGES__MAX_PAGES_TO_CACHE=-1
//! FOLIO_THUMBNAILS__SIZE=256
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use folio_archive::ArchiveSession;
use folio_pages::{CacheBudget, Options};
use folio_thumbnail::{NORMAL_SIZE, ThumbnailCache};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "FOLIO_";
const ENV_SEPARATOR: &str = "__";
const FILE_NAME: &str = "config.toml";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pages: PagesConfig,
    pub thumbnails: ThumbnailsConfig,
    pub archive: ArchiveConfig,
}
impl Config {
    /// `config.toml` in the platform configuration directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "folio").map(|dirs| dirs.config_dir().join(FILE_NAME))
    }

    /// Defaults, then `file` (if it exists), then the environment.
    pub fn figment(file: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(Config::default()));
        let figment = match file {
            Some(file) => figment.merge(Toml::file(file)),
            None => figment,
        };
        figment.merge(Env::prefixed(ENV_PREFIX).split(ENV_SEPARATOR))
    }

    /// Load from the default file location and the environment.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.is_none() {
            tracing::debug!("No configuration directory; using defaults and environment only");
        }
        Self::extract(Self::figment(path.as_deref()))
    }

    /// Load from `path` and the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Self::extract(Self::figment(Some(path.as_ref())))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(config = ?config, "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pages.max_pages_to_cache < -1 {
            exn::bail!(ErrorKind::Invalid(format!(
                "pages.max_pages_to_cache must be -1 or more, not {}",
                self.pages.max_pages_to_cache
            )));
        }
        if self.thumbnails.size == 0 {
            exn::bail!(ErrorKind::Invalid("thumbnails.size must be positive".to_string()));
        }
        Ok(())
    }

    /// A thumbnail cache in the configured directory, if one could be determined.
    pub fn thumbnail_cache(&self) -> Option<ThumbnailCache> {
        let cache = ThumbnailCache::new(self.thumbnails.directory()?).with_size(self.thumbnails.size);
        Some(match &self.archive.password {
            Some(password) => cache.with_password(password.clone()),
            None => cache,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagesConfig {
    /// `-1` keeps every page, `0` only the pages on screen.
    pub max_pages_to_cache: i64,
    pub double_page: bool,
    /// Move two pages at a time in double page mode.
    pub double_step: bool,
}
impl Default for PagesConfig {
    fn default() -> Self {
        Self { max_pages_to_cache: 7, double_page: false, double_step: true }
    }
}
impl PagesConfig {
    /// Values below `-1` (which [`Config::validate`] rejects) fall back to the default budget.
    pub fn budget(&self) -> CacheBudget {
        CacheBudget::from_pages(self.max_pages_to_cache).unwrap_or_default()
    }

    pub fn options(&self) -> Options {
        Options { budget: self.budget(), double_page: self.double_page, double_step: self.double_step }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailsConfig {
    /// Defaults to the shared `thumbnails/normal` directory in the user's cache.
    pub directory: Option<PathBuf>,
    pub size: u32,
}
impl Default for ThumbnailsConfig {
    fn default() -> Self {
        Self { directory: None, size: NORMAL_SIZE }
    }
}
impl ThumbnailsConfig {
    pub fn directory(&self) -> Option<PathBuf> {
        self.directory.clone().or_else(ThumbnailCache::default_directory)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Tried on any archive that turns out to be encrypted.
    pub password: Option<String>,
}
impl ArchiveConfig {
    /// Open `path` as an archive, with the configured password attached.
    pub fn session(&self, path: impl Into<PathBuf>) -> folio_archive::error::Result<ArchiveSession> {
        let session = ArchiveSession::open(path)?;
        Ok(match &self.password {
            Some(password) => session.with_password(password.clone()),
            None => session,
        })
    }
}
