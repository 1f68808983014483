use std::path::{Path, PathBuf};

use chrono::Duration;
use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "NOVAVOTE_";

/// Which bulletin storage backend to use.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// One file per record under the storage path.
    Local,
    /// Process-local map, lost on shutdown.
    Memory,
}

/// Application configuration.
///
/// Layered from defaults, an optional JSON file and `NOVAVOTE_*` environment
/// variables, in that order, and handed to [`crate::Board::launch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    token_ttl_minutes: u32,
    storage: StorageKind,
    storage_path: PathBuf,
    security_bits: u32,
    trustees: u32,
    trustee_threshold: u32,
    public_url: String,
    mail_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token_ttl_minutes: 15,
            storage: StorageKind::Local,
            storage_path: PathBuf::from("./storage"),
            security_bits: 2048,
            trustees: 1,
            trustee_threshold: 1,
            public_url: "http://localhost:3001".to_string(),
            mail_enabled: true,
        }
    }
}

impl Config {
    /// The configuration sources, lowest priority first.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = file {
            figment = figment.merge(Json::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load the config from defaults, `file` if given, and the environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        if let Some(file) = file {
            if !file.is_file() {
                return Err(Error::validation(format!(
                    "config file {} does not exist",
                    file.display()
                )));
            }
        }
        Self::extract(&Self::figment(file))
    }

    /// Extract and validate a config from any figment.
    pub fn extract(figment: &Figment) -> Result<Self> {
        let config: Self = figment.extract().map_err(|e| {
            error!("Failed to load application config");
            Error::validation(format!("bad config: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// An in-memory configuration, used by tests.
    pub fn in_memory() -> Self {
        Self {
            storage: StorageKind::Memory,
            ..Self::default()
        }
    }

    /// Use the local filesystem backend rooted at `path`.
    pub fn with_local_storage(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage = StorageKind::Local;
        self.storage_path = path.into();
        self
    }

    /// Override the access token lifetime.
    pub fn with_token_ttl_minutes(mut self, minutes: u32) -> Self {
        self.token_ttl_minutes = minutes;
        self
    }

    /// Override the trustee layout.
    pub fn with_trustees(mut self, trustees: u32, threshold: u32) -> Self {
        self.trustees = trustees;
        self.trustee_threshold = threshold;
        self
    }

    /// Check that all values are in range.
    pub fn validate(&self) -> Result<()> {
        if self.token_ttl_minutes == 0 {
            return Err(Error::validation("token TTL must be positive"));
        }
        if !(256..=8192).contains(&self.security_bits) || self.security_bits % 8 != 0 {
            return Err(Error::validation(format!(
                "security parameter {} must be a multiple of 8 between 256 and 8192",
                self.security_bits
            )));
        }
        if self.trustee_threshold == 0 || self.trustee_threshold > self.trustees {
            return Err(Error::validation(format!(
                "trustee threshold {} must be between 1 and {}",
                self.trustee_threshold, self.trustees
            )));
        }
        Ok(())
    }

    /// Valid lifetime of an access token.
    pub fn token_ttl(&self) -> Duration {
        Duration::minutes(self.token_ttl_minutes.into())
    }

    /// The bulletin storage backend.
    pub fn storage(&self) -> StorageKind {
        self.storage
    }

    /// Root directory of the local storage backend.
    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Key size in bits requested from the crypto engine.
    pub fn security_bits(&self) -> u32 {
        self.security_bits
    }

    /// Number of trustees holding a key share.
    pub fn trustees(&self) -> u32 {
        self.trustees
    }

    /// Number of distinct shares needed to decrypt a tally.
    pub fn trustee_threshold(&self) -> u32 {
        self.trustee_threshold
    }

    /// Base URL used when building links sent to voters.
    pub fn public_url(&self) -> &str {
        self.public_url.trim_end_matches('/')
    }

    /// If false, notifications are logged instead of delivered.
    pub fn mail_enabled(&self) -> bool {
        self.mail_enabled
    }
}
