//! Configuration management

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ingest::priority::{PriorityTable, DEFAULT_PRIORITY_VERSION};
use crate::ingest::sources::{SourceCatalog, SourceMode, SourceStatus, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/medsync";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

// ============================================================================
// Import Configuration Constants
// ============================================================================

/// Default upload limit (50 MiB); spreadsheets are read whole.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Default number of codes per reference lookup.
pub const DEFAULT_REFERENCE_CHUNK_SIZE: usize = 1000;

/// Default bound on one streamed read (64 KiB).
pub const DEFAULT_STREAM_READ_CHUNK_BYTES: usize = 64 * 1024;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    pub import: ImportConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// Import pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    pub max_upload_bytes: usize,
    pub reference_chunk_size: usize,
    pub stream_read_chunk_bytes: usize,
    pub priority_version: String,
    /// Load chunk size per source id
    pub chunk_sizes: BTreeMap<String, usize>,
    /// Endpoint per cloud source id
    pub cloud_urls: BTreeMap<String, String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            reference_chunk_size: DEFAULT_REFERENCE_CHUNK_SIZE,
            stream_read_chunk_bytes: DEFAULT_STREAM_READ_CHUNK_BYTES,
            priority_version: DEFAULT_PRIORITY_VERSION.to_string(),
            chunk_sizes: BTreeMap::new(),
            cloud_urls: BTreeMap::new(),
        }
    }
}

impl ImportConfig {
    /// Load from `IMPORT_*` variables; per-source keys use the upper-cased id
    ///
    /// e.g. `IMPORT_CHUNK_SIZE_PROCEDURES=1000`,
    /// `IMPORT_CLOUD_URL_ROSTER_FEDERAL=https://...`
    pub fn from_env(catalog: &SourceCatalog) -> Self {
        let mut config = Self {
            max_upload_bytes: env_parse("IMPORT_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
            reference_chunk_size: env_parse(
                "IMPORT_REFERENCE_CHUNK_SIZE",
                DEFAULT_REFERENCE_CHUNK_SIZE,
            ),
            stream_read_chunk_bytes: env_parse(
                "IMPORT_STREAM_READ_CHUNK_BYTES",
                DEFAULT_STREAM_READ_CHUNK_BYTES,
            ),
            priority_version: std::env::var("IMPORT_PRIORITY_VERSION")
                .unwrap_or_else(|_| DEFAULT_PRIORITY_VERSION.to_string()),
            ..Default::default()
        };

        for spec in catalog.iter() {
            let suffix = spec.id.to_uppercase();
            if let Some(size) = std::env::var(format!("IMPORT_CHUNK_SIZE_{suffix}"))
                .ok()
                .and_then(|s| s.parse().ok())
            {
                config.chunk_sizes.insert(spec.id.to_string(), size);
            }
            if let Ok(url) = std::env::var(format!("IMPORT_CLOUD_URL_{suffix}")) {
                if !url.trim().is_empty() {
                    config.cloud_urls.insert(spec.id.to_string(), url.trim().to_string());
                }
            }
        }

        config
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_upload_bytes == 0 {
            anyhow::bail!("IMPORT_MAX_UPLOAD_BYTES must be greater than 0");
        }
        if self.reference_chunk_size == 0 {
            anyhow::bail!("IMPORT_REFERENCE_CHUNK_SIZE must be greater than 0");
        }
        if self.stream_read_chunk_bytes == 0 || self.stream_read_chunk_bytes > DEFAULT_STREAM_READ_CHUNK_BYTES {
            anyhow::bail!(
                "IMPORT_STREAM_READ_CHUNK_BYTES must be between 1 and {}",
                DEFAULT_STREAM_READ_CHUNK_BYTES
            );
        }
        for (source, size) in &self.chunk_sizes {
            if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(size) {
                anyhow::bail!(
                    "Chunk size {} for source '{}' is outside {}..={}",
                    size,
                    source,
                    MIN_CHUNK_SIZE,
                    MAX_CHUNK_SIZE
                );
            }
        }
        if PriorityTable::by_version(&self.priority_version).is_none() {
            anyhow::bail!("Unknown priority table version '{}'", self.priority_version);
        }
        Ok(())
    }

    pub fn priorities(&self) -> PriorityTable {
        PriorityTable::by_version(&self.priority_version).unwrap_or_default()
    }

    /// Apply overrides to a catalogue; cloud sources without a URL are disabled
    pub fn apply(&self, catalog: &mut SourceCatalog) {
        for (source, size) in &self.chunk_sizes {
            catalog.set_chunk_size(source, *size);
        }

        let cloud_ids: Vec<&'static str> = catalog
            .iter()
            .filter(|s| s.mode == SourceMode::Cloud)
            .map(|s| s.id)
            .collect();
        for id in cloud_ids {
            let url = self.cloud_urls.get(id).cloned();
            if url.is_none() {
                tracing::warn!(source = id, "Cloud source has no URL configured; disabling");
                if let Some(spec) = catalog.get_mut(id) {
                    spec.status = SourceStatus::Disabled;
                }
            }
            catalog.set_cloud_url(id, url);
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("MEDSYNC_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_parse("MEDSYNC_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_parse(
                    "MEDSYNC_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_parse(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: env_parse(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: env_parse(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_parse(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                ),
            },
            cors: CorsConfig {
                allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| DEFAULT_CORS_ALLOWED_ORIGIN.to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                allow_credentials: env_parse("CORS_ALLOW_CREDENTIALS", true),
            },
            import: ImportConfig::from_env(&SourceCatalog::builtin()),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        self.import.validate()
    }

    /// Source catalogue with this configuration's overrides applied
    pub fn catalog(&self) -> SourceCatalog {
        let mut catalog = SourceCatalog::builtin();
        self.import.apply(&mut catalog);
        catalog
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
            import: ImportConfig::default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_pool_bounds_are_checked() {
        let mut config = Config::default();
        config.database.min_connections = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_import_overrides_are_validated() {
        let mut import = ImportConfig::default();
        import.chunk_sizes.insert("procedures".to_string(), 50);
        assert!(import.validate().is_err());

        let mut import = ImportConfig::default();
        import.priority_version = "v9".to_string();
        assert!(import.validate().is_err());

        let mut import = ImportConfig::default();
        import.stream_read_chunk_bytes = 1024 * 1024;
        assert!(import.validate().is_err());
    }

    #[test]
    fn test_cloud_source_without_url_is_disabled() {
        let mut catalog = SourceCatalog::builtin();
        ImportConfig::default().apply(&mut catalog);
        assert_eq!(catalog.get("roster_federal").unwrap().status, SourceStatus::Disabled);

        let mut import = ImportConfig::default();
        import
            .cloud_urls
            .insert("roster_federal".to_string(), "https://example.org/roster.txt".to_string());
        import.chunk_sizes.insert("procedures".to_string(), 1000);
        let mut catalog = SourceCatalog::builtin();
        import.apply(&mut catalog);
        let federal = catalog.get("roster_federal").unwrap();
        assert_eq!(federal.status, SourceStatus::Active);
        assert_eq!(federal.cloud_url.as_deref(), Some("https://example.org/roster.txt"));
        assert_eq!(catalog.get("procedures").unwrap().chunk_size, 1000);
    }
}
