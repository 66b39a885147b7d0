use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    #[serde(default = "default_jwt_secret")]
    pub secret: String,
    #[serde(default = "default_access_token_expire")]
    pub access_token_expire_minutes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    /// Content-type prefixes accepted by the upload pipeline
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
    /// Expose unauthenticated /api/public/files/:id when set
    #[serde(default)]
    pub allow_public_view: bool,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_db_path() -> String {
    "data/pixvault.db".to_string()
}

fn default_jwt_secret() -> String {
    // Replaced by a generated secret on first start if left unchanged
    "your-super-secret-key-change-it".to_string()
}

fn default_access_token_expire() -> u64 {
    60 // 1 hour
}

fn default_base_path() -> String {
    "data/blobs".to_string()
}

fn default_chunk_size() -> usize {
    256 * 1024
}

fn default_max_upload_size() -> u64 {
    5 * 1024 * 1024 // 5 MiB
}

fn default_allowed_types() -> Vec<String> {
    vec!["image/".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: default_jwt_secret(),
            access_token_expire_minutes: default_access_token_expire(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            chunk_size: default_chunk_size(),
            max_upload_size: default_max_upload_size(),
            allowed_types: default_allowed_types(),
            allow_public_view: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            jwt: JwtConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.ensure_directories()?;
        config.ensure_jwt_secret()?;
        Ok(config)
    }

    /// Load configuration from config.toml
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["config.toml", "data/config.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    /// Format: PV_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        // Server overrides
        if let Ok(val) = env::var("PV_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = env::var("PV_CONF_SERVER_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }

        // Database overrides
        if let Ok(val) = env::var("PV_CONF_DATABASE_PATH") {
            self.database.path = val;
        }

        // JWT overrides
        if let Ok(val) = env::var("PV_CONF_JWT_SECRET") {
            self.jwt.secret = val;
        }
        if let Ok(val) = env::var("PV_CONF_JWT_ACCESS_EXPIRE") {
            if let Ok(minutes) = val.parse() {
                self.jwt.access_token_expire_minutes = minutes;
            }
        }

        // Storage overrides
        if let Ok(val) = env::var("PV_CONF_STORAGE_BASE_PATH") {
            self.storage.base_path = val;
        }
        if let Ok(val) = env::var("PV_CONF_STORAGE_CHUNK_SIZE") {
            if let Ok(size) = val.parse() {
                self.storage.chunk_size = size;
            }
        }
        if let Ok(val) = env::var("PV_CONF_STORAGE_MAX_UPLOAD_SIZE") {
            if let Ok(size) = val.parse() {
                self.storage.max_upload_size = size;
            }
        }
        if let Ok(val) = env::var("PV_CONF_STORAGE_ALLOWED_TYPES") {
            self.storage.allowed_types = val
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect();
        }
        if let Ok(val) = env::var("PV_CONF_STORAGE_ALLOW_PUBLIC_VIEW") {
            if let Ok(v) = val.parse() {
                self.storage.allow_public_view = v;
            }
        }
    }

    /// Ensure a strong JWT secret is configured and persisted
    fn ensure_jwt_secret(&mut self) -> anyhow::Result<()> {
        if self.jwt.secret == default_jwt_secret() || self.jwt.secret.is_empty() {
            let secret_path = Path::new("data/.jwt_secret");

            if secret_path.exists() {
                let secret = fs::read_to_string(secret_path)?;
                self.jwt.secret = secret.trim().to_string();
                tracing::info!("Loaded persisted JWT secret from data/.jwt_secret");
            } else {
                let secret = uuid::Uuid::new_v4().to_string();

                if let Some(parent) = secret_path.parent() {
                    fs::create_dir_all(parent)?;
                }

                fs::write(secret_path, &secret)?;
                self.jwt.secret = secret;
                tracing::info!("Generated and persisted new JWT secret to data/.jwt_secret");
            }
        }
        Ok(())
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        if let Some(parent) = Path::new(&self.database.path).parent() {
            fs::create_dir_all(parent)?;
        }

        fs::create_dir_all(&self.storage.base_path)?;

        Ok(())
    }
}
