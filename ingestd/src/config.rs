//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `INGESTD_CONFIG`
//! environment variable. A missing file is not an error: every field has a default.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `INGESTD_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `INGESTD_UPLOADS__UPLOAD_DIRECTORY=/srv/uploads` sets the `uploads.upload_directory` field.
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! INGESTD_PORT=8080
//!
//! # Store uploads somewhere durable
//! INGESTD_UPLOADS__UPLOAD_DIRECTORY=/var/lib/ingestd/uploads
//!
//! # Reject files above 5 MiB
//! INGESTD_LIMITS__FILES__MAX_FILE_SIZE=5242880
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "INGESTD_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Where and how uploaded files are stored
    pub uploads: UploadsConfig,
    /// Resource limits for protecting system capacity
    pub limits: LimitsConfig,
    /// Expose Prometheus metrics at `/internal/metrics`
    pub enable_metrics: bool,
    /// Log output format
    pub log_format: LogFormat,
}

/// Upload storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadsConfig {
    /// Directory that receives accepted files. Created on first upload if absent.
    pub upload_directory: PathBuf,
    /// Declared content types must start with this prefix to be accepted
    pub allowed_prefix: String,
    /// URL path under which stored files are served back
    pub public_path: String,
    /// How a request with a mix of accepted and refused files is treated
    pub policy: UploadPolicy,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            upload_directory: PathBuf::from("./uploads"),
            allowed_prefix: "image/".to_string(),
            public_path: "/uploads".to_string(),
            policy: UploadPolicy::default(),
        }
    }
}

/// Outcome policy for multi-file requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPolicy {
    /// Each file is accepted or refused on its own; stored files are kept
    #[default]
    Partial,
    /// The first refused file fails the request and removes files already stored for it
    AllOrNothing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Resource limits for protecting system capacity.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// File limits (size, count per request, and upload concurrency)
    pub files: FileLimitsConfig,
}

/// File limits configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileLimitsConfig {
    /// Maximum size of a single file in bytes.
    /// Set to 0 for unlimited (not recommended for production).
    /// Default: 10MB
    pub max_file_size: u64,
    /// Maximum size of a whole request body in bytes.
    /// Set to 0 for unlimited (not recommended for production).
    /// Default: 50MB
    pub max_request_size: u64,
    /// Maximum number of file parts in one request.
    /// Set to 0 for unlimited.
    /// Default: 10
    pub max_files_per_request: usize,
    /// Maximum number of concurrent upload requests allowed system-wide.
    /// Set to 0 for unlimited.
    /// Default: 0 (unlimited)
    pub max_concurrent_uploads: usize,
    /// Maximum number of uploads that can wait in queue for a slot.
    /// When this limit is reached, new uploads receive HTTP 429 immediately.
    /// Set to 0 for unlimited waiting queue.
    /// Default: 20
    pub max_waiting_uploads: usize,
    /// Maximum time in seconds to wait for an upload slot before returning HTTP 429.
    /// Set to 0 to reject immediately when no slot is available.
    /// Default: 30
    pub max_upload_wait_secs: u64,
}

impl Default for FileLimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,    // 10MB
            max_request_size: 50 * 1024 * 1024, // 50MB
            max_files_per_request: 10,
            max_concurrent_uploads: 0,
            max_waiting_uploads: 20,
            max_upload_wait_secs: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            uploads: UploadsConfig::default(),
            limits: LimitsConfig::default(),
            enable_metrics: false,
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.uploads.upload_directory.as_os_str().is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: uploads.upload_directory cannot be empty".to_string(),
            });
        }

        if self.uploads.allowed_prefix.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: uploads.allowed_prefix cannot be empty; it would accept every content type".to_string(),
            });
        }

        if !self.uploads.public_path.starts_with('/') || self.uploads.public_path.ends_with('/') {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: uploads.public_path must be an absolute sub-path without trailing slash such as '/uploads', got '{}'",
                    self.uploads.public_path
                ),
            });
        }

        let files = &self.limits.files;
        if files.max_file_size > 0 && files.max_request_size > 0 && files.max_file_size > files.max_request_size {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: limits.files.max_file_size ({}) cannot be greater than max_request_size ({})",
                    files.max_file_size, files.max_request_size
                ),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables override specific values
            // INGESTD_CONFIG names the file itself, it is not a config key
            .merge(Env::prefixed("INGESTD_").ignore(&["config"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
