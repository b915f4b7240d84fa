//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `MEDIACTL_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `MEDIACTL_` override YAML values
//! 3. **Deployment variables** - `AWS_ACCESS_KEY`, `AWS_SECRET_KEY`, `AWS_REGION`,
//!    `AWS_S3_BUCKET`, `PREFIX` and `CLIENT_URL` are accepted unprefixed
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `MEDIACTL_STORAGE__BACKEND=s3` sets the `storage.backend` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use mediactl::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port`, `prefix`, `public_url`
//! - **Storage**: `storage.backend`, `storage.bucket`, `storage.s3.*` - where objects are written
//! - **Uploads**: `uploads.max_size_bytes`, `uploads.allowed_types` - the ingestion policy
//! - **Limits**: `limits.uploads.*` upload admission, `limits.max_concurrent_compressions`
//! - **CORS**: `cors.allowed_origins`, `cors.allow_credentials`
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! MEDIACTL_PORT=8080
//!
//! # Write to S3
//! MEDIACTL_STORAGE__BACKEND=s3
//! AWS_S3_BUCKET=my-media
//! AWS_REGION=eu-west-1
//! AWS_ACCESS_KEY=AKIA...
//! AWS_SECRET_KEY=...
//!
//! # Tighten the upload ceiling to 2 MiB
//! MEDIACTL_UPLOADS__MAX_SIZE_BYTES=2097152
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::errors::Error;
use crate::media::ImageKind;

/// SigV4 presigned URLs cannot be valid for longer than this.
const S3_MAX_PRESIGN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Smallest part size S3 accepts for all but the last part of a multipart upload.
const S3_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "MEDIACTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have sensible defaults defined in the `Default` implementation, so an empty file
/// gives a working development server backed by in-memory storage.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Global route prefix for the API (e.g., "/api/v1"). Leading/trailing slashes are normalised.
    pub prefix: String,
    /// Externally reachable base URL of this service. Used to build object URLs for the
    /// in-memory storage backend.
    pub public_url: Url,
    /// Frontend origin, usually set via `CLIENT_URL`. Replaces `cors.allowed_origins` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_url: Option<Url>,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
    /// Object storage backend and bucket settings
    pub storage: StorageConfig,
    /// Upload validation and compression policy
    pub uploads: UploadsConfig,
    /// Resource limits for protecting system capacity
    pub limits: LimitsConfig,
    /// Cross-origin policy for browser clients
    pub cors: CorsConfig,
}

/// Which [`ObjectStore`](crate::storage::ObjectStore) implementation to run with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Any S3-compatible service
    S3,
    /// Process-local map; contents are lost on restart
    #[default]
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Bucket objects are written to unless a caller names another
    pub bucket: String,
    /// Validity of presigned URLs when the caller doesn't ask for a specific TTL
    #[serde(with = "humantime_serde")]
    pub default_url_ttl: Duration,
    /// Longest TTL a caller may request
    #[serde(with = "humantime_serde")]
    pub max_url_ttl: Duration,
    pub s3: S3Config,
    pub memory: MemoryStoreConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            bucket: "media".to_string(),
            default_url_ttl: Duration::from_secs(60 * 60),
            max_url_ttl: S3_MAX_PRESIGN_TTL,
            s3: S3Config::default(),
            memory: MemoryStoreConfig::default(),
        }
    }
}

/// S3 client settings.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct S3Config {
    pub region: String,
    /// Static credentials. When either is unset the SDK's default provider chain is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(skip_serializing)]
    pub secret_access_key: Option<String>,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack, ...)
    pub endpoint_url: Option<String>,
    /// Address buckets as `endpoint/bucket` rather than `bucket.endpoint`
    pub force_path_style: bool,
    /// Total attempts per request under the SDK's standard retry strategy. 1 disables retries.
    pub max_attempts: u32,
    /// Bodies larger than this are sent as a multipart upload
    pub multipart_threshold: u64,
    /// Size of each multipart part (minimum 5 MiB)
    pub part_size: u64,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            endpoint_url: None,
            force_path_style: false,
            max_attempts: 1,
            multipart_threshold: 16 * 1024 * 1024,
            part_size: 8 * 1024 * 1024,
        }
    }
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint_url", &self.endpoint_url)
            .field("force_path_style", &self.force_path_style)
            .field("max_attempts", &self.max_attempts)
            .field("multipart_threshold", &self.multipart_threshold)
            .field("part_size", &self.part_size)
            .finish()
    }
}

#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryStoreConfig {
    /// Key for signing object URLs. A random key is generated at startup when unset.
    #[serde(skip_serializing)]
    pub signing_secret: Option<String>,
}

impl std::fmt::Debug for MemoryStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStoreConfig")
            .field("signing_secret", &self.signing_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Upload validation and compression policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadsConfig {
    /// Stored objects never exceed this many bytes. Larger images are compressed to fit.
    /// Default: 5 MiB
    pub max_size_bytes: u64,
    /// Content types accepted, as detected from the file bytes
    pub allowed_types: Vec<ImageKind>,
    /// Maximum number of files in one bulk upload
    pub max_files: usize,
    /// Maximum size of an upload request body, before compression
    pub max_request_bytes: usize,
    /// Quality (1-100) used when re-encoding JPEGs
    pub jpeg_quality: u8,
    /// Maximum resize/re-encode rounds per image
    pub max_iterations: u32,
    /// Images are never resized narrower than this
    pub min_width: u32,
    /// Delete already-written objects when a bulk upload fails part way through
    pub rollback_partial_batches: bool,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 5 * 1024 * 1024,
            allowed_types: vec![ImageKind::Jpeg, ImageKind::Png],
            max_files: 10,
            max_request_bytes: 100 * 1024 * 1024,
            jpeg_quality: 85,
            max_iterations: 10,
            min_width: 16,
            rollback_partial_batches: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Admission control for the upload endpoints
    pub uploads: UploadLimitsConfig,
    /// Compression jobs allowed on the blocking pool at once, across all requests.
    /// 0 means one per available CPU.
    pub max_concurrent_compressions: usize,
}

/// Admission control for upload requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadLimitsConfig {
    /// Upload requests processed at once. 0 turns admission control off.
    pub max_running: usize,
    /// Requests allowed to queue behind the running ones before new arrivals get 429.
    /// 0 means the queue is unbounded.
    pub max_queued: usize,
    /// How long a queued request waits for a slot before giving up with 429.
    /// Zero rejects as soon as every slot is taken.
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
}

impl Default for UploadLimitsConfig {
    fn default() -> Self {
        Self {
            max_running: 0,
            max_queued: 20,
            max_wait: Duration::from_secs(60),
        }
    }
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
    /// Custom headers to expose to the browser (in addition to CORS-safelisted headers)
    pub exposed_headers: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            allow_credentials: false,
            max_age: Some(3600),
            exposed_headers: vec![],
        }
    }
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            prefix: "/api/v1".to_string(),
            public_url: Url::parse("http://localhost:3001").expect("static URL is valid"),
            client_url: None,
            enable_otel_export: false,
            storage: StorageConfig::default(),
            uploads: UploadsConfig::default(),
            limits: LimitsConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        config.prefix = normalize_prefix(&config.prefix);

        // CLIENT_URL names the one frontend allowed to call us
        if let Some(client_url) = config.client_url.take() {
            config.cors.allowed_origins = vec![CorsOrigin::Url(client_url)];
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if !self.prefix.is_empty() && (!self.prefix.starts_with('/') || self.prefix.ends_with('/')) {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: prefix '{}' must start with '/' and must not end with '/'",
                    self.prefix
                ),
            });
        }

        if self.storage.bucket.trim().is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: storage.bucket cannot be empty. Set AWS_S3_BUCKET or storage.bucket.".to_string(),
            });
        }

        if self.storage.default_url_ttl.is_zero() {
            return Err(Error::Internal {
                operation: "Config validation: storage.default_url_ttl must be positive".to_string(),
            });
        }

        if self.storage.default_url_ttl > self.storage.max_url_ttl {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: storage.default_url_ttl ({}) cannot be greater than storage.max_url_ttl ({})",
                    humantime::format_duration(self.storage.default_url_ttl),
                    humantime::format_duration(self.storage.max_url_ttl)
                ),
            });
        }

        if self.storage.backend == StorageBackend::S3 {
            let s3 = &self.storage.s3;

            if self.storage.max_url_ttl > S3_MAX_PRESIGN_TTL {
                return Err(Error::Internal {
                    operation: "Config validation: storage.max_url_ttl cannot exceed 7 days with the S3 backend".to_string(),
                });
            }

            if s3.access_key_id.is_some() != s3.secret_access_key.is_some() {
                return Err(Error::Internal {
                    operation: "Config validation: storage.s3.access_key_id and storage.s3.secret_access_key must be set together. \
                     Set both AWS_ACCESS_KEY and AWS_SECRET_KEY, or neither to use the default credential chain."
                        .to_string(),
                });
            }

            if s3.max_attempts == 0 {
                return Err(Error::Internal {
                    operation: "Config validation: storage.s3.max_attempts must be at least 1".to_string(),
                });
            }

            if s3.part_size < S3_MIN_PART_SIZE {
                return Err(Error::Internal {
                    operation: format!(
                        "Config validation: storage.s3.part_size ({}) must be at least {S3_MIN_PART_SIZE} bytes",
                        s3.part_size
                    ),
                });
            }
        }

        let uploads = &self.uploads;
        if uploads.max_size_bytes == 0 {
            return Err(Error::Internal {
                operation: "Config validation: uploads.max_size_bytes must be positive".to_string(),
            });
        }

        if uploads.allowed_types.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: uploads.allowed_types cannot be empty".to_string(),
            });
        }

        if uploads.max_files == 0 || uploads.max_request_bytes == 0 {
            return Err(Error::Internal {
                operation: "Config validation: uploads.max_files and uploads.max_request_bytes must be positive".to_string(),
            });
        }

        if !(1..=100).contains(&uploads.jpeg_quality) {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: uploads.jpeg_quality ({}) must be between 1 and 100",
                    uploads.jpeg_quality
                ),
            });
        }

        if uploads.min_width == 0 {
            return Err(Error::Internal {
                operation: "Config validation: uploads.min_width must be at least 1".to_string(),
            });
        }

        // Validate that wildcard is not used with credentials
        let has_wildcard = self.cors.allowed_origins.iter().any(|origin| matches!(origin, CorsOrigin::Wildcard));
        if has_wildcard && self.cors.allow_credentials {
            return Err(Error::Internal {
                operation: "Config validation: CORS cannot use wildcard origin '*' with allow_credentials=true. Specify explicit origins."
                    .to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            // (MEDIACTL_CONFIG is the file path, read by clap)
            .merge(Env::prefixed("MEDIACTL_").ignore(&["config"]).split("__"))
            // Variable names used by existing deployments
            .merge(
                Env::raw()
                    .only(&["AWS_ACCESS_KEY", "AWS_SECRET_KEY", "AWS_REGION", "AWS_S3_BUCKET", "PREFIX", "CLIENT_URL"])
                    .map(|key| {
                        match key.as_str().to_ascii_uppercase().as_str() {
                            "AWS_ACCESS_KEY" => "storage.s3.access_key_id",
                            "AWS_SECRET_KEY" => "storage.s3.secret_access_key",
                            "AWS_REGION" => "storage.s3.region",
                            "AWS_S3_BUCKET" => "storage.bucket",
                            "PREFIX" => "prefix",
                            _ => "client_url",
                        }
                        .into()
                    }),
            )
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Absolute URL of the in-memory backend's object route.
    pub fn object_url_base(&self) -> String {
        format!("{}{}/objects", self.public_url.as_str().trim_end_matches('/'), self.prefix)
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args() -> Args {
        Args {
            config: "test.yaml".to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "")?;

            let config = Config::load(&args())?;

            assert_eq!(config.port, 3001);
            assert_eq!(config.prefix, "/api/v1");
            assert_eq!(config.storage.backend, StorageBackend::Memory);
            assert_eq!(config.storage.default_url_ttl, Duration::from_secs(3600));
            assert_eq!(config.uploads.max_size_bytes, 5 * 1024 * 1024);
            assert_eq!(config.uploads.allowed_types, vec![ImageKind::Jpeg, ImageKind::Png]);
            assert!(!config.uploads.rollback_partial_batches);

            Ok(())
        });
    }

    #[test]
    fn test_yaml_values() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
prefix: /media-api
storage:
  backend: s3
  bucket: uploads
  default_url_ttl: 30m
  max_url_ttl: 2d
  s3:
    region: eu-west-1
    endpoint_url: http://localhost:9000
    force_path_style: true
    max_attempts: 3
uploads:
  max_size_bytes: 1048576
  allowed_types: [image/png]
  rollback_partial_batches: true
limits:
  uploads:
    max_running: 4
    max_wait: 5s
  max_concurrent_compressions: 2
"#,
            )?;

            let config = Config::load(&args())?;

            assert_eq!(config.prefix, "/media-api");
            assert_eq!(config.storage.backend, StorageBackend::S3);
            assert_eq!(config.storage.bucket, "uploads");
            assert_eq!(config.storage.default_url_ttl, Duration::from_secs(30 * 60));
            assert_eq!(config.storage.max_url_ttl, Duration::from_secs(2 * 24 * 60 * 60));
            assert_eq!(config.storage.s3.endpoint_url.as_deref(), Some("http://localhost:9000"));
            assert!(config.storage.s3.force_path_style);
            assert_eq!(config.storage.s3.max_attempts, 3);
            assert_eq!(config.uploads.max_size_bytes, 1024 * 1024);
            assert_eq!(config.uploads.allowed_types, vec![ImageKind::Png]);
            assert!(config.uploads.rollback_partial_batches);
            assert_eq!(config.limits.uploads.max_running, 4);
            assert_eq!(config.limits.uploads.max_queued, 20);
            assert_eq!(config.limits.uploads.max_wait, Duration::from_secs(5));
            assert_eq!(config.limits.max_concurrent_compressions, 2);

            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "port: 4000\n")?;

            jail.set_env("MEDIACTL_CONFIG", "test.yaml");
            jail.set_env("MEDIACTL_HOST", "127.0.0.1");
            jail.set_env("MEDIACTL_UPLOADS__MAX_FILES", "3");
            jail.set_env("MEDIACTL_STORAGE__DEFAULT_URL_TTL", "15m");

            let config = Config::load(&args())?;

            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.port, 4000);
            assert_eq!(config.uploads.max_files, 3);
            assert_eq!(config.storage.default_url_ttl, Duration::from_secs(15 * 60));

            Ok(())
        });
    }

    #[test]
    fn test_deployment_variables() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "storage:\n  backend: s3\n")?;

            jail.set_env("AWS_ACCESS_KEY", "AKIDEXAMPLE");
            jail.set_env("AWS_SECRET_KEY", "secret");
            jail.set_env("AWS_REGION", "ap-southeast-2");
            jail.set_env("AWS_S3_BUCKET", "prod-media");
            jail.set_env("PREFIX", "api/v2/");
            jail.set_env("CLIENT_URL", "https://app.example.com");

            let config = Config::load(&args())?;

            assert_eq!(config.storage.s3.access_key_id.as_deref(), Some("AKIDEXAMPLE"));
            assert_eq!(config.storage.s3.secret_access_key.as_deref(), Some("secret"));
            assert_eq!(config.storage.s3.region, "ap-southeast-2");
            assert_eq!(config.storage.bucket, "prod-media");
            assert_eq!(config.prefix, "/api/v2");
            assert!(config.client_url.is_none());
            match config.cors.allowed_origins.as_slice() {
                [CorsOrigin::Url(url)] => assert_eq!(url.as_str(), "https://app.example.com/"),
                other => panic!("unexpected origins: {other:?}"),
            }

            Ok(())
        });
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let mut config = Config::default();
        config.storage.s3.access_key_id = Some("AKIDEXAMPLE".to_string());
        config.storage.s3.secret_access_key = Some("wJalrXUtnFEMI".to_string());
        config.storage.memory.signing_secret = Some("hmac-key-0042".to_string());

        let printed = format!("{config:#?}");
        assert!(!printed.contains("wJalrXUtnFEMI"));
        assert!(!printed.contains("hmac-key-0042"));
        assert!(printed.contains("AKIDEXAMPLE"));
        assert_eq!(printed.matches("<redacted>").count(), 2);

        // Unset secrets stay visibly unset
        let printed = format!("{:?}", Config::default());
        assert!(!printed.contains("<redacted>"));
        assert!(printed.contains("secret_access_key: None"));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "uploads:\n  max_size: 10\n")?;
            assert!(Config::load(&args()).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_half_configured_credentials_rejected() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::S3;
        config.storage.s3.access_key_id = Some("AKIDEXAMPLE".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must be set together"));

        // The memory backend ignores S3 settings entirely
        config.storage.backend = StorageBackend::Memory;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ttl_ordering() {
        let mut config = Config::default();
        config.storage.default_url_ttl = Duration::from_secs(3 * 24 * 60 * 60);
        config.storage.max_url_ttl = Duration::from_secs(24 * 60 * 60);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.storage.backend = StorageBackend::S3;
        config.storage.max_url_ttl = Duration::from_secs(8 * 24 * 60 * 60);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upload_policy_validation() {
        let mut config = Config::default();
        config.uploads.allowed_types.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.uploads.jpeg_quality = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.uploads.max_size_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wildcard_with_credentials_rejected() {
        let mut config = Config::default();
        config.cors.allow_credentials = true;
        assert!(config.validate().is_err());

        config.cors.allowed_origins = vec![CorsOrigin::Url(Url::parse("https://app.example.com").unwrap())];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_prefix_normalisation() {
        assert_eq!(normalize_prefix("/api/v1"), "/api/v1");
        assert_eq!(normalize_prefix("api/v1/"), "/api/v1");
        assert_eq!(normalize_prefix("/"), "");
        assert_eq!(normalize_prefix(""), "");
    }

    #[test]
    fn test_object_url_base() {
        let mut config = Config::default();
        config.public_url = Url::parse("https://media.example.com/").unwrap();
        assert_eq!(config.object_url_base(), "https://media.example.com/api/v1/objects");

        config.prefix = String::new();
        assert_eq!(config.object_url_base(), "https://media.example.com/objects");
    }
}
