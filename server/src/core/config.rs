use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::quality::Statistic;
use crate::domain::records::RecordFormat;
use crate::utils::file::expand_path;
use crate::utils::retry::RetryPolicy;

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_ACTIVE_FILE, DEFAULT_ANOMALY_WINDOW,
    DEFAULT_CRITICAL_Z, DEFAULT_DAILY_LATENESS_MINUTES, DEFAULT_DAILY_TTL_DAYS,
    DEFAULT_DECODE_BATCH_SIZE, DEFAULT_GAP_WINDOW_HOURS, DEFAULT_GRACE_MINUTES, DEFAULT_HOST,
    DEFAULT_HOURLY_LATENESS_MINUTES, DEFAULT_HOURLY_TTL_HOURS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_PORT, DEFAULT_QUALITY_INTERVAL_SECS, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_RESCAN_INTERVAL_SECS, DEFAULT_SNAPSHOT_INTERVAL_SECS, DEFAULT_STALENESS_MINUTES,
    DEFAULT_SWEEP_INTERVAL_SECS, DEFAULT_UPLOAD_ATTEMPT_TIMEOUT_SECS,
    DEFAULT_UPLOAD_BASE_DELAY_MS, DEFAULT_UPLOAD_CONCURRENCY, DEFAULT_UPLOAD_MAX_ATTEMPTS,
    DEFAULT_UPLOAD_MAX_DELAY_MS, DEFAULT_UPLOAD_PREFIX, DEFAULT_WARNING_Z,
};

// =============================================================================
// Object Backend Enum
// =============================================================================

/// Object storage backend for uploaded partitions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectBackend {
    #[default]
    Filesystem,
    S3,
}

impl fmt::Display for ObjectBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectBackend::Filesystem => write!(f, "filesystem"),
            ObjectBackend::S3 => write!(f, "s3"),
        }
    }
}

// =============================================================================
// File Config Structs (JSON deserialization)
// =============================================================================

/// Server configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Buffer directory configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct BufferFileConfig {
    pub dir: Option<String>,
    pub active_file: Option<String>,
    pub format: Option<RecordFormat>,
    pub poll_interval_ms: Option<u64>,
    pub rescan_interval_secs: Option<u64>,
    pub decode_batch_size: Option<usize>,
}

/// Filesystem object store configuration
#[derive(Debug, Default, Clone, Deserialize)]
pub struct UploadFilesystemFileConfig {
    pub path: Option<String>,
}

/// S3 object store configuration
#[derive(Debug, Default, Clone, Deserialize)]
pub struct UploadS3FileConfig {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

/// Upload configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct UploadFileConfig {
    pub backend: Option<ObjectBackend>,
    pub prefix: Option<String>,
    pub filesystem: Option<UploadFilesystemFileConfig>,
    pub s3: Option<UploadS3FileConfig>,
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub attempt_timeout_secs: Option<u64>,
    pub concurrency: Option<usize>,
    pub queue_capacity: Option<usize>,
}

/// Rollup configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RollupFileConfig {
    pub hourly_ttl_hours: Option<u64>,
    pub daily_ttl_days: Option<u64>,
    pub hourly_lateness_minutes: Option<u64>,
    pub daily_lateness_minutes: Option<u64>,
    pub grace_minutes: Option<u64>,
    pub dimensions: Option<Vec<Vec<String>>>,
    pub sweep_interval_secs: Option<u64>,
    pub snapshot_interval_secs: Option<u64>,
}

/// Quality monitor configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct QualityFileConfig {
    pub interval_secs: Option<u64>,
    pub gap_window_hours: Option<u32>,
    pub staleness_minutes: Option<u64>,
    pub anomaly_window: Option<usize>,
    pub warning_z: Option<f64>,
    pub critical_z: Option<f64>,
    pub statistic: Option<Statistic>,
    pub expected_entities: Option<Vec<String>>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub server: Option<ServerFileConfig>,
    pub buffer: Option<BufferFileConfig>,
    pub upload: Option<UploadFileConfig>,
    pub rollup: Option<RollupFileConfig>,
    pub quality: Option<QualityFileConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// Replace `current` with `other` when `other` is set
fn overlay<T: fmt::Debug>(current: &mut Option<T>, other: Option<T>, field: &str) {
    if other.is_some() {
        tracing::trace!(field, value = ?other, "Merging config field");
        *current = other;
    }
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::trace!(config = ?config, "Parsed config file");
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }

    /// Merge another FileConfig into this one (other takes precedence)
    fn merge(&mut self, other: FileConfig) {
        if let Some(server) = other.server {
            let current = self.server.get_or_insert_with(ServerFileConfig::default);
            overlay(&mut current.host, server.host, "server.host");
            overlay(&mut current.port, server.port, "server.port");
        }

        if let Some(buffer) = other.buffer {
            let current = self.buffer.get_or_insert_with(BufferFileConfig::default);
            overlay(&mut current.dir, buffer.dir, "buffer.dir");
            overlay(&mut current.active_file, buffer.active_file, "buffer.active_file");
            overlay(&mut current.format, buffer.format, "buffer.format");
            overlay(
                &mut current.poll_interval_ms,
                buffer.poll_interval_ms,
                "buffer.poll_interval_ms",
            );
            overlay(
                &mut current.rescan_interval_secs,
                buffer.rescan_interval_secs,
                "buffer.rescan_interval_secs",
            );
            overlay(
                &mut current.decode_batch_size,
                buffer.decode_batch_size,
                "buffer.decode_batch_size",
            );
        }

        if let Some(upload) = other.upload {
            let current = self.upload.get_or_insert_with(UploadFileConfig::default);
            overlay(&mut current.backend, upload.backend, "upload.backend");
            overlay(&mut current.prefix, upload.prefix, "upload.prefix");
            if let Some(fs_config) = upload.filesystem {
                let current_fs = current
                    .filesystem
                    .get_or_insert_with(UploadFilesystemFileConfig::default);
                overlay(&mut current_fs.path, fs_config.path, "upload.filesystem.path");
            }
            if let Some(s3) = upload.s3 {
                let current_s3 = current.s3.get_or_insert_with(UploadS3FileConfig::default);
                overlay(&mut current_s3.bucket, s3.bucket, "upload.s3.bucket");
                overlay(&mut current_s3.region, s3.region, "upload.s3.region");
                overlay(&mut current_s3.endpoint, s3.endpoint, "upload.s3.endpoint");
                if s3.access_key_id.is_some() {
                    tracing::trace!("Merging upload.s3.access_key_id");
                    current_s3.access_key_id = s3.access_key_id;
                }
                if s3.secret_access_key.is_some() {
                    tracing::trace!("Merging upload.s3.secret_access_key");
                    current_s3.secret_access_key = s3.secret_access_key;
                }
            }
            overlay(&mut current.max_attempts, upload.max_attempts, "upload.max_attempts");
            overlay(&mut current.base_delay_ms, upload.base_delay_ms, "upload.base_delay_ms");
            overlay(&mut current.max_delay_ms, upload.max_delay_ms, "upload.max_delay_ms");
            overlay(
                &mut current.attempt_timeout_secs,
                upload.attempt_timeout_secs,
                "upload.attempt_timeout_secs",
            );
            overlay(&mut current.concurrency, upload.concurrency, "upload.concurrency");
            overlay(
                &mut current.queue_capacity,
                upload.queue_capacity,
                "upload.queue_capacity",
            );
        }

        if let Some(rollup) = other.rollup {
            let current = self.rollup.get_or_insert_with(RollupFileConfig::default);
            overlay(
                &mut current.hourly_ttl_hours,
                rollup.hourly_ttl_hours,
                "rollup.hourly_ttl_hours",
            );
            overlay(
                &mut current.daily_ttl_days,
                rollup.daily_ttl_days,
                "rollup.daily_ttl_days",
            );
            overlay(
                &mut current.hourly_lateness_minutes,
                rollup.hourly_lateness_minutes,
                "rollup.hourly_lateness_minutes",
            );
            overlay(
                &mut current.daily_lateness_minutes,
                rollup.daily_lateness_minutes,
                "rollup.daily_lateness_minutes",
            );
            overlay(&mut current.grace_minutes, rollup.grace_minutes, "rollup.grace_minutes");
            overlay(&mut current.dimensions, rollup.dimensions, "rollup.dimensions");
            overlay(
                &mut current.sweep_interval_secs,
                rollup.sweep_interval_secs,
                "rollup.sweep_interval_secs",
            );
            overlay(
                &mut current.snapshot_interval_secs,
                rollup.snapshot_interval_secs,
                "rollup.snapshot_interval_secs",
            );
        }

        if let Some(quality) = other.quality {
            let current = self.quality.get_or_insert_with(QualityFileConfig::default);
            overlay(&mut current.interval_secs, quality.interval_secs, "quality.interval_secs");
            overlay(
                &mut current.gap_window_hours,
                quality.gap_window_hours,
                "quality.gap_window_hours",
            );
            overlay(
                &mut current.staleness_minutes,
                quality.staleness_minutes,
                "quality.staleness_minutes",
            );
            overlay(
                &mut current.anomaly_window,
                quality.anomaly_window,
                "quality.anomaly_window",
            );
            overlay(&mut current.warning_z, quality.warning_z, "quality.warning_z");
            overlay(&mut current.critical_z, quality.critical_z, "quality.critical_z");
            overlay(&mut current.statistic, quality.statistic, "quality.statistic");
            overlay(
                &mut current.expected_entities,
                quality.expected_entities,
                "quality.expected_entities",
            );
        }
    }
}

// =============================================================================
// Resolved Config Structs
// =============================================================================

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct BufferConfig {
    pub dir: PathBuf,
    pub active_file: String,
    pub format: RecordFormat,
    pub poll_interval: Duration,
    pub rescan_interval: Duration,
    pub decode_batch_size: usize,
}

#[derive(Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id.as_ref().map(|_| "***"))
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "***"),
            )
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub backend: ObjectBackend,
    pub prefix: String,
    pub filesystem_path: Option<String>,
    pub s3: Option<S3Config>,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
    pub concurrency: usize,
    pub queue_capacity: usize,
}

impl UploadConfig {
    /// Backoff policy for partition uploads
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            attempt_timeout: Some(self.attempt_timeout),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RollupConfig {
    pub hourly_ttl: Duration,
    pub daily_ttl: Duration,
    pub hourly_lateness: Duration,
    pub daily_lateness: Duration,
    pub grace: Duration,
    /// Label-key sets each record is rolled up by; `[]` is the entity-wide row
    pub dimensions: Vec<Vec<String>>,
    pub sweep_interval: Duration,
    pub snapshot_interval: Duration,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            hourly_ttl: Duration::from_secs(DEFAULT_HOURLY_TTL_HOURS * 3600),
            daily_ttl: Duration::from_secs(DEFAULT_DAILY_TTL_DAYS * 86_400),
            hourly_lateness: Duration::from_secs(DEFAULT_HOURLY_LATENESS_MINUTES * 60),
            daily_lateness: Duration::from_secs(DEFAULT_DAILY_LATENESS_MINUTES * 60),
            grace: Duration::from_secs(DEFAULT_GRACE_MINUTES * 60),
            dimensions: vec![Vec::new()],
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            snapshot_interval: Duration::from_secs(DEFAULT_SNAPSHOT_INTERVAL_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QualityConfig {
    pub interval: Duration,
    pub gap_window_hours: u32,
    pub staleness: Duration,
    pub anomaly_window: usize,
    pub warning_z: f64,
    pub critical_z: f64,
    pub statistic: Statistic,
    /// Entities expected to report every hour; empty means every entity seen
    pub expected_entities: Vec<String>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_QUALITY_INTERVAL_SECS),
            gap_window_hours: DEFAULT_GAP_WINDOW_HOURS,
            staleness: Duration::from_secs(DEFAULT_STALENESS_MINUTES * 60),
            anomaly_window: DEFAULT_ANOMALY_WINDOW,
            warning_z: DEFAULT_WARNING_Z,
            critical_z: DEFAULT_CRITICAL_Z,
            statistic: Statistic::default(),
            expected_entities: Vec::new(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub buffer: BufferConfig,
    pub upload: UploadConfig,
    pub rollup: RollupConfig,
    pub quality: QualityConfig,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Profile directory config (~/.coldpath/coldpath.json)
    /// 3. Local directory config OR CLI-specified config path
    /// 4. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");
        tracing::trace!(cli = ?cli, "CLI config");

        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        // 1. Load from profile dir (~/.coldpath/coldpath.json) - skip if not exists
        if let Some(profile_path) = get_profile_config_path()
            && profile_path.exists()
        {
            let profile_config = FileConfig::load_from_file(&profile_path)?;
            profile_config.warn_unknown_fields();
            file_config.merge(profile_config);
            found_configs.push(profile_path.display().to_string());
        }

        // 2. Load from CLI-specified path OR local directory
        let overlay_path = if let Some(ref path) = cli.config {
            let expanded = expand_path(&path.to_string_lossy());
            if !expanded.exists() {
                anyhow::bail!("Config file not found: {}", expanded.display());
            }
            Some(expanded)
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            let overlay_config = FileConfig::load_from_file(&path)?;
            overlay_config.warn_unknown_fields();
            file_config.merge(overlay_config);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        let config = Self::resolve(cli, file_config);
        config.validate()?;

        tracing::debug!(
            host = %config.server.host,
            port = config.server.port,
            buffer_dir = %config.buffer.dir.display(),
            active_file = %config.buffer.active_file,
            upload_backend = %config.upload.backend,
            upload_prefix = %config.upload.prefix,
            max_attempts = config.upload.max_attempts,
            hourly_ttl_secs = config.rollup.hourly_ttl.as_secs(),
            daily_ttl_secs = config.rollup.daily_ttl.as_secs(),
            dimensions = ?config.rollup.dimensions,
            statistic = %config.quality.statistic,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Layer defaults -> file config -> CLI/env overrides
    fn resolve(cli: &CliConfig, file_config: FileConfig) -> Self {
        let file_server = file_config.server.unwrap_or_default();
        let file_buffer = file_config.buffer.unwrap_or_default();
        let file_upload = file_config.upload.unwrap_or_default();
        let file_rollup = file_config.rollup.unwrap_or_default();
        let file_quality = file_config.quality.unwrap_or_default();

        let host = cli
            .host
            .clone()
            .or(file_server.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = cli.port.or(file_server.port).unwrap_or(DEFAULT_PORT);

        let buffer = BufferConfig {
            dir: cli
                .buffer_dir
                .clone()
                .or(file_buffer.dir)
                .map(|d| expand_path(&d))
                .unwrap_or_default(),
            active_file: cli
                .active_file
                .clone()
                .or(file_buffer.active_file)
                .unwrap_or_else(|| DEFAULT_ACTIVE_FILE.to_string()),
            format: cli.buffer_format.or(file_buffer.format).unwrap_or_default(),
            poll_interval: Duration::from_millis(
                file_buffer
                    .poll_interval_ms
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            rescan_interval: Duration::from_secs(
                file_buffer
                    .rescan_interval_secs
                    .unwrap_or(DEFAULT_RESCAN_INTERVAL_SECS),
            ),
            decode_batch_size: file_buffer
                .decode_batch_size
                .unwrap_or(DEFAULT_DECODE_BATCH_SIZE),
        };

        // upload config: CLI/env overrides file config
        let backend = cli.upload_backend.or(file_upload.backend).unwrap_or_default();
        let file_s3 = file_upload.s3.unwrap_or_default();
        let s3 = cli
            .s3_bucket
            .clone()
            .or(file_s3.bucket)
            .filter(|b| !b.is_empty())
            .map(|bucket| S3Config {
                bucket,
                region: cli.s3_region.clone().or(file_s3.region),
                endpoint: cli.s3_endpoint.clone().or(file_s3.endpoint),
                access_key_id: file_s3.access_key_id,
                secret_access_key: file_s3.secret_access_key,
            });

        let upload = UploadConfig {
            backend,
            prefix: cli
                .upload_prefix
                .clone()
                .or(file_upload.prefix)
                .unwrap_or_else(|| DEFAULT_UPLOAD_PREFIX.to_string())
                .trim_matches('/')
                .to_string(),
            filesystem_path: file_upload.filesystem.and_then(|fs| fs.path),
            s3,
            max_attempts: file_upload
                .max_attempts
                .unwrap_or(DEFAULT_UPLOAD_MAX_ATTEMPTS),
            base_delay: Duration::from_millis(
                file_upload
                    .base_delay_ms
                    .unwrap_or(DEFAULT_UPLOAD_BASE_DELAY_MS),
            ),
            max_delay: Duration::from_millis(
                file_upload
                    .max_delay_ms
                    .unwrap_or(DEFAULT_UPLOAD_MAX_DELAY_MS),
            ),
            attempt_timeout: Duration::from_secs(
                file_upload
                    .attempt_timeout_secs
                    .unwrap_or(DEFAULT_UPLOAD_ATTEMPT_TIMEOUT_SECS),
            ),
            concurrency: file_upload
                .concurrency
                .unwrap_or(DEFAULT_UPLOAD_CONCURRENCY),
            queue_capacity: file_upload
                .queue_capacity
                .unwrap_or(DEFAULT_QUEUE_CAPACITY),
        };

        let defaults = RollupConfig::default();
        let rollup = RollupConfig {
            hourly_ttl: file_rollup
                .hourly_ttl_hours
                .map(|h| Duration::from_secs(h * 3600))
                .unwrap_or(defaults.hourly_ttl),
            daily_ttl: file_rollup
                .daily_ttl_days
                .map(|d| Duration::from_secs(d * 86_400))
                .unwrap_or(defaults.daily_ttl),
            hourly_lateness: file_rollup
                .hourly_lateness_minutes
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(defaults.hourly_lateness),
            daily_lateness: file_rollup
                .daily_lateness_minutes
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(defaults.daily_lateness),
            grace: file_rollup
                .grace_minutes
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(defaults.grace),
            dimensions: file_rollup
                .dimensions
                .filter(|d| !d.is_empty())
                .unwrap_or(defaults.dimensions),
            sweep_interval: file_rollup
                .sweep_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            snapshot_interval: file_rollup
                .snapshot_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.snapshot_interval),
        };

        let defaults = QualityConfig::default();
        let quality = QualityConfig {
            interval: file_quality
                .interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            gap_window_hours: file_quality
                .gap_window_hours
                .unwrap_or(defaults.gap_window_hours),
            staleness: file_quality
                .staleness_minutes
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(defaults.staleness),
            anomaly_window: file_quality
                .anomaly_window
                .unwrap_or(defaults.anomaly_window),
            warning_z: file_quality.warning_z.unwrap_or(defaults.warning_z),
            critical_z: file_quality.critical_z.unwrap_or(defaults.critical_z),
            statistic: file_quality.statistic.unwrap_or(defaults.statistic),
            expected_entities: file_quality.expected_entities.unwrap_or_default(),
        };

        Self {
            server: ServerConfig { host, port },
            buffer,
            upload,
            rollup,
            quality,
        }
    }

    /// Validate the configuration for consistency and correctness
    fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            anyhow::bail!("Configuration error: server.host must not be empty");
        }

        // Port must be non-zero (port 0 would cause bind failure)
        if self.server.port == 0 {
            anyhow::bail!("Configuration error: server.port must be greater than 0");
        }

        if self.buffer.dir.as_os_str().is_empty() {
            anyhow::bail!(
                "Configuration error: buffer.dir is required. \
                 Set via --buffer-dir, COLDPATH_BUFFER_DIR or buffer.dir in config file."
            );
        }
        if self.buffer.active_file.is_empty() {
            anyhow::bail!("Configuration error: buffer.active_file must not be empty");
        }
        if self.buffer.decode_batch_size == 0 {
            anyhow::bail!("Configuration error: buffer.decode_batch_size must be greater than 0");
        }
        if self.buffer.poll_interval.is_zero() || self.buffer.rescan_interval.is_zero() {
            anyhow::bail!("Configuration error: buffer poll and rescan intervals must be non-zero");
        }

        // S3 bucket required when using S3 storage
        if self.upload.backend == ObjectBackend::S3 && self.upload.s3.is_none() {
            anyhow::bail!(
                "Configuration error: upload.s3.bucket is required (and non-empty) when upload.backend is 's3'"
            );
        }
        if let Some(ref s3) = self.upload.s3
            && s3.access_key_id.is_some() != s3.secret_access_key.is_some()
        {
            anyhow::bail!(
                "Configuration error: upload.s3.access_key_id and upload.s3.secret_access_key must be set together"
            );
        }
        if self.upload.max_attempts == 0 {
            anyhow::bail!("Configuration error: upload.max_attempts must be at least 1");
        }
        if self.upload.concurrency == 0 || self.upload.queue_capacity == 0 {
            anyhow::bail!(
                "Configuration error: upload.concurrency and upload.queue_capacity must be greater than 0"
            );
        }
        if self.upload.attempt_timeout.is_zero() {
            anyhow::bail!("Configuration error: upload.attempt_timeout_secs must be greater than 0");
        }

        // Daily rows are re-derived from hourly rows, so every hour of a day
        // that can still change must still be present
        let min_hourly_ttl = Duration::from_secs(86_400) + self.rollup.hourly_lateness;
        if self.rollup.hourly_ttl < min_hourly_ttl {
            anyhow::bail!(
                "Configuration error: rollup.hourly_ttl_hours ({}h) must cover one day plus the hourly lateness tolerance ({}m)",
                self.rollup.hourly_ttl.as_secs() / 3600,
                self.rollup.hourly_lateness.as_secs() / 60
            );
        }
        // The last hour of a day closes with the day; a late fold it still
        // accepts must also reach the daily row
        if self.rollup.daily_lateness < self.rollup.hourly_lateness {
            anyhow::bail!(
                "Configuration error: rollup.daily_lateness_minutes ({}m) must not be shorter than rollup.hourly_lateness_minutes ({}m)",
                self.rollup.daily_lateness.as_secs() / 60,
                self.rollup.hourly_lateness.as_secs() / 60
            );
        }
        if self.rollup.daily_ttl.is_zero() {
            anyhow::bail!("Configuration error: rollup.daily_ttl_days must be greater than 0");
        }
        if self.rollup.sweep_interval.is_zero() || self.rollup.snapshot_interval.is_zero() {
            anyhow::bail!(
                "Configuration error: rollup sweep and snapshot intervals must be non-zero"
            );
        }

        let q = &self.quality;
        if !(q.warning_z.is_finite() && q.critical_z.is_finite()) || q.warning_z <= 0.0 {
            anyhow::bail!("Configuration error: quality z-score thresholds must be positive numbers");
        }
        if q.warning_z >= q.critical_z {
            anyhow::bail!(
                "Configuration error: quality.warning_z ({}) must be lower than quality.critical_z ({})",
                q.warning_z,
                q.critical_z
            );
        }
        if q.anomaly_window < 2 {
            anyhow::bail!("Configuration error: quality.anomaly_window must be at least 2");
        }
        if q.gap_window_hours == 0 {
            anyhow::bail!("Configuration error: quality.gap_window_hours must be greater than 0");
        }
        if q.interval.is_zero() {
            anyhow::bail!("Configuration error: quality.interval_secs must be greater than 0");
        }

        if self.upload.backend == ObjectBackend::Filesystem
            && self.upload.filesystem_path.is_none()
        {
            tracing::debug!("upload.filesystem.path not set, objects go to the data directory");
        }

        Ok(())
    }
}

/// Get the profile config path (~/.coldpath/coldpath.json)
fn get_profile_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}
