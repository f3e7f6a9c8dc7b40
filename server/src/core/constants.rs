// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display and platform directories)
pub const APP_NAME: &str = "Coldpath";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".coldpath";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "coldpath.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "COLDPATH_CONFIG";

// =============================================================================
// Environment Variables - Server
// =============================================================================

/// Environment variable for server host
pub const ENV_HOST: &str = "COLDPATH_HOST";

/// Environment variable for server port
pub const ENV_PORT: &str = "COLDPATH_PORT";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "COLDPATH_LOG";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 5390;

/// Default log filter when neither COLDPATH_LOG nor RUST_LOG is set
pub const DEFAULT_LOG_FILTER: &str = "info,coldpath=info,coldpath_server=info";

// =============================================================================
// Environment Variables - Storage
// =============================================================================

/// Environment variable to override data directory
pub const ENV_DATA_DIR: &str = "COLDPATH_DATA_DIR";

// =============================================================================
// Buffer Directory
// =============================================================================

/// Environment variable for the buffer directory
pub const ENV_BUFFER_DIR: &str = "COLDPATH_BUFFER_DIR";

/// Environment variable for the active (excluded) file name
pub const ENV_ACTIVE_FILE: &str = "COLDPATH_ACTIVE_FILE";

/// Environment variable for the buffer file encoding
pub const ENV_BUFFER_FORMAT: &str = "COLDPATH_BUFFER_FORMAT";

/// Name of the file the upstream exporter is currently appending to
pub const DEFAULT_ACTIVE_FILE: &str = "metrics.active";

/// Directory poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Full rescan interval in seconds
pub const DEFAULT_RESCAN_INTERVAL_SECS: u64 = 30;

/// Records decoded per bounded batch
pub const DEFAULT_DECODE_BATCH_SIZE: usize = 1024;

// =============================================================================
// Upload
// =============================================================================

/// Environment variable for the object store backend
pub const ENV_UPLOAD_BACKEND: &str = "COLDPATH_UPLOAD_BACKEND";

/// Environment variable for the object key prefix
pub const ENV_UPLOAD_PREFIX: &str = "COLDPATH_UPLOAD_PREFIX";

pub const ENV_S3_BUCKET: &str = "COLDPATH_S3_BUCKET";
pub const ENV_S3_REGION: &str = "COLDPATH_S3_REGION";
pub const ENV_S3_ENDPOINT: &str = "COLDPATH_S3_ENDPOINT";

/// Default object key prefix
pub const DEFAULT_UPLOAD_PREFIX: &str = "metrics";

/// Total upload attempts per partition
pub const DEFAULT_UPLOAD_MAX_ATTEMPTS: u32 = 5;

pub const DEFAULT_UPLOAD_BASE_DELAY_MS: u64 = 200;
pub const DEFAULT_UPLOAD_MAX_DELAY_MS: u64 = 10_000;
pub const DEFAULT_UPLOAD_ATTEMPT_TIMEOUT_SECS: u64 = 30;

/// Partitions of one file uploaded in parallel
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;

/// Capacity of each bounded stage queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Extension of columnar partition objects
pub const OBJECT_EXTENSION: &str = "parquet";

/// Attempts made to reach the object store at start-up
pub const STARTUP_PROBE_ATTEMPTS: u32 = 3;

// =============================================================================
// Rollups
// =============================================================================

pub const DEFAULT_HOURLY_TTL_HOURS: u64 = 168;
pub const DEFAULT_DAILY_TTL_DAYS: u64 = 90;
pub const DEFAULT_HOURLY_LATENESS_MINUTES: u64 = 60;
pub const DEFAULT_DAILY_LATENESS_MINUTES: u64 = 1440;
pub const DEFAULT_GRACE_MINUTES: u64 = 5;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_SNAPSHOT_INTERVAL_SECS: u64 = 60;

/// Relative accuracy of the quantile sketch (1%)
pub const SKETCH_RELATIVE_ACCURACY: f64 = 0.01;

// =============================================================================
// Quality Monitor
// =============================================================================

pub const DEFAULT_QUALITY_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_GAP_WINDOW_HOURS: u32 = 24;
pub const DEFAULT_STALENESS_MINUTES: u64 = 120;
pub const DEFAULT_ANOMALY_WINDOW: usize = 30;
pub const DEFAULT_WARNING_Z: f64 = 2.0;
pub const DEFAULT_CRITICAL_Z: f64 = 3.0;

// =============================================================================
// State Files
// =============================================================================

/// Append-only upload ledger (JSON lines)
pub const LEDGER_FILE_NAME: &str = "ledger.jsonl";

/// Rollup rows plus fold records (MessagePack)
pub const ROLLUP_SNAPSHOT_FILE_NAME: &str = "rollups.snapshot";

// =============================================================================
// Shutdown
// =============================================================================

/// Time registered tasks get to finish after shutdown is triggered
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;
