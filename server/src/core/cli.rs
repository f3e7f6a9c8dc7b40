use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::config::ObjectBackend;
use super::constants::{
    ENV_ACTIVE_FILE, ENV_BUFFER_DIR, ENV_BUFFER_FORMAT, ENV_CONFIG, ENV_HOST, ENV_PORT,
    ENV_S3_BUCKET, ENV_S3_ENDPOINT, ENV_S3_REGION, ENV_UPLOAD_BACKEND, ENV_UPLOAD_PREFIX,
};
use crate::domain::records::RecordFormat;

#[derive(Parser)]
#[command(name = "coldpath")]
#[command(version, about = "Cold-path metrics pipeline", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server host address
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Directory the upstream exporter rotates metric files into
    #[arg(long, short = 'b', global = true, env = ENV_BUFFER_DIR)]
    pub buffer_dir: Option<String>,

    /// Name of the file currently being written (never processed)
    #[arg(long, global = true, env = ENV_ACTIVE_FILE)]
    pub active_file: Option<String>,

    /// Encoding of rotated files (ndjson or length-delimited)
    #[arg(long, global = true, env = ENV_BUFFER_FORMAT, value_parser = parse_record_format)]
    pub buffer_format: Option<RecordFormat>,

    /// Object store backend (filesystem or s3)
    #[arg(long, global = true, env = ENV_UPLOAD_BACKEND, value_parser = parse_object_backend)]
    pub upload_backend: Option<ObjectBackend>,

    /// Key prefix for uploaded partition objects
    #[arg(long, global = true, env = ENV_UPLOAD_PREFIX)]
    pub upload_prefix: Option<String>,

    /// S3 bucket (when using the s3 backend)
    #[arg(long, global = true, env = ENV_S3_BUCKET)]
    pub s3_bucket: Option<String>,

    /// S3 region
    #[arg(long, global = true, env = ENV_S3_REGION)]
    pub s3_region: Option<String>,

    /// Custom S3-compatible endpoint URL
    #[arg(long, global = true, env = ENV_S3_ENDPOINT)]
    pub s3_endpoint: Option<String>,
}

/// Parse object store backend from CLI/env string
fn parse_object_backend(s: &str) -> Result<ObjectBackend, String> {
    match s.to_lowercase().as_str() {
        "filesystem" | "fs" => Ok(ObjectBackend::Filesystem),
        "s3" => Ok(ObjectBackend::S3),
        _ => Err(format!(
            "Invalid upload backend '{}'. Valid options: filesystem, s3",
            s
        )),
    }
}

/// Parse buffer file encoding from CLI/env string
fn parse_record_format(s: &str) -> Result<RecordFormat, String> {
    s.parse()
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Start the pipeline and query server (default command)
    Start,
    /// Validate configuration and probe the object store, then exit
    Check,
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config: Option<PathBuf>,
    pub buffer_dir: Option<String>,
    pub active_file: Option<String>,
    pub buffer_format: Option<RecordFormat>,
    pub upload_backend: Option<ObjectBackend>,
    pub upload_prefix: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        host: cli.host,
        port: cli.port,
        config: cli.config,
        buffer_dir: cli.buffer_dir,
        active_file: cli.active_file,
        buffer_format: cli.buffer_format,
        upload_backend: cli.upload_backend,
        upload_prefix: cli.upload_prefix,
        s3_bucket: cli.s3_bucket,
        s3_region: cli.s3_region,
        s3_endpoint: cli.s3_endpoint,
    };
    (config, cli.command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_backend() {
        assert_eq!(parse_object_backend("S3").unwrap(), ObjectBackend::S3);
        assert_eq!(
            parse_object_backend("filesystem").unwrap(),
            ObjectBackend::Filesystem
        );
        assert!(parse_object_backend("gcs").is_err());
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "coldpath",
            "--buffer-dir",
            "/var/spool/metrics",
            "--upload-backend",
            "s3",
            "--s3-bucket",
            "telemetry",
            "--buffer-format",
            "length-delimited",
            "check",
        ])
        .unwrap();
        assert_eq!(cli.buffer_dir.as_deref(), Some("/var/spool/metrics"));
        assert_eq!(cli.upload_backend, Some(ObjectBackend::S3));
        assert_eq!(cli.s3_bucket.as_deref(), Some("telemetry"));
        assert_eq!(cli.buffer_format, Some(RecordFormat::LengthDelimited));
        assert!(matches!(cli.command, Some(Commands::Check)));
    }
}
