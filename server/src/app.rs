//! Core application

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Notify;

use crate::api::ApiServer;
use crate::core::banner;
use crate::core::cli::{self, CliConfig, Commands};
use crate::core::config::{AppConfig, ObjectBackend};
use crate::core::constants::{
    DEFAULT_LOG_FILTER, ENV_LOG, LEDGER_FILE_NAME, ROLLUP_SNAPSHOT_FILE_NAME,
    STARTUP_PROBE_ATTEMPTS,
};
use crate::core::shutdown::ShutdownService;
use crate::core::storage::{AppStorage, DataSubdir};
use crate::data::ledger::Ledger;
use crate::data::objects::{ObjectStore, create_object_store};
use crate::data::rollups::MemoryAggregateStore;
use crate::domain::partition::PartitionBuilder;
use crate::domain::pipeline::{Pipeline, PipelineError, PipelineStats, probe_store};
use crate::domain::quality::QualityMonitor;
use crate::domain::rollup::RollupEngine;
use crate::domain::upload::Uploader;
use crate::domain::watcher::BufferWatcher;
use crate::utils::retry::RetryPolicy;
use crate::utils::time::now_millis;

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub storage: AppStorage,
    pub objects: Arc<dyn ObjectStore>,
    pub ledger: Arc<Ledger>,
    pub uploader: Arc<Uploader>,
    pub rollups: Arc<RollupEngine>,
    pub quality: Arc<QualityMonitor>,
    pub pipeline_stats: Arc<PipelineStats>,
    pub rotation: Arc<Notify>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        match command {
            Some(Commands::Check) => return Self::check(&cli_config).await,
            Some(Commands::Start) | None => {}
        }

        let app = Self::init(&cli_config).await?;
        Self::start_server(app).await
    }

    /// Validate configuration and reach the object store, then exit
    async fn check(cli: &CliConfig) -> Result<()> {
        let config = AppConfig::load(cli)?;
        let storage = AppStorage::init(&config).await?;
        let objects = create_object_store(&config.upload, &storage)
            .await
            .context("Failed to initialize object store")?;
        let attempts = probe_store(objects.as_ref(), &Self::probe_policy(&config)).await?;

        println!(
            "Configuration OK; {} object store reachable (attempts: {})",
            objects.backend_name(),
            attempts
        );
        Ok(())
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        let storage = AppStorage::init(&config).await?;

        tokio::fs::create_dir_all(&config.buffer.dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create buffer directory: {}",
                    config.buffer.dir.display()
                )
            })?;

        let objects = create_object_store(&config.upload, &storage)
            .await
            .context("Failed to initialize object store")?;
        probe_store(objects.as_ref(), &Self::probe_policy(&config)).await?;

        let ledger = Arc::new(
            Ledger::open(&storage.subdir_path(DataSubdir::State, LEDGER_FILE_NAME))
                .await
                .map_err(PipelineError::from)?,
        );
        let rollups = Arc::new(
            RollupEngine::open(
                &config.rollup,
                Arc::new(MemoryAggregateStore::new()),
                storage.subdir_path(DataSubdir::State, ROLLUP_SNAPSHOT_FILE_NAME),
            )
            .await
            .map_err(PipelineError::from)?
            .with_ledger(ledger.clone()),
        );
        let pruned = ledger.prune_before(rollups.fold_horizon_at(now_millis()));
        tracing::debug!(pruned, objects = ledger.len(), "Upload ledger opened");

        // Objects stored before a crash but never folded
        if let Err(e) = rollups
            .catch_up(objects.as_ref(), &config.upload.prefix)
            .await
        {
            tracing::warn!(error = %e, "Rollup catch-up failed, continuing with restored state");
        }

        let uploader = Arc::new(Uploader::new(
            objects.clone(),
            ledger.clone(),
            config.upload.prefix.clone(),
            config.upload.retry_policy(),
            storage.subdir(DataSubdir::Quarantine),
        ));
        let quality = Arc::new(QualityMonitor::new(rollups.clone(), config.quality.clone()));
        let shutdown = ShutdownService::new(rollups.clone());

        Ok(Self {
            shutdown,
            config,
            storage,
            objects,
            ledger,
            uploader,
            rollups,
            quality,
            pipeline_stats: Arc::new(PipelineStats::default()),
            rotation: Arc::new(Notify::new()),
        })
    }

    fn probe_policy(config: &AppConfig) -> RetryPolicy {
        RetryPolicy {
            max_attempts: STARTUP_PROBE_ATTEMPTS,
            ..config.upload.retry_policy()
        }
    }

    fn init_logging() {
        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    fn object_target(&self) -> String {
        let prefix = &self.config.upload.prefix;
        match self.config.upload.backend {
            ObjectBackend::S3 => match &self.config.upload.s3 {
                Some(s3) => format!("s3://{}/{}", s3.bucket, prefix),
                None => format!("s3 ({})", prefix),
            },
            ObjectBackend::Filesystem => {
                let root = self
                    .config
                    .upload
                    .filesystem_path
                    .clone()
                    .unwrap_or_else(|| {
                        self.storage
                            .subdir(DataSubdir::Objects)
                            .display()
                            .to_string()
                    });
                format!("{}/{}", root.trim_end_matches('/'), prefix)
            }
        }
    }

    async fn start_server(app: Self) -> Result<()> {
        // Install signal handlers FIRST (before any blocking calls)
        app.shutdown.install_signal_handlers();

        app.start_background_tasks().await;

        banner::print_banner(
            &app.config,
            &app.object_target(),
            &app.storage.data_dir().display().to_string(),
        );

        let server = ApiServer::new(app);
        let app = server.start().await?;
        app.shutdown.shutdown().await;

        Ok(())
    }

    pub async fn start_background_tasks(&self) {
        self.shutdown
            .register(self.rollups.clone().start_maintenance(
                self.config.rollup.sweep_interval,
                self.config.rollup.snapshot_interval,
                self.shutdown.subscribe(),
            ))
            .await;

        self.shutdown
            .register(self.quality.clone().start(self.shutdown.subscribe()))
            .await;

        let pipeline = Pipeline::new(
            PartitionBuilder::new(self.config.buffer.format, self.config.buffer.decode_batch_size),
            self.uploader.clone(),
            self.rollups.clone(),
            self.config.upload.concurrency,
            self.config.upload.queue_capacity,
            self.pipeline_stats.clone(),
        );
        let watcher = BufferWatcher::new(
            &self.config.buffer,
            self.pipeline_stats.clone(),
            self.rotation.clone(),
        );

        self.shutdown
            .register_all(pipeline.start(watcher, self.shutdown.subscribe()))
            .await;

        tracing::debug!("Background tasks started");
    }
}
