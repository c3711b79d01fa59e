use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rickmorty_core::RickMortyClient;
use tokio_util::sync::CancellationToken;

use crate::storage::{BlobStore, CloudinaryCredentials, CloudinaryStore};
use crate::sync::avatar::AvatarMirror;
use crate::sync::engine::SyncEngine;
use crate::sync::mirror::MirrorStore;
use crate::sync::orchestrator::{SyncOrchestrator, SyncReport, TriggerOutcome, TriggerSource};
use crate::sync::scheduler::run_schedule;
use crate::sync::translate::LocationPolicy;

const DEFAULT_API_BASE_URL: &str = "https://rickandmortyapi.com/api";
const DEFAULT_CLOUDINARY_BASE_URL: &str = "https://api.cloudinary.com";
const DEFAULT_AVATAR_FOLDER: &str = "characters";
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 15 * 24 * 60 * 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub api_base_url: String,
    pub database_url: Option<String>,
    pub sync_interval: Duration,
    pub http_timeout: Duration,
    pub location_policy: LocationPolicy,
    pub mirror_avatars: bool,
    pub avatar_folder: String,
    pub sync_on_start: bool,
    pub cloudinary: Option<CloudinaryCredentials>,
    pub cloudinary_base_url: String,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let location_policy = match read_string(&lookup, "RICKMORTY_LOCATION_POLICY") {
            Some(value) => LocationPolicy::parse(&value).with_context(|| {
                format!("RICKMORTY_LOCATION_POLICY must be `strict` or `lenient`, got {value:?}")
            })?,
            None => LocationPolicy::default(),
        };

        Ok(Self {
            api_base_url: read_string(&lookup, "RICKMORTY_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            database_url: read_string(&lookup, "RICKMORTY_DATABASE_URL"),
            sync_interval: Duration::from_secs(read_u64_env(
                &lookup,
                "RICKMORTY_SYNC_INTERVAL_SECS",
                DEFAULT_SYNC_INTERVAL_SECS,
            )),
            http_timeout: Duration::from_secs(read_u64_env(
                &lookup,
                "RICKMORTY_HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )),
            location_policy,
            mirror_avatars: read_bool_env(&lookup, "RICKMORTY_MIRROR_AVATARS", true),
            avatar_folder: read_string(&lookup, "RICKMORTY_AVATAR_FOLDER")
                .unwrap_or_else(|| DEFAULT_AVATAR_FOLDER.to_string()),
            sync_on_start: read_bool_env(&lookup, "RICKMORTY_SYNC_ON_START", true),
            cloudinary: cloudinary_credentials(&lookup),
            cloudinary_base_url: read_string(&lookup, "CLOUDINARY_BASE_URL")
                .unwrap_or_else(|| DEFAULT_CLOUDINARY_BASE_URL.to_string()),
        })
    }

    /// Avatars are mirrored only when enabled and blob storage is configured.
    pub fn avatars_enabled(&self) -> bool {
        self.mirror_avatars && self.cloudinary.is_some()
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    orchestrator: Arc<SyncOrchestrator>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        let client = RickMortyClient::with_base_url(&config.api_base_url, config.http_timeout)
            .with_context(|| format!("invalid API base url {:?}", config.api_base_url))?;
        let store = match &config.database_url {
            Some(url) => MirrorStore::new(url).await,
            None => MirrorStore::new_default().await,
        }
        .context("failed to initialize mirror store")?;

        let mut engine = SyncEngine::new(client.clone(), store, config.location_policy);
        match (&config.cloudinary, config.mirror_avatars) {
            (Some(credentials), true) => {
                let blobs: Arc<dyn BlobStore> = Arc::new(
                    CloudinaryStore::with_base_url(
                        &config.cloudinary_base_url,
                        credentials.clone(),
                        config.http_timeout,
                    )
                    .context("failed to configure blob storage")?,
                );
                engine = engine.with_avatars(AvatarMirror::new(
                    client,
                    blobs,
                    config.avatar_folder.clone(),
                ));
            }
            (None, true) => {
                tracing::info!("avatar mirroring disabled: blob storage credentials are not set");
            }
            (_, false) => tracing::info!("avatar mirroring disabled by configuration"),
        }

        Ok(Self {
            config,
            orchestrator: Arc::new(SyncOrchestrator::new(engine)),
        })
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    /// Runs a single manual sync and reports a fatal phase as an error.
    pub async fn run_once(&self) -> anyhow::Result<SyncReport> {
        match self.orchestrator.trigger(TriggerSource::Manual).await {
            TriggerOutcome::Skipped => anyhow::bail!("a sync is already running"),
            TriggerOutcome::Finished(report) => match &report.failure {
                Some(failure) => anyhow::bail!(
                    "sync aborted during {}: {}",
                    failure.phase,
                    failure.message
                ),
                None => Ok(report),
            },
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!(
            api = %self.config.api_base_url,
            interval_secs = self.config.sync_interval.as_secs(),
            location_policy = ?self.config.location_policy,
            avatars = self.config.avatars_enabled(),
            "rickmortyd started"
        );

        let shutdown = CancellationToken::new();
        let scheduler = tokio::spawn(run_schedule(
            Arc::clone(&self.orchestrator),
            self.config.sync_interval,
            self.config.sync_on_start,
            shutdown.clone(),
        ));
        let manual = spawn_manual_trigger(Arc::clone(&self.orchestrator), shutdown.clone())?;

        wait_for_shutdown().await?;
        tracing::info!("shutting down");
        shutdown.cancel();
        scheduler.await.context("scheduler task failed")?;
        manual.await.context("manual trigger task failed")?;
        Ok(())
    }
}

/// Triggers a sync whenever the process receives SIGHUP.
#[cfg(unix)]
fn spawn_manual_trigger(
    orchestrator: Arc<SyncOrchestrator>,
    shutdown: CancellationToken,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    tracing::info!("SIGHUP received, triggering sync");
                    let orchestrator = Arc::clone(&orchestrator);
                    tokio::spawn(async move {
                        orchestrator.trigger(TriggerSource::Manual).await;
                    });
                }
            }
        }
    }))
}

#[cfg(not(unix))]
fn spawn_manual_trigger(
    _orchestrator: Arc<SyncOrchestrator>,
    shutdown: CancellationToken,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    Ok(tokio::spawn(async move { shutdown.cancelled().await }))
}

async fn wait_for_shutdown() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("failed to listen for Ctrl-C")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    Ok(())
}

fn cloudinary_credentials<F>(lookup: &F) -> Option<CloudinaryCredentials>
where
    F: Fn(&str) -> Option<String>,
{
    Some(CloudinaryCredentials {
        cloud_name: read_string(lookup, "CLOUDINARY_CLOUD_NAME")?,
        api_key: read_string(lookup, "CLOUDINARY_API_KEY")?,
        api_secret: read_string(lookup, "CLOUDINARY_API_SECRET")?,
    })
}

fn read_string<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_u64_env<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool_env<F>(lookup: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        })
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
