use std::fmt;
use std::time::Instant;

use tokio::sync::{Mutex, watch};

use super::engine::{EngineError, PhaseReport, SyncEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    SyncingLocations,
    SyncingCharacters,
    SyncingEpisodes,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::SyncingLocations => "syncing_locations",
            SyncPhase::SyncingCharacters => "syncing_characters",
            SyncPhase::SyncingEpisodes => "syncing_episodes",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Schedule,
    Manual,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Schedule => f.write_str("schedule"),
            TriggerSource::Manual => f.write_str("manual"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseFailure {
    pub phase: SyncPhase,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub locations: Option<PhaseReport>,
    pub characters: Option<PhaseReport>,
    pub episodes: Option<PhaseReport>,
    pub failure: Option<PhaseFailure>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && self.episodes.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Another invocation held the guard; nothing ran.
    Skipped,
    Finished(SyncReport),
}

/// Runs the locations, characters and episodes phases in order. At most one
/// invocation runs at a time; overlapping triggers are skipped.
pub struct SyncOrchestrator {
    engine: SyncEngine,
    guard: Mutex<()>,
    phase: watch::Sender<SyncPhase>,
}

impl SyncOrchestrator {
    pub fn new(engine: SyncEngine) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            engine,
            guard: Mutex::new(()),
            phase,
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    pub async fn trigger(&self, source: TriggerSource) -> TriggerOutcome {
        let Ok(_running) = self.guard.try_lock() else {
            tracing::info!(%source, phase = %self.phase(), "sync already running, skipping trigger");
            return TriggerOutcome::Skipped;
        };

        let started = Instant::now();
        tracing::info!(%source, "sync started");
        let report = self.run_phases().await;
        self.enter(SyncPhase::Idle);

        match &report.failure {
            None => tracing::info!(%source, elapsed_ms = started.elapsed().as_millis() as u64, "sync finished"),
            Some(failure) => tracing::error!(
                %source,
                phase = %failure.phase,
                error = %failure.message,
                "sync aborted"
            ),
        }
        TriggerOutcome::Finished(report)
    }

    async fn run_phases(&self) -> SyncReport {
        let mut report = SyncReport::default();

        self.enter(SyncPhase::SyncingLocations);
        match self.engine.sync_locations().await {
            Ok(phase) => report.locations = Some(phase),
            Err(err) => return failed(report, SyncPhase::SyncingLocations, err),
        }

        self.enter(SyncPhase::SyncingCharacters);
        match self.engine.sync_characters().await {
            Ok(phase) => report.characters = Some(phase),
            Err(err) => return failed(report, SyncPhase::SyncingCharacters, err),
        }

        self.enter(SyncPhase::SyncingEpisodes);
        match self.engine.sync_episodes().await {
            Ok(phase) => report.episodes = Some(phase),
            Err(err) => return failed(report, SyncPhase::SyncingEpisodes, err),
        }

        report
    }

    fn enter(&self, phase: SyncPhase) {
        self.phase.send_replace(phase);
        tracing::debug!(%phase, "sync phase changed");
    }
}

fn failed(mut report: SyncReport, phase: SyncPhase, err: EngineError) -> SyncReport {
    report.failure = Some(PhaseFailure {
        phase,
        message: err.to_string(),
    });
    report
}
