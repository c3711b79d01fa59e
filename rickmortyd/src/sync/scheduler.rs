use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::orchestrator::{SyncOrchestrator, TriggerOutcome, TriggerSource};

/// Fires a scheduled sync every `period` until `shutdown` is cancelled. Each
/// tick runs on its own task, so a tick that lands while a sync is still in
/// progress is skipped by the orchestrator's guard.
pub async fn run_schedule(
    orchestrator: Arc<SyncOrchestrator>,
    period: Duration,
    run_on_start: bool,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    if !run_on_start {
        // The first tick completes immediately.
        ticker.tick().await;
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("scheduler stopped");
                break;
            }
            _ = ticker.tick() => {
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move {
                    if let TriggerOutcome::Skipped = orchestrator.trigger(TriggerSource::Schedule).await {
                        tracing::debug!("scheduled tick skipped");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::engine::SyncEngine;
    use crate::sync::mirror::{EntityKind, MirrorStore};
    use crate::sync::translate::LocationPolicy;
    use rickmorty_core::RickMortyClient;
    use serde_json::json;
    use sqlx::SqlitePool;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn make_orchestrator(server: &MockServer) -> Arc<SyncOrchestrator> {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = MirrorStore::from_pool(pool);
        store.init().await.unwrap();
        let client =
            RickMortyClient::with_base_url(&format!("{}/api", server.uri()), Duration::from_secs(5))
                .unwrap();
        Arc::new(SyncOrchestrator::new(SyncEngine::new(
            client,
            store,
            LocationPolicy::Strict,
        )))
    }

    async fn mount_locations(server: &MockServer, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path("/api/location"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "info": { "count": 1, "pages": 1, "next": null, "prev": null },
                "results": [{ "id": 1, "name": "Earth", "type": "Planet", "dimension": "C-137" }]
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
        for collection in ["character", "episode"] {
            Mock::given(method("GET"))
                .and(path(format!("/api/{collection}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "info": { "count": 0, "pages": 0, "next": null, "prev": null },
                    "results": []
                })))
                .mount(server)
                .await;
        }
    }

    #[tokio::test]
    async fn runs_on_start_and_stops_on_cancel() {
        let server = MockServer::start().await;
        mount_locations(&server, 1).await;
        let orchestrator = make_orchestrator(&server).await;
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(run_schedule(
            Arc::clone(&orchestrator),
            Duration::from_secs(3600),
            true,
            shutdown.clone(),
        ));
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let mirrored = orchestrator
                    .engine()
                    .store()
                    .count(EntityKind::Location)
                    .await
                    .unwrap();
                if mirrored == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn waits_a_full_period_when_not_running_on_start() {
        let server = MockServer::start().await;
        mount_locations(&server, 0).await;
        let orchestrator = make_orchestrator(&server).await;
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(run_schedule(
            Arc::clone(&orchestrator),
            Duration::from_secs(3600),
            false,
            shutdown.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(
            orchestrator
                .engine()
                .store()
                .count(EntityKind::Location)
                .await
                .unwrap(),
            0
        );
    }
}
