use rickmorty_core::{
    ApiError, CharacterRecord, Collection, EpisodeRecord, LocationRecord, RickMortyClient,
};
use thiserror::Error;

use super::avatar::{AvatarMirror, AvatarOutcome};
use super::mirror::{Character, EntityKind, MirrorStore, StoreError};
use super::translate::{
    EpisodeTranslation, LocationPolicy, TranslateError, character_input, episode_input,
    location_input,
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("api error: {0}")]
    Api(#[from] ApiError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
enum ItemError {
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseReport {
    pub pages: u32,
    pub created: usize,
    pub existing: usize,
    pub failed: usize,
    pub linked: usize,
    pub avatars_uploaded: usize,
    pub avatar_failures: usize,
}

impl PhaseReport {
    fn record<R>(
        &mut self,
        collection: Collection,
        id: i64,
        result: Result<Option<R>, ItemError>,
    ) -> bool {
        match result {
            Ok(Some(_)) => {
                self.created += 1;
                true
            }
            Ok(None) => {
                self.existing += 1;
                false
            }
            Err(err) => {
                self.failed += 1;
                tracing::warn!(%collection, id, error = %err, "record not mirrored");
                false
            }
        }
    }
}

pub struct SyncEngine {
    client: RickMortyClient,
    store: MirrorStore,
    policy: LocationPolicy,
    avatars: Option<AvatarMirror>,
}

impl SyncEngine {
    pub fn new(client: RickMortyClient, store: MirrorStore, policy: LocationPolicy) -> Self {
        Self {
            client,
            store,
            policy,
            avatars: None,
        }
    }

    pub fn with_avatars(mut self, avatars: AvatarMirror) -> Self {
        self.avatars = Some(avatars);
        self
    }

    pub fn store(&self) -> &MirrorStore {
        &self.store
    }

    pub async fn sync_locations(&self) -> Result<PhaseReport, EngineError> {
        let collection = Collection::Locations;
        let mut report = PhaseReport::default();
        let mut walker = self.client.pages::<LocationRecord>(collection, None)?;
        while let Some(page) = walker.next_page().await? {
            report.pages += 1;
            for record in &page.results {
                let result = self
                    .store
                    .upsert(record.id, || location_input(record))
                    .await
                    .map_err(ItemError::from);
                report.record(collection, record.id, result);
            }
        }
        self.finish(collection, EntityKind::Location, report).await
    }

    /// Mirrors every character and, when avatar mirroring is configured,
    /// uploads the avatar of each character seen whose flag is still unset.
    pub async fn sync_characters(&self) -> Result<PhaseReport, EngineError> {
        let collection = Collection::Characters;
        let mut report = PhaseReport::default();
        let mut walker = self.client.pages::<CharacterRecord>(collection, None)?;
        while let Some(page) = walker.next_page().await? {
            report.pages += 1;
            for record in &page.results {
                let result = self.mirror_character(record).await;
                let stored = result.is_ok();
                report.record(collection, record.id, result);
                if stored {
                    self.mirror_avatar(record.id, &mut report).await;
                }
            }
        }
        self.finish(collection, EntityKind::Character, report).await
    }

    /// Mirrors every episode. A new episode and its character links are
    /// committed together, so an episode is never stored without its links.
    pub async fn sync_episodes(&self) -> Result<PhaseReport, EngineError> {
        let collection = Collection::Episodes;
        let mut report = PhaseReport::default();
        let mut walker = self.client.pages::<EpisodeRecord>(collection, None)?;
        while let Some(page) = walker.next_page().await? {
            report.pages += 1;
            for record in &page.results {
                let translation = match episode_input(record) {
                    Ok(translation) => translation,
                    Err(err) => {
                        report.record::<()>(collection, record.id, Err(err.into()));
                        continue;
                    }
                };
                let EpisodeTranslation {
                    episode,
                    character_ids,
                    malformed,
                } = translation;

                let result = self
                    .store
                    .create_episode_with_links(episode, &character_ids)
                    .await
                    .map_err(ItemError::from);
                let outcome = match result {
                    Ok(Some(outcome)) => outcome,
                    other => {
                        report.record(collection, record.id, other);
                        continue;
                    }
                };

                report.created += 1;
                report.linked += outcome.linked.len();
                for err in &malformed {
                    tracing::warn!(
                        episode_id = record.id,
                        error = %err,
                        "skipping malformed character reference"
                    );
                }
                if !outcome.missing.is_empty() {
                    tracing::warn!(
                        episode_id = record.id,
                        missing = ?outcome.missing,
                        "episode references characters that are not mirrored"
                    );
                }
            }
        }
        self.finish(collection, EntityKind::Episode, report).await
    }

    async fn mirror_character(
        &self,
        record: &CharacterRecord,
    ) -> Result<Option<Character>, ItemError> {
        // Existing characters are skipped before translation.
        if self.store.exists(EntityKind::Character, record.id).await? {
            return Ok(None);
        }
        let mut character = character_input(record, self.policy)?;
        if let Some(location_id) = character.location_id {
            if !self.store.exists(EntityKind::Location, location_id).await? {
                tracing::debug!(
                    character_id = record.id,
                    location_id,
                    "location is not mirrored, storing character without one"
                );
                character.location_id = None;
            }
        }
        Ok(self.store.upsert(record.id, move || character).await?)
    }

    async fn mirror_avatar(&self, character_id: i64, report: &mut PhaseReport) {
        let Some(avatars) = &self.avatars else {
            return;
        };
        match avatars.mirror(&self.store, character_id).await {
            Ok(AvatarOutcome::Uploaded(_)) => report.avatars_uploaded += 1,
            Ok(AvatarOutcome::AlreadyUploaded) => {}
            Err(err) => {
                report.avatar_failures += 1;
                tracing::warn!(character_id, error = %err, "avatar not mirrored");
            }
        }
    }

    async fn finish(
        &self,
        collection: Collection,
        kind: EntityKind,
        report: PhaseReport,
    ) -> Result<PhaseReport, EngineError> {
        let total = self.store.count(kind).await?;
        tracing::info!(
            %collection,
            pages = report.pages,
            created = report.created,
            existing = report.existing,
            failed = report.failed,
            total,
            "phase finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
