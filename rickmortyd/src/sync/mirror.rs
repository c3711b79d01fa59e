use std::collections::HashSet;
use std::{fs, path::PathBuf};

use rickmorty_core::{Gender, LifeStatus};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{QueryBuilder, Row, SqlitePool, migrate::Migrator};
use thiserror::Error;
use time::Date;
use time::macros::format_description;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error("invalid {column} value: {value}")]
    InvalidValue { column: &'static str, value: String },
    #[error("built record id {actual} does not match requested id {expected}")]
    IdMismatch { expected: i64, actual: i64 },
    #[error("{kind:?} {id} is not mirrored")]
    MissingTarget { kind: EntityKind, id: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Location,
    Character,
    Episode,
}

impl EntityKind {
    fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Location => "location",
            EntityKind::Character => "character",
            EntityKind::Episode => "episode",
        }
    }

    fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "location" => Ok(EntityKind::Location),
            "character" => Ok(EntityKind::Character),
            "episode" => Ok(EntityKind::Episode),
            other => Err(invalid("kind", other)),
        }
    }

    fn exists_sql(&self) -> &'static str {
        match self {
            EntityKind::Location => "SELECT id FROM locations WHERE id = ?1",
            EntityKind::Character => "SELECT id FROM characters WHERE id = ?1",
            EntityKind::Episode => "SELECT id FROM episodes WHERE id = ?1",
        }
    }

    fn count_sql(&self) -> &'static str {
        match self {
            EntityKind::Location => "SELECT COUNT(*) FROM locations",
            EntityKind::Character => "SELECT COUNT(*) FROM characters",
            EntityKind::Episode => "SELECT COUNT(*) FROM episodes",
        }
    }
}

/// A locally persisted entity that can be created by [`MirrorStore::upsert`].
pub trait MirrorRecord: Send + Sync {
    const KIND: EntityKind;

    fn id(&self) -> i64;

    fn insert_query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub id: i64,
    pub name: String,
    pub location_type: String,
    pub dimension: String,
    pub url: String,
    pub created: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Character {
    pub id: i64,
    pub name: String,
    pub status: LifeStatus,
    pub species: String,
    pub subtype: String,
    pub gender: Gender,
    pub location_id: Option<i64>,
    pub avatar_uploaded: bool,
    pub url: String,
    pub created: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub air_date: String,
    pub aired_on: Option<Date>,
    pub url: String,
    pub created: Option<String>,
}

impl MirrorRecord for Location {
    const KIND: EntityKind = EntityKind::Location;

    fn id(&self) -> i64 {
        self.id
    }

    fn insert_query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        sqlx::query(
            "INSERT INTO locations (id, name, location_type, dimension, url, created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(self.id)
        .bind(&self.name)
        .bind(&self.location_type)
        .bind(&self.dimension)
        .bind(&self.url)
        .bind(&self.created)
    }
}

impl MirrorRecord for Character {
    const KIND: EntityKind = EntityKind::Character;

    fn id(&self) -> i64 {
        self.id
    }

    fn insert_query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        sqlx::query(
            "INSERT INTO characters (
                id, name, status, species, subtype, gender, location_id, avatar_uploaded, url, created
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(self.id)
        .bind(&self.name)
        .bind(status_as_str(self.status))
        .bind(&self.species)
        .bind(&self.subtype)
        .bind(gender_as_str(self.gender))
        .bind(self.location_id)
        .bind(if self.avatar_uploaded { 1 } else { 0 })
        .bind(&self.url)
        .bind(&self.created)
    }
}

impl MirrorRecord for Episode {
    const KIND: EntityKind = EntityKind::Episode;

    fn id(&self) -> i64 {
        self.id
    }

    fn insert_query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        sqlx::query(
            "INSERT INTO episodes (id, name, code, air_date, aired_on, url, created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(self.id)
        .bind(&self.name)
        .bind(&self.code)
        .bind(&self.air_date)
        .bind(self.aired_on.and_then(format_iso_date))
        .bind(&self.url)
        .bind(&self.created)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FavoriteTarget {
    Character(i64),
    Episode(i64),
    Location(i64),
}

impl FavoriteTarget {
    pub fn kind(&self) -> EntityKind {
        match self {
            FavoriteTarget::Character(_) => EntityKind::Character,
            FavoriteTarget::Episode(_) => EntityKind::Episode,
            FavoriteTarget::Location(_) => EntityKind::Location,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            FavoriteTarget::Character(id)
            | FavoriteTarget::Episode(id)
            | FavoriteTarget::Location(id) => *id,
        }
    }

    fn from_parts(kind: EntityKind, id: i64) -> Self {
        match kind {
            EntityKind::Character => FavoriteTarget::Character(id),
            EntityKind::Episode => FavoriteTarget::Episode(id),
            EntityKind::Location => FavoriteTarget::Location(id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkOutcome {
    pub linked: Vec<i64>,
    pub already_linked: Vec<i64>,
    pub missing: Vec<i64>,
}

pub struct MirrorStore {
    pool: SqlitePool,
}

impl MirrorStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let options = database_url
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn new_default() -> Result<Self, StoreError> {
        let db_path = default_db_path()?;
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Creates the record built by `build` unless a record with `id` already
    /// exists. Existing records are left untouched and `None` is returned.
    pub async fn upsert<R, F>(&self, id: i64, build: F) -> Result<Option<R>, StoreError>
    where
        R: MirrorRecord,
        F: FnOnce() -> R + Send,
    {
        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query_scalar::<_, i64>(R::KIND.exists_sql())
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            tx.rollback().await?;
            return Ok(None);
        }

        let record = build();
        if record.id() != id {
            return Err(StoreError::IdMismatch {
                expected: id,
                actual: record.id(),
            });
        }
        record.insert_query().execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(Some(record))
    }

    pub async fn exists(&self, kind: EntityKind, id: i64) -> Result<bool, StoreError> {
        let row = sqlx::query_scalar::<_, i64>(kind.exists_sql())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn count(&self, kind: EntityKind) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar::<_, i64>(kind.count_sql())
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn get_location(&self, id: i64) -> Result<Option<Location>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, location_type, dimension, url, created FROM locations WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Location {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            location_type: row.try_get("location_type")?,
            dimension: row.try_get("dimension")?,
            url: row.try_get("url")?,
            created: row.try_get("created")?,
        }))
    }

    pub async fn get_character(&self, id: i64) -> Result<Option<Character>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, status, species, subtype, gender, location_id, avatar_uploaded, url, created
             FROM characters WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(character_from_row).transpose()
    }

    pub async fn find_characters_by_ids(&self, ids: &[i64]) -> Result<Vec<Character>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, name, status, species, subtype, gender, location_id, avatar_uploaded, url, created
             FROM characters WHERE id IN (",
        );
        {
            let mut separated = builder.separated(", ");
            for id in ids {
                separated.push_bind(*id);
            }
            separated.push_unseparated(") ORDER BY id ASC");
        }
        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(character_from_row).collect()
    }

    pub async fn get_episode(&self, id: i64) -> Result<Option<Episode>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, code, air_date, aired_on, url, created FROM episodes WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let aired_on: Option<String> = row.try_get("aired_on")?;
        Ok(Some(Episode {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            code: row.try_get("code")?,
            air_date: row.try_get("air_date")?,
            aired_on: aired_on.as_deref().map(parse_iso_date).transpose()?,
            url: row.try_get("url")?,
            created: row.try_get("created")?,
        }))
    }

    pub async fn residents_of(&self, location_id: i64) -> Result<Vec<i64>, StoreError> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT id FROM characters WHERE location_id = ?1 ORDER BY id ASC",
        )
        .bind(location_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn episode_ids_for_character(&self, character_id: i64) -> Result<Vec<i64>, StoreError> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT episode_id FROM character_episodes WHERE character_id = ?1 ORDER BY episode_id ASC",
        )
        .bind(character_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn character_ids_for_episode(&self, episode_id: i64) -> Result<Vec<i64>, StoreError> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT character_id FROM character_episodes WHERE episode_id = ?1 ORDER BY character_id ASC",
        )
        .bind(episode_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn membership_count(&self) -> Result<i64, StoreError> {
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM character_episodes")
                .fetch_one(&self.pool)
                .await?,
        )
    }

    /// Links `episode_id` with every listed character that is mirrored, in a
    /// single transaction. Unknown character ids are reported, not inserted.
    pub async fn link_episode_characters(
        &self,
        episode_id: i64,
        character_ids: &[i64],
    ) -> Result<LinkOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let outcome = link_characters(&mut *tx, episode_id, character_ids).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Creates `episode` together with its character links in one
    /// transaction. Returns `None` without touching anything when the episode
    /// is already mirrored; any failure leaves neither the episode nor its
    /// links behind.
    pub async fn create_episode_with_links(
        &self,
        episode: Episode,
        character_ids: &[i64],
    ) -> Result<Option<LinkOutcome>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query_scalar::<_, i64>(EntityKind::Episode.exists_sql())
            .bind(episode.id)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            tx.rollback().await?;
            return Ok(None);
        }

        episode.insert_query().execute(&mut *tx).await?;
        let outcome = link_characters(&mut *tx, episode.id, character_ids).await?;
        tx.commit().await?;
        Ok(Some(outcome))
    }

    /// `true` when the character is mirrored and its avatar has not been uploaded.
    pub async fn avatar_pending(&self, character_id: i64) -> Result<bool, StoreError> {
        let flag = sqlx::query_scalar::<_, i64>(
            "SELECT avatar_uploaded FROM characters WHERE id = ?1",
        )
        .bind(character_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(matches!(flag, Some(0)))
    }

    pub async fn mark_avatar_uploaded(&self, character_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE characters SET avatar_uploaded = 1 WHERE id = ?1 AND avatar_uploaded = 0",
        )
        .bind(character_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn add_favorite(&self, owner: &str, target: FavoriteTarget) -> Result<bool, StoreError> {
        let kind = target.kind();
        if !self.exists(kind, target.id()).await? {
            return Err(StoreError::MissingTarget {
                kind,
                id: target.id(),
            });
        }
        let result = sqlx::query(
            "INSERT OR IGNORE INTO favorites (owner, kind, target_id, created) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(owner)
        .bind(kind.as_str())
        .bind(target.id())
        .bind(time::OffsetDateTime::now_utc().unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_favorite(&self, owner: &str, target: FavoriteTarget) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM favorites WHERE owner = ?1 AND kind = ?2 AND target_id = ?3")
                .bind(owner)
                .bind(target.kind().as_str())
                .bind(target.id())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_favorites(&self, owner: &str) -> Result<Vec<FavoriteTarget>, StoreError> {
        let rows = sqlx::query(
            "SELECT kind, target_id FROM favorites WHERE owner = ?1 ORDER BY created ASC, kind ASC, target_id ASC",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.try_get("kind")?;
            let id: i64 = row.try_get("target_id")?;
            out.push(FavoriteTarget::from_parts(EntityKind::parse(&kind)?, id));
        }
        Ok(out)
    }
}

async fn link_characters(
    conn: &mut SqliteConnection,
    episode_id: i64,
    character_ids: &[i64],
) -> Result<LinkOutcome, StoreError> {
    let mut outcome = LinkOutcome::default();
    if character_ids.is_empty() {
        return Ok(outcome);
    }

    let mut builder = QueryBuilder::<Sqlite>::new("SELECT id FROM characters WHERE id IN (");
    {
        let mut separated = builder.separated(", ");
        for id in character_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
    }
    let found: HashSet<i64> = builder
        .build_query_scalar::<i64>()
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .collect();

    let mut seen = HashSet::with_capacity(character_ids.len());
    for &character_id in character_ids {
        if !seen.insert(character_id) {
            continue;
        }
        if !found.contains(&character_id) {
            outcome.missing.push(character_id);
            continue;
        }
        let result = sqlx::query(
            "INSERT OR IGNORE INTO character_episodes (character_id, episode_id) VALUES (?1, ?2)",
        )
        .bind(character_id)
        .bind(episode_id)
        .execute(&mut *conn)
        .await?;
        if result.rows_affected() > 0 {
            outcome.linked.push(character_id);
        } else {
            outcome.already_linked.push(character_id);
        }
    }
    Ok(outcome)
}

fn character_from_row(row: &SqliteRow) -> Result<Character, StoreError> {
    let status: String = row.try_get("status")?;
    let gender: String = row.try_get("gender")?;
    let avatar_uploaded: i64 = row.try_get("avatar_uploaded")?;
    Ok(Character {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        status: parse_status(&status)?,
        species: row.try_get("species")?,
        subtype: row.try_get("subtype")?,
        gender: parse_gender(&gender)?,
        location_id: row.try_get("location_id")?,
        avatar_uploaded: avatar_uploaded != 0,
        url: row.try_get("url")?,
        created: row.try_get("created")?,
    })
}

fn status_as_str(status: LifeStatus) -> &'static str {
    match status {
        LifeStatus::Alive => "alive",
        LifeStatus::Dead => "dead",
        LifeStatus::Unknown => "unknown",
    }
}

fn parse_status(value: &str) -> Result<LifeStatus, StoreError> {
    match value {
        "alive" => Ok(LifeStatus::Alive),
        "dead" => Ok(LifeStatus::Dead),
        "unknown" => Ok(LifeStatus::Unknown),
        other => Err(invalid("status", other)),
    }
}

fn gender_as_str(gender: Gender) -> &'static str {
    match gender {
        Gender::Female => "female",
        Gender::Male => "male",
        Gender::Genderless => "genderless",
        Gender::Unknown => "unknown",
    }
}

fn parse_gender(value: &str) -> Result<Gender, StoreError> {
    match value {
        "female" => Ok(Gender::Female),
        "male" => Ok(Gender::Male),
        "genderless" => Ok(Gender::Genderless),
        "unknown" => Ok(Gender::Unknown),
        other => Err(invalid("gender", other)),
    }
}

fn format_iso_date(date: Date) -> Option<String> {
    date.format(format_description!("[year]-[month]-[day]")).ok()
}

fn parse_iso_date(value: &str) -> Result<Date, StoreError> {
    Date::parse(value, format_description!("[year]-[month]-[day]"))
        .map_err(|_| invalid("aired_on", value))
}

fn invalid(column: &'static str, value: &str) -> StoreError {
    StoreError::InvalidValue {
        column,
        value: value.to_string(),
    }
}

fn default_db_path() -> Result<PathBuf, StoreError> {
    let base = dirs::data_dir().ok_or(StoreError::MissingDataDir)?;
    Ok(base.join("rickmorty").join("mirror.db"))
}

#[cfg(test)]
#[path = "mirror_tests.rs"]
mod tests;
