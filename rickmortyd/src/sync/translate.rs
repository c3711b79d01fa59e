use rickmorty_core::{
    CharacterRecord, EpisodeRecord, LocationRecord, MalformedReference, resolve_reference,
    resolve_references,
};
use thiserror::Error;
use time::Date;
use time::macros::format_description;

use super::mirror::{Character, Episode, Location};

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("malformed location reference: {0}")]
    LocationReference(#[source] MalformedReference),
    #[error("invalid episode code: {0:?}")]
    EpisodeCode(String),
}

/// How a character's location reference is treated when it cannot be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocationPolicy {
    /// A non-empty reference that does not resolve skips the character.
    #[default]
    Strict,
    /// Any unresolvable reference is stored as "no location".
    Lenient,
}

impl LocationPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(LocationPolicy::Strict),
            "lenient" => Some(LocationPolicy::Lenient),
            _ => None,
        }
    }
}

pub fn location_input(record: &LocationRecord) -> Location {
    Location {
        id: record.id,
        name: record.name.clone(),
        location_type: record.location_type.clone(),
        dimension: record.dimension.clone(),
        url: record.url.clone(),
        created: record.created.clone(),
    }
}

pub fn character_input(
    record: &CharacterRecord,
    policy: LocationPolicy,
) -> Result<Character, TranslateError> {
    Ok(Character {
        id: record.id,
        name: record.name.clone(),
        status: record.status,
        species: record.species.clone(),
        subtype: record.subtype.clone(),
        gender: record.gender,
        location_id: location_reference(record, policy)?,
        avatar_uploaded: false,
        url: record.url.clone(),
        created: record.created.clone(),
    })
}

fn location_reference(
    record: &CharacterRecord,
    policy: LocationPolicy,
) -> Result<Option<i64>, TranslateError> {
    // The API reports an unknown location as `{ "name": "unknown", "url": "" }`.
    let url = record
        .location
        .as_ref()
        .map(|link| link.url.as_str())
        .filter(|url| !url.trim().is_empty());
    let Some(url) = url else {
        return Ok(None);
    };
    match (resolve_reference(Some(url)), policy) {
        (Ok(id), _) => Ok(Some(id)),
        (Err(err), LocationPolicy::Strict) => Err(TranslateError::LocationReference(err)),
        (Err(err), LocationPolicy::Lenient) => {
            tracing::debug!(character_id = record.id, %err, "dropping unresolvable location");
            Ok(None)
        }
    }
}

#[derive(Debug)]
pub struct EpisodeTranslation {
    pub episode: Episode,
    pub character_ids: Vec<i64>,
    pub malformed: Vec<MalformedReference>,
}

pub fn episode_input(record: &EpisodeRecord) -> Result<EpisodeTranslation, TranslateError> {
    let code = normalize_episode_code(&record.code)
        .ok_or_else(|| TranslateError::EpisodeCode(record.code.clone()))?;

    let mut character_ids = Vec::with_capacity(record.characters.len());
    let mut malformed = Vec::new();
    for resolved in resolve_references(record.characters.iter().map(String::as_str)) {
        match resolved {
            Ok(id) => character_ids.push(id),
            Err(err) => malformed.push(err),
        }
    }

    Ok(EpisodeTranslation {
        episode: Episode {
            id: record.id,
            name: record.name.clone(),
            code,
            air_date: record.air_date.clone(),
            aired_on: parse_air_date(&record.air_date),
            url: record.url.clone(),
            created: record.created.clone(),
        },
        character_ids,
        malformed,
    })
}

fn normalize_episode_code(code: &str) -> Option<String> {
    let upper = code.trim().to_ascii_uppercase();
    let bytes = upper.as_bytes();
    let valid = bytes.len() == 6
        && bytes[0] == b'S'
        && bytes[3] == b'E'
        && [1, 2, 4, 5].iter().all(|&i| bytes[i].is_ascii_digit());
    valid.then_some(upper)
}

/// Parses the API's `"December 2, 2013"` air dates.
pub fn parse_air_date(value: &str) -> Option<Date> {
    Date::parse(
        value.trim(),
        format_description!("[month repr:long] [day padding:none], [year]"),
    )
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rickmorty_core::{Gender, LifeStatus, NamedLink};
    use time::Month;

    fn character_record(location_url: Option<&str>) -> CharacterRecord {
        CharacterRecord {
            id: 1,
            name: "Rick Sanchez".into(),
            status: LifeStatus::Alive,
            species: "Human".into(),
            subtype: String::new(),
            gender: Gender::Male,
            origin: None,
            location: location_url.map(|url| NamedLink {
                name: "Citadel of Ricks".into(),
                url: url.into(),
            }),
            image: Some("https://x/api/character/avatar/1.jpeg".into()),
            episodes: vec!["https://x/api/episode/1".into()],
            url: "https://x/api/character/1".into(),
            created: None,
        }
    }

    fn episode_record(code: &str, characters: &[&str]) -> EpisodeRecord {
        EpisodeRecord {
            id: 28,
            name: "The Ricklantis Mixup".into(),
            air_date: "September 10, 2017".into(),
            code: code.into(),
            characters: characters.iter().map(|c| c.to_string()).collect(),
            url: "https://x/api/episode/28".into(),
            created: None,
        }
    }

    #[test]
    fn location_is_copied_field_by_field() {
        let record = LocationRecord {
            id: 1,
            name: "Earth (C-137)".into(),
            location_type: "Planet".into(),
            dimension: "Dimension C-137".into(),
            residents: vec!["https://x/api/character/38".into()],
            url: "https://x/api/location/1".into(),
            created: Some("2017-11-10T12:42:04.162Z".into()),
        };

        let location = location_input(&record);

        assert_eq!(location.id, 1);
        assert_eq!(location.location_type, "Planet");
        assert_eq!(location.dimension, "Dimension C-137");
    }

    #[test]
    fn character_resolves_location_id() {
        let character =
            character_input(&character_record(Some("https://x/api/location/3")), LocationPolicy::Strict)
                .unwrap();

        assert_eq!(character.location_id, Some(3));
        assert!(!character.avatar_uploaded);
    }

    #[test]
    fn empty_or_missing_location_means_no_location() {
        for record in [character_record(Some("")), character_record(None)] {
            let character = character_input(&record, LocationPolicy::Strict).unwrap();
            assert_eq!(character.location_id, None);
        }
    }

    #[test]
    fn malformed_location_depends_on_policy() {
        let record = character_record(Some("https://x/api/location/"));

        assert!(matches!(
            character_input(&record, LocationPolicy::Strict),
            Err(TranslateError::LocationReference(_))
        ));
        assert_eq!(
            character_input(&record, LocationPolicy::Lenient)
                .unwrap()
                .location_id,
            None
        );
    }

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!(LocationPolicy::parse("Strict"), Some(LocationPolicy::Strict));
        assert_eq!(LocationPolicy::parse(" lenient "), Some(LocationPolicy::Lenient));
        assert_eq!(LocationPolicy::parse("fatal"), None);
    }

    #[test]
    fn episode_collects_character_ids_and_malformed_refs() {
        let translation = episode_input(&episode_record(
            "s03e07",
            &["https://x/api/character/1", "https://x/api/character/", "https://x/api/character/2"],
        ))
        .unwrap();

        assert_eq!(translation.episode.code, "S03E07");
        assert_eq!(translation.character_ids, vec![1, 2]);
        assert_eq!(translation.malformed.len(), 1);
        assert_eq!(
            translation.episode.aired_on,
            Date::from_calendar_date(2017, Month::September, 10).ok()
        );
    }

    #[test]
    fn episode_rejects_bad_code() {
        for code in ["S1E1", "E01S01", "S01E0x", ""] {
            assert!(matches!(
                episode_input(&episode_record(code, &[])),
                Err(TranslateError::EpisodeCode(_))
            ));
        }
    }

    #[test]
    fn unparseable_air_date_is_kept_raw() {
        let mut record = episode_record("S01E01", &[]);
        record.air_date = "sometime in 2013".into();

        let translation = episode_input(&record).unwrap();

        assert_eq!(translation.episode.air_date, "sometime in 2013");
        assert_eq!(translation.episode.aired_on, None);
    }
}
