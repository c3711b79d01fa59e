use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Locations,
    Characters,
    Episodes,
}

impl Collection {
    pub fn path(&self) -> &'static str {
        match self {
            Collection::Locations => "location",
            Collection::Characters => "character",
            Collection::Episodes => "episode",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Collection::Locations => f.write_str("locations"),
            Collection::Characters => f.write_str("characters"),
            Collection::Episodes => f.write_str("episodes"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PageInfo {
    pub count: u64,
    pub pages: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub prev: Option<String>,
}

impl PageInfo {
    pub fn continuation(&self) -> Option<&str> {
        self.next.as_deref().filter(|next| !next.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Page<T> {
    pub info: PageInfo,
    pub results: Vec<T>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum LifeStatus {
    Alive,
    Dead,
    #[serde(rename = "unknown", other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum Gender {
    Female,
    Male,
    Genderless,
    #[serde(rename = "unknown", other)]
    Unknown,
}

/// `{ "name": ..., "url": ... }` pointer embedded in character records.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct NamedLink {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocationRecord {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type", default)]
    pub location_type: String,
    #[serde(default)]
    pub dimension: String,
    #[serde(default)]
    pub residents: Vec<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub created: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CharacterRecord {
    pub id: i64,
    pub name: String,
    pub status: LifeStatus,
    #[serde(default)]
    pub species: String,
    #[serde(rename = "type", default)]
    pub subtype: String,
    pub gender: Gender,
    #[serde(default)]
    pub origin: Option<NamedLink>,
    #[serde(default)]
    pub location: Option<NamedLink>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(rename = "episode", default)]
    pub episodes: Vec<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub created: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EpisodeRecord {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub air_date: String,
    #[serde(rename = "episode")]
    pub code: String,
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub created: Option<String>,
}
