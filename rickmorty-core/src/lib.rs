mod client;
mod records;
mod reference;

pub use client::{ApiError, PageWalker, RickMortyClient};
pub use records::{
    CharacterRecord, Collection, EpisodeRecord, Gender, LifeStatus, LocationRecord, NamedLink,
    Page, PageInfo,
};
pub use reference::{MalformedReference, resolve_reference, resolve_references};
