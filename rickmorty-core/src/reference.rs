use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedReference {
    #[error("reference is missing")]
    Missing,
    #[error("reference does not end in a numeric id: {0:?}")]
    NoTrailingId(String),
}

/// Extracts the numeric id from the last path segment of a foreign-entity url,
/// e.g. `https://rickandmortyapi.com/api/location/3` resolves to `3`.
pub fn resolve_reference(reference: Option<&str>) -> Result<i64, MalformedReference> {
    let Some(reference) = reference else {
        return Err(MalformedReference::Missing);
    };
    if reference.is_empty() {
        return Err(MalformedReference::Missing);
    }

    let malformed = || MalformedReference::NoTrailingId(reference.to_string());
    let (_, tail) = reference.rsplit_once('/').ok_or_else(malformed)?;
    if tail.is_empty() || !tail.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    tail.parse::<i64>().map_err(|_| malformed())
}

pub fn resolve_references<'a, I>(references: I) -> Vec<Result<i64, MalformedReference>>
where
    I: IntoIterator<Item = &'a str>,
{
    references
        .into_iter()
        .map(|reference| resolve_reference(Some(reference)))
        .collect()
}
