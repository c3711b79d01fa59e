use std::marker::PhantomData;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use crate::records::{Collection, Page};

const DEFAULT_BASE_URL: &str = "https://rickandmortyapi.com/api";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("unexpected response body from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Request(_))
    }
}

#[derive(Clone)]
pub struct RickMortyClient {
    http: Client,
    base_url: Url,
}

impl RickMortyClient {
    pub fn new() -> Result<Self, ApiError> {
        Self::with_base_url(DEFAULT_BASE_URL, DEFAULT_TIMEOUT)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: normalize_base(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn collection_url(&self, collection: Collection) -> Result<Url, ApiError> {
        Ok(self.base_url.join(collection.path())?)
    }

    pub fn avatar_url(&self, character_id: i64) -> Result<Url, ApiError> {
        Ok(self
            .base_url
            .join(&format!("character/avatar/{character_id}.jpeg"))?)
    }

    /// Starts a traversal of `collection`. An empty or absent `start` begins at
    /// the collection root.
    pub fn pages<T: DeserializeOwned>(
        &self,
        collection: Collection,
        start: Option<&str>,
    ) -> Result<PageWalker<'_, T>, ApiError> {
        let first = match start.filter(|s| !s.trim().is_empty()) {
            Some(url) => Url::parse(url)?,
            None => self.collection_url(collection)?,
        };
        Ok(PageWalker {
            client: self,
            collection,
            continuation: Some(first),
            visited: 0,
            _marker: PhantomData,
        })
    }

    pub async fn fetch_page<T: DeserializeOwned>(&self, url: &Url) -> Result<Page<T>, ApiError> {
        let response = self.http.get(url.clone()).send().await?;
        Self::decode_response(url, response).await
    }

    pub async fn fetch_avatar(&self, character_id: i64) -> Result<Vec<u8>, ApiError> {
        let url = self.avatar_url(character_id)?;
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn decode_response<T: DeserializeOwned>(
        url: &Url,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|source| ApiError::Decode {
            url: url.to_string(),
            source,
        })
    }

    async fn api_error(response: reqwest::Response) -> ApiError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        ApiError::Api { status, body }
    }
}

/// Cursor over the pages of one collection. Each call to [`PageWalker::next_page`]
/// follows the previous page's `info.next` until the remote reports none.
pub struct PageWalker<'a, T> {
    client: &'a RickMortyClient,
    collection: Collection,
    continuation: Option<Url>,
    visited: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> PageWalker<'_, T> {
    pub async fn next_page(&mut self) -> Result<Option<Page<T>>, ApiError> {
        // A failed fetch leaves the cursor exhausted; the caller aborts the phase.
        let Some(url) = self.continuation.take() else {
            return Ok(None);
        };
        tracing::debug!(collection = %self.collection, %url, "fetching page");
        let page: Page<T> = self.client.fetch_page(&url).await?;
        self.visited += 1;
        self.continuation = page.info.continuation().map(Url::parse).transpose()?;
        Ok(Some(page))
    }

    pub fn pages_visited(&self) -> u32 {
        self.visited
    }

    pub fn is_exhausted(&self) -> bool {
        self.continuation.is_none()
    }
}

fn normalize_base(base_url: &str) -> Result<Url, url::ParseError> {
    if base_url.ends_with('/') {
        Url::parse(base_url)
    } else {
        Url::parse(&format!("{base_url}/"))
    }
}
