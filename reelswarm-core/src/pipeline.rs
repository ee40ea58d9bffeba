//! Seams between the coordination loop and the collaborators that touch the
//! outside world. The core only sees these traits; `reelswarm-scanner`
//! provides the HTTP, HTML and file-system implementations.

use crate::error::StageError;
use crate::record::{DetailFields, ListingBatch, MediaOutcome, MovieRecord};
use crate::request::MovieContext;
use async_trait::async_trait;
use std::sync::Arc;

pub type StageResult<T> = std::result::Result<T, StageError>;

/// A fetched page body.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// Retrieves a page, retrying as it sees fit. An `Err` is final.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> StageResult<FetchedPage>;
}

pub trait PageParser: Send + Sync {
    fn parse_listing(&self, body: &str) -> StageResult<ListingBatch>;

    fn parse_detail(&self, body: &str) -> StageResult<DetailFields>;

    /// The trailer URL, if the page carries one.
    fn parse_video(&self, body: &str) -> StageResult<Option<String>>;
}

/// Downloads a movie's cover and trailer. Individual download failures are
/// reported as missing paths, never as errors.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn store_media(&self, movie: &MovieContext) -> MediaOutcome;
}

#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn write(&self, record: &MovieRecord) -> StageResult<()>;
}

/// The external collaborators a worker drives.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn PageFetcher>,
    pub parser: Arc<dyn PageParser>,
    pub media: Arc<dyn MediaStore>,
    pub sink: Arc<dyn RecordSink>,
}
