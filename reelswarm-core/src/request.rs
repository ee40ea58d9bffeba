use crate::error::{ContextError, SwarmError};
use crate::listing::ListingPage;
use crate::record::{DetailFields, ListingEntry};
use serde::{Deserialize, Serialize};
use url::Url;

/// Current layout of [`MovieContext`]. Payloads with any other version are
/// rejected when popped.
pub const CONTEXT_VERSION: u8 = 1;

/// Urgency given to detail and video pages. Larger than any listing urgency,
/// so an in-progress movie is always finished before listing expansion.
pub const ITEM_URGENCY: i64 = 999_999_999;

/// Request urgency: higher is more urgent.
///
/// The frontier pops by ascending score, and a request's score is its
/// negated urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(i64);

impl Priority {
    pub const fn new(value: i64) -> Self {
        Priority(value)
    }

    pub const fn item() -> Self {
        Priority(ITEM_URGENCY)
    }

    /// The priority whose frontier score is `score`.
    pub const fn from_score(score: i64) -> Self {
        Priority(-score)
    }

    pub const fn value(&self) -> i64 {
        self.0
    }

    pub const fn score(&self) -> i64 {
        -self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    List,
    Detail,
    Video,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::List => "list",
            Stage::Detail => "detail",
            Stage::Video => "video",
        }
    }
}

/// Fields accumulated for one movie as it moves from listing to detail to
/// video page. Each stage builds a new context; none edits one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieContext {
    pub version: u8,
    pub id: String,
    pub title: String,
    pub score: String,
    pub vote_count: Option<u64>,
    pub actor_count: Option<u64>,
    pub url: String,
    pub genres: Vec<String>,
    pub regions: Vec<String>,
    pub release_date: Option<String>,
    pub cover: Option<String>,
    pub trailer: Option<String>,
    pub hot_comments: Vec<String>,
    pub summary: Option<String>,
}

impl MovieContext {
    /// Validates a raw listing entry. `id` and an absolute http(s) `url` are
    /// required; everything else defaults.
    pub fn from_listing(entry: &ListingEntry) -> Result<Self, ContextError> {
        let id = entry
            .id_string()
            .filter(|id| !id.trim().is_empty())
            .ok_or(ContextError::MissingField("id"))?;

        let url = entry
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(ContextError::MissingField("url"))?;

        let parsed = Url::parse(url).map_err(|e| ContextError::InvalidField {
            field: "url",
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ContextError::InvalidField {
                field: "url",
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        Ok(Self {
            version: CONTEXT_VERSION,
            id: id.trim().to_string(),
            title: entry.title.clone().unwrap_or_default(),
            score: entry.score_string(),
            vote_count: entry.vote_count,
            actor_count: entry.actor_count,
            url: url.to_string(),
            genres: entry.types.clone(),
            regions: entry.regions.clone(),
            release_date: entry.release_date.clone(),
            cover: None,
            trailer: None,
            hot_comments: Vec::new(),
            summary: None,
        })
    }

    pub fn with_detail(&self, detail: DetailFields) -> Self {
        Self {
            cover: detail.cover,
            hot_comments: detail.hot_comments,
            summary: detail.summary,
            ..self.clone()
        }
    }

    pub fn with_trailer(&self, trailer: Option<String>) -> Self {
        Self {
            trailer,
            ..self.clone()
        }
    }

    pub fn check_version(&self) -> Result<(), ContextError> {
        if self.version != CONTEXT_VERSION {
            return Err(ContextError::UnsupportedVersion {
                found: self.version,
                expected: CONTEXT_VERSION,
            });
        }
        Ok(())
    }
}

/// A unit of crawl work as stored in the frontier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub url: String,
    pub priority: Priority,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<MovieContext>,
}

impl CrawlRequest {
    pub fn listing(page: &ListingPage, base_url: &str) -> Self {
        Self {
            url: page.url(base_url),
            priority: page.priority(),
            stage: Stage::List,
            context: None,
        }
    }

    pub fn detail(context: MovieContext) -> Self {
        Self {
            url: context.url.clone(),
            priority: Priority::item(),
            stage: Stage::Detail,
            context: Some(context),
        }
    }

    pub fn video(url: impl Into<String>, context: MovieContext) -> Self {
        Self {
            url: url.into(),
            priority: Priority::item(),
            stage: Stage::Video,
            context: Some(context),
        }
    }

    pub fn to_payload(&self) -> Result<String, SwarmError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a frontier payload, rejecting item stages without a context
    /// and contexts from another layout version.
    pub fn from_payload(payload: &str) -> Result<Self, SwarmError> {
        let request: CrawlRequest = serde_json::from_str(payload)?;
        match (&request.stage, &request.context) {
            (Stage::List, _) => {}
            (_, Some(context)) => context.check_version()?,
            (_, None) => return Err(ContextError::MissingField("context").into()),
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::{DEFAULT_LISTING_URL, Interval};

    fn entry(id: Option<&str>, url: Option<&str>) -> ListingEntry {
        ListingEntry {
            id: id.map(|s| serde_json::Value::String(s.to_string())),
            title: Some("肖申克的救赎".to_string()),
            score: Some(serde_json::json!("9.7")),
            url: url.map(str::to_string),
            types: vec!["犯罪".to_string(), "剧情".to_string()],
            ..ListingEntry::default()
        }
    }

    #[test]
    fn test_priority_score_is_negated_urgency() {
        assert_eq!(Priority::item().score(), -999_999_999);
        assert_eq!(Priority::from_score(5000).score(), 5000);
        assert_eq!(Priority::new(-10000).score(), 10000);
    }

    #[test]
    fn test_context_requires_id_and_url() {
        assert_eq!(
            MovieContext::from_listing(&entry(None, Some("https://movie.douban.com/subject/1/"))),
            Err(ContextError::MissingField("id"))
        );
        assert_eq!(
            MovieContext::from_listing(&entry(Some("1"), None)),
            Err(ContextError::MissingField("url"))
        );
        assert!(matches!(
            MovieContext::from_listing(&entry(Some("1"), Some("ftp://x/y"))),
            Err(ContextError::InvalidField { field: "url", .. })
        ));
        assert!(matches!(
            MovieContext::from_listing(&entry(Some("  "), Some("https://x/"))),
            Err(ContextError::MissingField("id"))
        ));
    }

    #[test]
    fn test_context_from_valid_listing() {
        let ctx =
            MovieContext::from_listing(&entry(
                Some("1292052"),
                Some("https://movie.douban.com/subject/1292052/"),
            ))
                .unwrap();
        assert_eq!(ctx.version, CONTEXT_VERSION);
        assert_eq!(ctx.id, "1292052");
        assert_eq!(ctx.score, "9.7");
        assert_eq!(ctx.genres.len(), 2);
        assert!(ctx.cover.is_none());
    }

    #[test]
    fn test_stages_build_new_contexts() {
        let ctx = MovieContext::from_listing(&entry(Some("7"), Some("https://x.test/7"))).unwrap();
        let detailed = ctx.with_detail(DetailFields {
            cover: Some("https://img.test/7.jpg".to_string()),
            hot_comments: vec!["great".to_string()],
            summary: Some("plot".to_string()),
            trailer_page: None,
        });
        let finished = detailed.with_trailer(Some("https://vid.test/7.mp4".to_string()));

        assert!(ctx.cover.is_none());
        assert_eq!(detailed.cover.as_deref(), Some("https://img.test/7.jpg"));
        assert!(detailed.trailer.is_none());
        assert_eq!(finished.trailer.as_deref(), Some("https://vid.test/7.mp4"));
        assert_eq!(finished.summary.as_deref(), Some("plot"));
    }

    #[test]
    fn test_payload_round_trip_and_validation() {
        let page = ListingPage::new(3, Interval::new(100, 90), 0);
        let listing = CrawlRequest::listing(&page, DEFAULT_LISTING_URL);
        let decoded = CrawlRequest::from_payload(&listing.to_payload().unwrap()).unwrap();
        assert_eq!(decoded, listing);
        assert!(!listing.to_payload().unwrap().contains("context"));

        let orphan = r#"{"url":"https://x/1","priority":999999999,"stage":"detail"}"#;
        assert!(CrawlRequest::from_payload(orphan).is_err());

        let mut ctx =
            MovieContext::from_listing(&entry(Some("9"), Some("https://x.test/9"))).unwrap();
        ctx.version = 0;
        let stale = CrawlRequest::detail(ctx).to_payload().unwrap();
        assert!(matches!(
            CrawlRequest::from_payload(&stale),
            Err(SwarmError::Context(ContextError::UnsupportedVersion { found: 0, .. }))
        ));
    }
}
