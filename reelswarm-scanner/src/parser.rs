use crate::error::{Result, ScanError};
use reelswarm_core::pipeline::{PageParser, StageResult};
use reelswarm_core::record::{DetailFields, ListingBatch, ListingEntry};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::debug;

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| ScanError::ParseError(format!("selector '{}': {}", css, e)))
}

/// Collapses whitespace-only lines and trims the rest.
pub fn clean_text(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

/// Parser for the Douban listing API, movie detail pages and trailer pages.
pub struct DoubanParser {
    cover: Selector,
    hot_comments: Selector,
    summaries: Vec<Selector>,
    trailer_link: Selector,
    video_source: Selector,
}

impl DoubanParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            cover: selector(r#"meta[property="og:image"]"#)?,
            hot_comments: selector("div#hot-comments span.short")?,
            // First match wins: full text, then the short forms.
            summaries: vec![
                selector("#link-report-intra .all.hidden")?,
                selector(r#"#link-report-intra [property="v:summary"]"#)?,
                selector(r#"#link-report-intra .short [property="v:summary"]"#)?,
                selector("#link-report-intra .indent")?,
            ],
            trailer_link: selector("a.related-pic-video")?,
            video_source: selector("video source")?,
        })
    }

    /// The listing endpoint returns a JSON array. An element that does not
    /// fit [`ListingEntry`] still counts toward the page size but carries no
    /// fields, so validation rejects it.
    pub fn listing(&self, body: &str) -> Result<ListingBatch> {
        let items: Vec<Value> = serde_json::from_str(body)
            .map_err(|e| ScanError::ParseError(format!("listing is not a JSON array: {}", e)))?;
        let entries = items
            .into_iter()
            .map(|item| {
                serde_json::from_value::<ListingEntry>(item).unwrap_or_else(|e| {
                    debug!("Unreadable listing entry: {}", e);
                    ListingEntry::default()
                })
            })
            .collect();
        Ok(ListingBatch { entries })
    }

    fn summary(&self, document: &Html) -> Option<String> {
        self.summaries
            .iter()
            .map(|sel| {
                document
                    .select(sel)
                    .map(element_text)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .map(|text| clean_text(&text))
            .find(|text| !text.is_empty())
    }

    pub fn detail(&self, body: &str) -> Result<DetailFields> {
        if body.trim().is_empty() {
            return Err(ScanError::ParseError("empty detail page".to_string()));
        }
        let document = Html::parse_document(body);

        let cover = document
            .select(&self.cover)
            .filter_map(|el| el.value().attr("content"))
            .map(str::trim)
            .find(|c| !c.is_empty())
            .map(str::to_string);

        let hot_comments = document
            .select(&self.hot_comments)
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        let trailer_page = document
            .select(&self.trailer_link)
            .filter_map(|el| el.value().attr("href"))
            .map(str::trim)
            .find(|h| !h.is_empty())
            .map(str::to_string);

        Ok(DetailFields {
            cover,
            hot_comments,
            summary: self.summary(&document),
            trailer_page,
        })
    }

    pub fn video(&self, body: &str) -> Result<Option<String>> {
        let document = Html::parse_document(body);
        Ok(document
            .select(&self.video_source)
            .filter_map(|el| el.value().attr("src"))
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string))
    }
}

impl PageParser for DoubanParser {
    fn parse_listing(&self, body: &str) -> StageResult<ListingBatch> {
        Ok(self.listing(body)?)
    }

    fn parse_detail(&self, body: &str) -> StageResult<DetailFields> {
        Ok(self.detail(body)?)
    }

    fn parse_video(&self, body: &str) -> StageResult<Option<String>> {
        Ok(self.video(body)?)
    }
}
