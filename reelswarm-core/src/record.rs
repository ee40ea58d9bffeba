use crate::request::MovieContext;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

/// One object from a listing response, exactly as the listing endpoint
/// returns it. Nothing here is trusted until it passes
/// [`MovieContext::from_listing`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ListingEntry {
    pub id: Option<Value>,
    pub title: Option<String>,
    pub score: Option<Value>,
    pub vote_count: Option<u64>,
    pub actor_count: Option<u64>,
    pub url: Option<String>,
    pub types: Vec<String>,
    pub regions: Vec<String>,
    pub release_date: Option<String>,
}

impl ListingEntry {
    /// The endpoint serves ids as strings, older dumps as numbers.
    pub fn id_string(&self) -> Option<String> {
        match &self.id {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn score_string(&self) -> String {
        match &self.score {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }
}

/// Parsed listing page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingBatch {
    pub entries: Vec<ListingEntry>,
}

impl ListingBatch {
    /// Number of objects the page returned, valid or not. Decides the
    /// follow-up page.
    pub fn count(&self) -> usize {
        self.entries.len()
    }
}

/// What a detail page contributes to a movie.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailFields {
    pub cover: Option<String>,
    pub hot_comments: Vec<String>,
    pub summary: Option<String>,
    pub trailer_page: Option<String>,
}

/// Local files written for one movie.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaOutcome {
    pub cover_path: Option<PathBuf>,
    pub trailer_path: Option<PathBuf>,
}

impl MediaOutcome {
    pub fn has_cover(&self) -> bool {
        self.cover_path.is_some()
    }

    pub fn has_trailer(&self) -> bool {
        self.trailer_path.is_some()
    }
}

/// Terminal item of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct MovieRecord {
    pub movie: MovieContext,
    pub has_cover: bool,
    pub has_trailer: bool,
    pub cover_path: Option<PathBuf>,
    pub trailer_path: Option<PathBuf>,
}

impl MovieRecord {
    /// Combines a finished context with its download outcome.
    ///
    /// Returns `None` when the movie advertised media but none of it could be
    /// stored; such a movie yields no row and no achievement.
    pub fn assemble(movie: MovieContext, media: MediaOutcome) -> Option<Self> {
        let advertised = movie.cover.is_some() || movie.trailer.is_some();
        if advertised && !media.has_cover() && !media.has_trailer() {
            return None;
        }

        Some(Self {
            has_cover: media.has_cover(),
            has_trailer: media.has_trailer(),
            cover_path: media.cover_path,
            trailer_path: media.trailer_path,
            movie,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie(cover: Option<&str>, trailer: Option<&str>) -> MovieContext {
        let entry: ListingEntry = serde_json::from_value(serde_json::json!({
            "id": 42,
            "title": "Test",
            "score": 8.1,
            "url": "https://movie.douban.com/subject/42/"
        }))
        .unwrap();
        let mut ctx = MovieContext::from_listing(&entry).unwrap();
        ctx.cover = cover.map(str::to_string);
        ctx.trailer = trailer.map(str::to_string);
        ctx
    }

    #[test]
    fn test_listing_entry_accepts_numeric_id_and_score() {
        let ctx = movie(None, None);
        assert_eq!(ctx.id, "42");
        assert_eq!(ctx.score, "8.1");
    }

    #[test]
    fn test_listing_entry_tolerates_unknown_fields() {
        let entry: ListingEntry = serde_json::from_str(
            r#"{"id":"1","url":"https://x/1","rank":3,"cover_url":"https://img/1.jpg","is_playable":true}"#,
        )
        .unwrap();
        assert_eq!(entry.id_string().as_deref(), Some("1"));
        assert!(entry.types.is_empty());
    }

    #[test]
    fn test_record_dropped_when_advertised_media_all_failed() {
        let ctx = movie(Some("https://img/42.jpg"), Some("https://vid/42.mp4"));
        assert!(MovieRecord::assemble(ctx, MediaOutcome::default()).is_none());
    }

    #[test]
    fn test_record_kept_with_partial_media() {
        let ctx = movie(Some("https://img/42.jpg"), Some("https://vid/42.mp4"));
        let record = MovieRecord::assemble(
            ctx,
            MediaOutcome {
                cover_path: Some(PathBuf::from("files/cover/Test_42.jpg")),
                trailer_path: None,
            },
        )
        .unwrap();
        assert!(record.has_cover);
        assert!(!record.has_trailer);
    }

    #[test]
    fn test_record_without_media_is_kept() {
        let record = MovieRecord::assemble(movie(None, None), MediaOutcome::default()).unwrap();
        assert!(!record.has_cover && !record.has_trailer);
    }
}
