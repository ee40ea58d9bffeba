use crate::error::Result;
use async_trait::async_trait;
use reelswarm_core::pipeline::{RecordSink, StageResult};
use reelswarm_core::record::MovieRecord;
use reelswarm_core::StageError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

pub const CSV_HEADERS: [&str; 15] = [
    "id",
    "title",
    "score",
    "url",
    "vote_count",
    "actor_count",
    "genres",
    "regions",
    "release_date",
    "has_cover",
    "has_trailer",
    "hot_comments",
    "summary",
    "cover_path",
    "trailer_path",
];

const UTF8_BOM: &str = "\u{feff}";

/// Quotes a field when it contains a delimiter, quote or line break.
pub fn quote_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn json_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

fn path_field(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default()
}

/// One CSV line (with trailing CRLF) for `record`, in [`CSV_HEADERS`] order.
pub fn format_row(record: &MovieRecord) -> String {
    let movie = &record.movie;
    let fields = [
        movie.id.clone(),
        movie.title.clone(),
        movie.score.clone(),
        movie.url.clone(),
        movie.vote_count.map(|v| v.to_string()).unwrap_or_default(),
        movie.actor_count.map(|v| v.to_string()).unwrap_or_default(),
        json_list(&movie.genres),
        json_list(&movie.regions),
        movie.release_date.clone().unwrap_or_default(),
        flag(record.has_cover),
        flag(record.has_trailer),
        json_list(&movie.hot_comments),
        movie.summary.clone().unwrap_or_default(),
        path_field(&record.cover_path),
        path_field(&record.trailer_path),
    ];
    let mut line = fields
        .iter()
        .map(|f| quote_field(f))
        .collect::<Vec<_>>()
        .join(",");
    line.push_str("\r\n");
    line
}

/// Appends one row per finished movie to `douban_movies_{node_id}.csv`.
pub struct CsvSink {
    path: PathBuf,
    lock: Mutex<()>,
    rows: AtomicU64,
    covers: AtomicU64,
    trailers: AtomicU64,
}

impl CsvSink {
    pub fn new(data_dir: &Path, node_id: &str) -> Self {
        Self {
            path: data_dir.join(format!("douban_movies_{}.csv", node_id)),
            lock: Mutex::new(()),
            rows: AtomicU64::new(0),
            covers: AtomicU64::new(0),
            trailers: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, record: &MovieRecord) -> Result<()> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let is_new = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let mut chunk = String::new();
        if is_new {
            chunk.push_str(UTF8_BOM);
            chunk.push_str(&CSV_HEADERS.join(","));
            chunk.push_str("\r\n");
        }
        chunk.push_str(&format_row(record));
        file.write_all(chunk.as_bytes()).await?;
        file.flush().await?;

        self.rows.fetch_add(1, Ordering::Relaxed);
        if record.has_cover {
            self.covers.fetch_add(1, Ordering::Relaxed);
        }
        if record.has_trailer {
            self.trailers.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn log_summary(&self) {
        info!(
            "Saved {} movies to {} (covers: {}, trailers: {})",
            self.rows.load(Ordering::Relaxed),
            self.path.display(),
            self.covers.load(Ordering::Relaxed),
            self.trailers.load(Ordering::Relaxed)
        );
    }
}

#[async_trait]
impl RecordSink for CsvSink {
    async fn write(&self, record: &MovieRecord) -> StageResult<()> {
        self.append(record)
            .await
            .map_err(|e| StageError::Sink(e.to_string()))
    }
}
