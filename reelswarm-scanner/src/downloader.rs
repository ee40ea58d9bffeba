use crate::config::ScannerConfig;
use crate::error::{Result, ScanError};
use async_trait::async_trait;
use reelswarm_core::pipeline::MediaStore;
use reelswarm_core::record::MediaOutcome;
use reelswarm_core::request::MovieContext;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use url::Url;

const ILLEGAL_FILENAME_CHARS: &[char] = &[
    '\\', '/', ':', '*', '?', '"', '<', '>', '|', '\n', '\r', '\t',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Cover,
    Trailer,
}

impl MediaKind {
    pub fn dir_name(&self) -> &'static str {
        match self {
            MediaKind::Cover => "cover",
            MediaKind::Trailer => "trailer",
        }
    }
}

/// Replaces characters that are illegal in file names with `_`. Blank
/// titles become `untitled`.
pub fn safe_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if ILLEGAL_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Extension taken from the last `.` of the URL path, or `bin`.
pub fn extension_of(url: &str) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    let file = path.rsplit('/').next().unwrap_or_default();
    match file.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            ext.to_ascii_lowercase()
        }
        _ => "bin".to_string(),
    }
}

/// Path of a media file relative to the files directory:
/// `{cover|trailer}/{safe_title}_{id}.{ext}`.
pub fn media_path(kind: MediaKind, movie: &MovieContext, url: &str) -> PathBuf {
    Path::new(kind.dir_name()).join(format!(
        "{}_{}.{}",
        safe_filename(&movie.title),
        movie.id,
        extension_of(url)
    ))
}

/// Downloads covers and trailers under the files directory.
pub struct MediaDownloader {
    client: Client,
    files_dir: PathBuf,
}

impl MediaDownloader {
    pub fn new(config: &ScannerConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout * 4)
            .connect_timeout(config.timeout / 2)
            .build()?;
        Ok(Self {
            client,
            files_dir: config.files_dir.clone(),
        })
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    async fn download(&self, url: &str, relative: &Path) -> Result<()> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ScanError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        let bytes = response.bytes().await?;

        let target = self.files_dir.join(relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &bytes).await?;
        debug!("Saved {} bytes to {}", bytes.len(), target.display());
        Ok(())
    }

    async fn fetch_one(
        &self,
        kind: MediaKind,
        movie: &MovieContext,
        url: Option<&str>,
    ) -> Option<PathBuf> {
        let url = url?;
        let relative = media_path(kind, movie, url);
        match self.download(url, &relative).await {
            Ok(()) => Some(relative),
            Err(e) => {
                warn!("Failed to download {} for movie {}: {}", kind.dir_name(), movie.id, e);
                None
            }
        }
    }
}

#[async_trait]
impl MediaStore for MediaDownloader {
    async fn store_media(&self, movie: &MovieContext) -> MediaOutcome {
        let (cover_path, trailer_path) = tokio::join!(
            self.fetch_one(MediaKind::Cover, movie, movie.cover.as_deref()),
            self.fetch_one(MediaKind::Trailer, movie, movie.trailer.as_deref()),
        );
        MediaOutcome {
            cover_path,
            trailer_path,
        }
    }
}
