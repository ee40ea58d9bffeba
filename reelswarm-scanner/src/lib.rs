pub mod config;
pub mod csv_sink;
pub mod downloader;
pub mod error;
pub mod fetcher;
pub mod parser;

pub use config::ScannerConfig;
pub use csv_sink::CsvSink;
pub use downloader::MediaDownloader;
pub use error::ScanError;
pub use fetcher::HttpFetcher;
pub use parser::DoubanParser;

use reelswarm_core::pipeline::Collaborators;
use std::sync::Arc;

/// Concrete collaborators for a worker, plus handles to the fetcher and sink
/// so the caller can log their totals at exit.
pub struct ScannerStack {
    pub collaborators: Collaborators,
    pub fetcher: Arc<HttpFetcher>,
    pub sink: Arc<CsvSink>,
}

pub fn build_stack(config: &ScannerConfig, node_id: &str) -> error::Result<ScannerStack> {
    let fetcher = Arc::new(HttpFetcher::new(config.clone())?);
    let sink = Arc::new(CsvSink::new(&config.data_dir, node_id));
    let collaborators = Collaborators {
        fetcher: fetcher.clone(),
        parser: Arc::new(DoubanParser::new()?),
        media: Arc::new(MediaDownloader::new(config)?),
        sink: sink.clone(),
    };
    Ok(ScannerStack {
        collaborators,
        fetcher,
        sink,
    })
}
