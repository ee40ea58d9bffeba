pub mod completion;
pub mod config;
pub mod dedup;
pub mod error;
pub mod frontier;
pub mod listing;
pub mod monitor;
pub mod pipeline;
pub mod record;
pub mod registry;
pub mod request;
pub mod store;
pub mod swarm;
pub mod worker;

pub use config::{SwarmConfig, SwarmKeys};
pub use error::{ContextError, Result, StageError, StoreError, SwarmError};
pub use store::{KeyValueStore, MemoryStore, RedisStore};

use colored::Colorize;

pub fn print_banner() {
    let banner = r#"
  ┬─┐┌─┐┌─┐┬  ┌─┐┬ ┬┌─┐┬─┐┌┬┐
  ├┬┘├┤ ├┤ │  └─┐│││├─┤├┬┘│││
  ┴└─└─┘└─┘┴─┘└─┘└┴┘┴ ┴┴└─┴ ┴"#;
    println!("{}", banner.bright_cyan());
    println!(
        "  {} {}\n",
        "distributed movie crawl coordinator".dimmed(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
