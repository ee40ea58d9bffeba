use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use colored::Colorize;
use reelswarm_core::config::{SwarmConfig, resolve_node_id};
use reelswarm_core::monitor::{ClusterView, render_text};
use reelswarm_core::store::{KeyValueStore, RedisStore};
use reelswarm_core::worker::{StopReason, WorkerSummary};
use reelswarm_scanner::ScannerConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use url::Url;

pub const DEFAULT_LOG_DIRECTIVE: &str = "reelswarm=info";
pub const VERBOSE_LOG_DIRECTIVE: &str = "reelswarm=debug";

/// Filter directives for the `reelswarm*` crates. `RUST_LOG` wins when set.
pub fn log_directive(verbose: bool) -> &'static str {
    if verbose {
        VERBOSE_LOG_DIRECTIVE
    } else {
        DEFAULT_LOG_DIRECTIVE
    }
}

fn build_filter(verbose: bool) -> EnvFilter {
    let base = log_directive(verbose);
    let crate_level = base.trim_start_matches("reelswarm=");
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{base},reelswarm_core={lvl},reelswarm_scanner={lvl}",
            base = base,
            lvl = crate_level
        ))
    })
}

/// Installs the fmt subscriber on stderr so stdout stays clean for reports.
pub fn init_tracing(verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(verbose))
        .with_writer(std::io::stderr)
        .try_init();
}

/// Hides any password in a store URL before it is printed.
pub fn redact_store_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

pub fn is_affirmative(response: &str) -> bool {
    let response = response.trim().to_lowercase();
    response == "y" || response == "yes"
}

pub fn delay_from_secs(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        bail!("delay must be a non-negative number of seconds, got {}", secs);
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Expands `~` and environment variables in a path argument.
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

fn optional_string<'a>(args: &'a ArgMatches, id: &str) -> Option<&'a String> {
    args.try_get_one::<String>(id).ok().flatten()
}

fn optional_u64(args: &ArgMatches, id: &str) -> Option<u64> {
    args.try_get_one::<u64>(id).ok().flatten().copied()
}

/// Builds the coordination config from any subcommand's arguments. Arguments
/// a subcommand does not define keep their defaults.
pub fn swarm_config_from_args(args: &ArgMatches) -> Result<SwarmConfig> {
    let mut config = SwarmConfig::default();

    if let Some(url) = optional_string(args, "redis-url") {
        config = config.with_store_url(url.clone());
    }
    if let Some(ns) = optional_string(args, "namespace") {
        if ns.trim().is_empty() {
            bail!("namespace must not be empty");
        }
        config = config.with_namespace(ns.trim());
    }
    if let Some(key) = optional_string(args, "registry-key") {
        config = config.with_registry_key(key.clone());
    }
    if let Some(target) = optional_u64(args, "target") {
        config = config.with_target(target);
    }
    if let Some(slots) = args.try_get_one::<usize>("concurrency").ok().flatten() {
        if *slots == 0 {
            bail!("concurrency must be at least 1");
        }
        config = config.with_concurrency(*slots);
    }
    if let Some(secs) = optional_u64(args, "interval") {
        config = config.with_monitor_interval(Duration::from_secs(secs.max(1)));
    }
    if let Some(secs) = optional_u64(args, "idle-timeout") {
        config = config.with_idle_timeout(Some(Duration::from_secs(secs)));
    }

    let node_id = resolve_node_id(optional_string(args, "node-id").map(String::as_str));
    Ok(config.with_node_id(node_id))
}

pub fn scanner_config_from_args(args: &ArgMatches) -> Result<ScannerConfig> {
    let mut config = ScannerConfig::default();

    if let Some(secs) = args.try_get_one::<f64>("delay").ok().flatten() {
        config = config.with_download_delay(delay_from_secs(*secs)?);
    }
    if let Some(pool) = optional_string(args, "proxy-pool") {
        Url::parse(pool).with_context(|| format!("invalid proxy pool URL '{}'", pool))?;
        config = config.with_proxy_pool(Some(pool.clone()));
    }
    if let Some(dir) = optional_string(args, "files-dir") {
        config = config.with_files_dir(expand_path(dir));
    }
    if let Some(dir) = optional_string(args, "data-dir") {
        config = config.with_data_dir(expand_path(dir));
    }
    Ok(config)
}

pub async fn connect_store(url: &str) -> Result<Arc<dyn KeyValueStore>> {
    let store = RedisStore::connect(url)
        .await
        .with_context(|| format!("could not reach store at {}", redact_store_url(url)))?;
    Ok(Arc::new(store))
}

pub fn stop_reason_label(reason: StopReason) -> &'static str {
    match reason {
        StopReason::TargetReached => "target reached",
        StopReason::Idle => "frontier idle",
        StopReason::Shutdown => "shut down",
        StopReason::StoreUnavailable => "store unavailable",
    }
}

pub fn format_summary(node_id: &str, summary: &WorkerSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} Node {} stopped: {}\n",
        "✓".green(),
        node_id,
        stop_reason_label(summary.reason)
    ));
    out.push_str(&format!("  Pages fetched:     {}\n", summary.pages));
    out.push_str(&format!("  Movies saved:      {}\n", summary.items));
    out.push_str(&format!("  Movies dropped:    {}\n", summary.dropped_items));
    out.push_str(&format!("  Fetch failures:    {}\n", summary.fetch_failures));
    out.push_str(&format!("  Malformed pages:   {}\n", summary.malformed));
    out.push_str(&format!("  Rejected records:  {}\n", summary.rejected_records));
    out.push_str(&format!("  Duplicates:        {}\n", summary.duplicates));
    out
}

/// One-shot status output for `status --format`.
pub fn render_status(view: &ClusterView, format: &str, store_label: &str) -> Result<String> {
    match format {
        "json" => Ok(serde_json::to_string_pretty(view)?),
        "text" => Ok(render_text(view, store_label)),
        other => bail!("unknown format '{}'", other),
    }
}
