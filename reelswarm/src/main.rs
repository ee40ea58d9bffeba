use anyhow::{Context, Result};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use reelswarm::commands::command_argument_builder;
use reelswarm::handlers::*;
use reelswarm_core::frontier::Frontier;
use reelswarm_core::monitor::{ClusterMonitor, ClusterView, render_text};
use reelswarm_core::{KeyValueStore, print_banner};
use reelswarm_core::swarm::{reset_swarm, seed_frontier};
use reelswarm_core::worker::{ProgressCallback, SwarmWorker, unix_now};
use reelswarm_scanner::build_stack;
use reelswarm_tui::{MonitorMessage, create_monitor_channel, run_monitor};
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");
    let verbose = chosen_command.get_flag("verbose");

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    if chosen_command.subcommand().is_none() {
        // No subcommand provided, just show the banner
        return;
    }

    let outcome = match chosen_command.subcommand() {
        Some(("init", primary_command)) => handle_init(primary_command, verbose).await,
        Some(("work", primary_command)) => handle_work(primary_command, verbose, quiet).await,
        Some(("monitor", primary_command)) => handle_monitor(primary_command).await,
        Some(("status", primary_command)) => handle_status(primary_command, verbose).await,
        Some(("ping", primary_command)) => handle_ping(primary_command, verbose).await,
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = outcome {
        eprintln!("{} {:#}", "✗".red(), e);
        std::process::exit(1);
    }
}

async fn handle_init(args: &ArgMatches, verbose: bool) -> Result<()> {
    init_tracing(verbose);
    let config = swarm_config_from_args(args)?;
    let force = args.get_flag("force");
    let label = redact_store_url(&config.store_url);

    if !force {
        println!(
            "[WARNING] This deletes the frontier, fingerprints and goal sets under '{}' on {}.",
            config.namespace, label
        );
        print!("Do you want to continue? [y/N]: ");
        io::stdout().flush()?;

        let mut response = String::new();
        io::stdin().read_line(&mut response)?;
        if !is_affirmative(&response) {
            println!("\nInitialization cancelled.");
            return Ok(());
        }
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(format!("Connecting to {}", label));

    let store = connect_store(&config.store_url).await?;
    let keys = config.keys();

    spinner.set_message("Clearing swarm state");
    let removed = reset_swarm(&store, &keys).await?;

    spinner.set_message("Seeding the frontier");
    let frontier = Frontier::new(store.clone(), &keys.requests);
    let seeded = seed_frontier(&frontier, &config.listing_url).await?;
    store.close().await?;

    spinner.finish_and_clear();
    println!(
        "{} Removed {} keys and queued {} listing requests in {}",
        "✓".green(),
        removed,
        seeded,
        keys.requests
    );
    Ok(())
}

fn url_path(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| match u.query() {
            Some(q) => format!("{}?{}", u.path(), q),
            None => u.path().to_string(),
        })
        .unwrap_or_else(|| url.to_string())
}

async fn handle_work(args: &ArgMatches, verbose: bool, quiet: bool) -> Result<()> {
    init_tracing(verbose);
    let config = swarm_config_from_args(args)?;
    let scanner_config = scanner_config_from_args(args)?;
    let label = redact_store_url(&config.store_url);

    if !quiet {
        println!("\nNode: {}", config.node_id.bold());
        println!("Store: {} (namespace '{}')", label, config.namespace);
        println!("Slots: {}", config.concurrency);
        println!("Target: {} covers and trailers", config.target);
        println!(
            "Output: {} (media in {})\n",
            scanner_config.data_dir.display(),
            scanner_config.files_dir.display()
        );
    }

    let store = connect_store(&config.store_url).await?;
    let keys = config.keys();

    if args.get_flag("fresh") {
        reset_swarm(&store, &keys)
            .await
            .context("could not clear swarm state")?;
    }

    let stack =
        build_stack(&scanner_config, &config.node_id).context("could not build HTTP stack")?;

    // Set up one spinner per slot
    let m = MultiProgress::new();
    let slot_bars: Arc<Mutex<HashMap<usize, ProgressBar>>> = Arc::new(Mutex::new(HashMap::new()));
    if !quiet {
        let style = ProgressStyle::default_spinner().template("{spinner:.cyan} Slot {msg}")?;
        let mut bars = slot_bars
            .lock()
            .map_err(|_| anyhow::anyhow!("progress bars poisoned"))?;
        for i in 0..config.concurrency {
            let pb = m.add(ProgressBar::new_spinner());
            pb.set_style(style.clone());
            pb.enable_steady_tick(Duration::from_millis(100));
            pb.set_message(format!("{}: idle", i));
            bars.insert(i, pb);
        }
    }

    let bars_clone = slot_bars.clone();
    let progress_callback: ProgressCallback = Arc::new(move |slot: usize, url: String| {
        if let Ok(bars) = bars_clone.try_lock()
            && let Some(pb) = bars.get(&slot)
        {
            pb.set_message(format!("{}: {}", slot, url_path(&url)));
        }
    });

    let worker = SwarmWorker::new(store.clone(), config.clone(), stack.collaborators.clone())
        .with_progress_callback(progress_callback);

    let seeded = seed_frontier(worker.frontier(), &config.listing_url).await?;
    info!("Pushed {} seed listing requests", seeded);

    let shutdown = worker.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight requests");
            shutdown.shutdown();
        }
    });

    let outcome = worker.run().await;

    if let Ok(bars) = slot_bars.lock() {
        for pb in bars.values() {
            pb.finish_and_clear();
        }
    }
    m.clear()?;

    stack.fetcher.log_stats();
    stack.sink.log_summary();
    if let Err(e) = store.close().await {
        warn!("Closing store connection failed: {}", e);
    }

    let summary = outcome?;
    println!("\n{}", format_summary(&config.node_id, &summary));
    println!("CSV: {}", stack.sink.path().display());
    Ok(())
}

async fn handle_monitor(args: &ArgMatches) -> Result<()> {
    let config = swarm_config_from_args(args)?;
    let label = redact_store_url(&config.store_url);
    let store = connect_store(&config.store_url).await?;
    let monitor = ClusterMonitor::new(
        store,
        &config.keys(),
        config.target,
        config.stale_threshold.as_secs() as i64,
    );
    let interval = config.monitor_interval;

    if args.get_flag("plain") {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let view = monitor.snapshot(unix_now()).await;
                    // Clear screen and home the cursor
                    print!("\x1b[2J\x1b[H{}", render_text(&view, &label));
                    io::stdout().flush()?;
                }
                _ = tokio::signal::ctrl_c() => {
                    println!("\nMonitor stopped");
                    return Ok(());
                }
            }
        }
    }

    let (tx, rx) = create_monitor_channel();
    let should_exit = Arc::new(AtomicBool::new(false));

    let poller = {
        let should_exit = should_exit.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            while !should_exit.load(Ordering::Relaxed) {
                ticker.tick().await;
                let view: ClusterView = monitor.snapshot(unix_now()).await;
                if tx.send(MonitorMessage::View(view)).is_err() {
                    break;
                }
            }
            let _ = tx.send(MonitorMessage::Stopped);
        })
    };

    let ui_exit = should_exit.clone();
    tokio::task::spawn_blocking(move || run_monitor(rx, ui_exit, label)).await??;

    should_exit.store(true, Ordering::Relaxed);
    poller.abort();
    Ok(())
}

async fn handle_status(args: &ArgMatches, verbose: bool) -> Result<()> {
    init_tracing(verbose);
    let config = swarm_config_from_args(args)?;
    let label = redact_store_url(&config.store_url);
    let format = args
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("text");

    let store = connect_store(&config.store_url).await?;
    let monitor = ClusterMonitor::new(
        store.clone(),
        &config.keys(),
        config.target,
        config.stale_threshold.as_secs() as i64,
    );
    let view = monitor.snapshot(unix_now()).await;
    print!("{}", render_status(&view, format, &label)?);
    if format == "json" {
        println!();
    }
    store.close().await?;

    if matches!(view, ClusterView::Unreachable { .. }) {
        anyhow::bail!("store became unreachable while reading status");
    }
    Ok(())
}

async fn handle_ping(args: &ArgMatches, verbose: bool) -> Result<()> {
    init_tracing(verbose);
    let config = swarm_config_from_args(args)?;
    let label = redact_store_url(&config.store_url);

    let started = std::time::Instant::now();
    let store = connect_store(&config.store_url).await?;
    store.ping().await?;
    println!(
        "{} {} answered in {} ms",
        "✓".green(),
        label,
        started.elapsed().as_millis()
    );
    store.close().await?;
    Ok(())
}
