use clap::{arg, command};
use reelswarm_core::config::{DEFAULT_NAMESPACE, DEFAULT_REGISTRY_KEY, DEFAULT_STORE_URL};

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);

fn store_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        arg!(-r --"redis-url" <URL>)
            .required(false)
            .help("Shared store connection URL")
            .env("REDIS_URL")
            .default_value(DEFAULT_STORE_URL),
    )
    .arg(
        arg!(-n --"namespace" <NAME>)
            .required(false)
            .help("Prefix for the frontier, fingerprint and goal keys")
            .default_value(DEFAULT_NAMESPACE),
    )
    .arg(
        arg!(--"registry-key" <KEY>)
            .required(false)
            .help("Hash holding one status record per node")
            .default_value(DEFAULT_REGISTRY_KEY),
    )
}

fn target_arg() -> clap::Arg {
    arg!(-t --"target" <COUNT>)
        .required(false)
        .help("Stop once this many distinct covers and trailers are stored")
        .env("TARGET_MOVIE_COUNT")
        .value_parser(clap::value_parser!(u64))
        .default_value("2000")
}

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("reelswarm")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("reelswarm")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .arg(
            arg!(-v --"verbose" "Log at debug level")
                .required(false)
                .global(true),
        )
        .subcommand_required(false)
        .subcommand(store_args(
            command!("init")
                .about("Clears all swarm keys and seeds the frontier with the first listing pages")
                .arg(
                    arg!(-f --"force")
                        .help("Skip the confirmation prompt")
                        .required(false),
                ),
        ))
        .subcommand(store_args(
            command!("work")
                .about("Runs a crawler node against the shared store until the target is reached")
                .arg(
                    arg!(--"fresh")
                        .required(false)
                        .help("Clear all swarm keys before starting")
                        .action(clap::ArgAction::SetTrue)
                        .conflicts_with("resume"),
                )
                .arg(
                    arg!(--"resume")
                        .required(false)
                        .help("Continue from the shared state (default)")
                        .action(clap::ArgAction::SetTrue)
                        .conflicts_with("fresh"),
                )
                .arg(
                    arg!(--"node-id" <ID>)
                        .required(false)
                        .help("Identity reported to the node registry (default: node_<hostname>)")
                        .env("NODE_ID"),
                )
                .arg(target_arg())
                .arg(
                    arg!(-c --"concurrency" <SLOTS>)
                        .required(false)
                        .help("Requests this node keeps in flight")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("2"),
                )
                .arg(
                    arg!(--"delay" <SECONDS>)
                        .required(false)
                        .help("Politeness delay between requests from this node")
                        .value_parser(clap::value_parser!(f64))
                        .default_value("2.5"),
                )
                .arg(
                    arg!(--"proxy-pool" <URL>)
                        .required(false)
                        .help("Endpoint returning {\"proxy\": \"host:port\"} for each request")
                        .env("PROXY_POOL_URL"),
                )
                .arg(
                    arg!(--"files-dir" <PATH>)
                        .required(false)
                        .help("Where covers and trailers are written")
                        .default_value("./data"),
                )
                .arg(
                    arg!(--"data-dir" <PATH>)
                        .required(false)
                        .help("Where the CSV output is written")
                        .default_value("./data"),
                )
                .arg(
                    arg!(--"idle-timeout" <SECONDS>)
                        .required(false)
                        .help(
                            "Stop after the frontier has been empty this long \
                             (default: wait forever)",
                        )
                        .value_parser(clap::value_parser!(u64)),
                ),
        ))
        .subcommand(store_args(
            command!("monitor")
                .about("Live view of the frontier, goal sets and every registered node")
                .arg(target_arg())
                .arg(
                    arg!(--"plain")
                        .required(false)
                        .help("Print a refreshing text table instead of the dashboard")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(-i --"interval" <SECONDS>)
                        .required(false)
                        .help("Seconds between polls")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("2"),
                ),
        ))
        .subcommand(store_args(
            command!("status")
                .about("Prints one snapshot of the swarm and exits")
                .arg(target_arg())
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Output format")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                ),
        ))
        .subcommand(store_args(
            command!("ping").about("Checks that the shared store is reachable"),
        ))
}
