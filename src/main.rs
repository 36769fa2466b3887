//! ipintel - command-line interface for the IP intelligence library.

use anyhow::Result;
use clap::Parser;
use ipintel::{Config, LookupService};
use std::net::IpAddr;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the lookup tool.
#[derive(Parser, Debug)]
#[clap(author, version, about = "IP intelligence lookups: datacenter/proxy/VPN/Tor detection", long_about = None)]
struct Args {
    /// IP addresses to look up
    #[clap(required_unless_present = "stats")]
    ips: Vec<String>,

    /// Print service statistics instead of performing lookups
    #[clap(long)]
    stats: bool,

    /// Compact single-line JSON output
    #[clap(long)]
    compact: bool,

    /// Enable verbose logging (use -vv for debug output)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ipintel={default}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn emit<T: serde::Serialize>(value: &T, compact: bool) -> Result<()> {
    let rendered = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{rendered}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let cfg = Config::from_env();
    let service = LookupService::new(&cfg).await?;

    let mut bad_input = false;
    if args.stats {
        emit(&service.stats().await, args.compact)?;
    }

    for raw in &args.ips {
        // Malformed addresses are rejected here; the lookup itself
        // never fails.
        let ip: IpAddr = match raw.trim().parse() {
            Ok(ip) => ip,
            Err(_) => {
                eprintln!("invalid IP address: {raw}");
                bad_input = true;
                continue;
            }
        };
        let info = service.lookup(ip).await;
        emit(&info, args.compact)?;
    }

    service.shutdown().await;

    if bad_input {
        std::process::exit(1);
    }
    Ok(())
}
