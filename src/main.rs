use std::env;
use std::net::IpAddr;
use std::process;
use std::time::Duration;

use getopts::{Matches, Options};
use tracing::error;
use tracing_subscriber::EnvFilter;

use stubdns::{QueryType, Resolver, ResolverConfig};

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options] HOSTNAME...", program);
    print!("{}", opts.usage(&brief));
}

/// Accepts 1 through 65535.
fn parse_port(value: &str) -> Result<u16, String> {
    match value.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("invalid port `{}`", value)),
        Ok(port) => Ok(port),
    }
}

fn parse_secs(value: &str) -> Result<Duration, String> {
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| format!("invalid number of seconds `{}`", value))
}

fn build_config(matches: &Matches) -> Result<ResolverConfig, String> {
    let mut config = ResolverConfig::default();

    if let Some(qtype) = matches.opt_str("t") {
        config.qtype = qtype.parse::<QueryType>()?;
    }

    if let Some(port) = matches.opt_str("p") {
        config.port = parse_port(&port)?;
    }

    if let Some(timeout) = matches.opt_str("timeout") {
        config.timeout = parse_secs(&timeout)?;
    }

    if let Some(refresh) = matches.opt_str("refresh") {
        config.refresh_interval = parse_secs(&refresh)?;
    }

    let servers = matches
        .opt_strs("s")
        .iter()
        .map(|x| {
            x.parse::<IpAddr>()
                .map_err(|_| format!("invalid server address `{}`", x))
        })
        .collect::<Result<Vec<IpAddr>, String>>()?;
    if !servers.is_empty() {
        config.servers = Some(servers);
    }

    Ok(config)
}

fn init_logging(level: Option<String>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args.first().cloned().unwrap_or_else(|| "stubdns".to_string());

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt("t", "qtype", "Record type to ask for (default A)", "TYPE");
    opts.optmulti(
        "s",
        "server",
        "Nameserver to query instead of the system ones, may be repeated",
        "IP",
    );
    opts.optopt("p", "port", "Nameserver port (default 53)", "PORT");
    opts.optopt("", "timeout", "Seconds to wait for each server (default 5)", "SECS");
    opts.optopt(
        "",
        "refresh",
        "Seconds before the resolution cache is cleared (default 300)",
        "SECS",
    );
    opts.optopt("", "log-level", "Log filter, overrides RUST_LOG", "LEVEL");

    let matches = match opts.parse(args.iter().skip(1)) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("{}", f);
            print_usage(&program, &opts);
            process::exit(1);
        }
    };

    if matches.opt_present("h") || matches.free.is_empty() {
        print_usage(&program, &opts);
        return;
    }

    init_logging(matches.opt_str("log-level"));

    let config = match build_config(&matches) {
        Ok(x) => x,
        Err(msg) => {
            eprintln!("{}", msg);
            process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(x) => x,
        Err(err) => {
            error!(%err, "failed to start runtime");
            process::exit(1);
        }
    };

    let resolver = Resolver::new(config);

    let mut failed = false;
    runtime.block_on(async {
        for hostname in &matches.free {
            match resolver.resolve(hostname).await {
                Ok(Some(addr)) => println!("{} {}", hostname, addr),
                Ok(None) => println!("{}: no address found", hostname),
                Err(err) => {
                    error!(hostname = %hostname, %err, "resolution failed");
                    failed = true;
                }
            }
        }
    });

    if failed {
        process::exit(1);
    }
}
