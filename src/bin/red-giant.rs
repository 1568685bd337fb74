//! Binary entry point for the Red Giant HTTP service.
#![forbid(unsafe_code)]

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use red_giant::config::ServerConfig;
use red_giant::{http, logging};

#[derive(Parser, Debug)]
#[command(
    name = "red-giant",
    version,
    about = "Exposure-based data transport server",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        default_value = "info",
        help = "Tracing filter directive, e.g. info or red_giant=debug"
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the adaptive HTTP service.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, help = "Path to a TOML config file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Interface to bind (overrides config file and env)")]
    host: Option<IpAddr>,

    #[arg(long, help = "Listening port (overrides config file and env)")]
    port: Option<u16>,

    #[arg(long, help = "Exposure worker cap (overrides config file and env)")]
    workers: Option<usize>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = logging::init_logging(&cli.log_level) {
        eprintln!("red-giant: {err}");
        return ExitCode::FAILURE;
    }
    let result = match cli.command {
        Command::Serve(args) => run_serve(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("red-giant: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run_serve(args: ServeArgs) -> red_giant::Result<()> {
    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(workers) = args.workers {
        config.workers = workers.max(1);
    }
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(http::serve(config))
}
