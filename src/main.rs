use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use tracing::error;

use tsumiki::{Config, Website};

/// Builds a static web app into a deployable distribution tree.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Project root, containing the optional `tsumiki.toml`
    #[arg(short = 'C', long, default_value = ".")]
    root: Utf8PathBuf,

    /// More output, repeat for even more
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Clean and build the distribution tree
    Build {
        /// Print the build report as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Serve the distribution tree
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the task graph as a Mermaid flowchart
    Graph,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match (args.quiet, args.verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };

    if let Err(e) = tsumiki::init_logging(level) {
        eprintln!("Couldn't initialize logging: {e:#}");
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::load(args.root.clone())?;

    match args.command.unwrap_or(Command::Build { json: false }) {
        Command::Build { json } => {
            let website = Website::new(config)?;
            let result = website.build()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
        }
        #[cfg(feature = "server")]
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.serve.host.clone());
            let port = port.unwrap_or(config.serve.port);

            Website::new(config)?.serve(&host, port)?;
        }
        #[cfg(not(feature = "server"))]
        Command::Serve { .. } => {
            anyhow::bail!("This binary was built without the `server` feature");
        }
        Command::Graph => {
            let website = Website::new(config)?;
            print!("{}", website.plan()?);
        }
    }

    Ok(())
}
