//! chartserve CLI - resolve, cache and serve Helm charts

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod exit_codes;

use error::Result;

#[derive(Parser)]
#[command(name = "chartserve")]
#[command(author = "chartserve Contributors")]
#[command(version)]
#[command(about = "Resolve, cache and serve Helm charts over HTTP", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Configuration file (default: <config dir>/chartserve/config.yaml)
    #[arg(long, global = true, env = "CHARTSERVE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Address to listen on (overrides the configuration file)
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },

    /// Download a chart archive
    Pull {
        /// Repository URL (https:// or oci://)
        url: String,

        /// Chart name
        name: String,

        /// Exact version or semver range (default: latest)
        #[arg(long)]
        version: Option<String>,

        /// Output file, or directory with --untar
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Extract the archive instead of saving it
        #[arg(long)]
        untar: bool,
    },

    /// List the files of a chart, or print one of them
    Files {
        /// Repository URL (https:// or oci://)
        url: String,

        /// Chart name
        name: String,

        /// File to print (lists all files when omitted)
        path: Option<String>,

        /// Exact version or semver range (default: latest)
        #[arg(long)]
        version: Option<String>,

        /// Convert the file: json or yaml
        #[arg(long, default_value = "")]
        format: String,

        /// Print the ETag and Cache-Control the server would send
        #[arg(long)]
        headers: bool,
    },

    /// Check how HTTP caches would treat a response
    CacheCheck {
        /// URL to fetch
        url: String,

        /// Evaluate as a shared (proxy) cache instead of a browser cache
        #[arg(long)]
        shared: bool,
    },
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Serve { listen } => commands::serve::run(config, listen).await,

        Commands::Pull {
            url,
            name,
            version,
            output,
            untar,
        } => commands::pull::run(config, &url, &name, version.as_deref(), output.as_deref(), untar).await,

        Commands::Files {
            url,
            name,
            path,
            version,
            format,
            headers,
        } => {
            commands::files::run(
                config,
                &url,
                &name,
                path.as_deref(),
                version.as_deref(),
                &format,
                headers,
            )
            .await
        }

        Commands::CacheCheck { url, shared } => commands::cache_check::run(&url, shared).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    match run(cli).await {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            ExitCode::from(code as u8)
        }
    }
}
