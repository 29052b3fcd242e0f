use crate::api::api_path;
use crate::config::{options, Config};
use crate::logging::{init_logging, LogConfig};
use crate::router::Router;
use crate::runtime_config::RuntimeConfig;
use crate::server::{AppServer, ServerInitiator, StatusFile};
use crate::services::Services;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

/// Command-line interface for the autograder server
#[derive(Parser)]
#[command(name = "autograder")]
#[command(about = "Autograder server and admin client", long_about = None)]
pub struct Cli {
    /// Config override as `key=value`. Repeatable.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Vec<String>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the primary server until interrupted
    Server,
    /// Send one request to the server over the admin socket
    Call {
        /// Endpoint path, either full (`/api/v03/describe`) or relative (`describe`)
        endpoint: String,

        /// Request JSON
        #[arg(short, long, default_value = "{}")]
        request: String,

        /// When no server is running, start the temporary one with test data
        #[arg(long, default_value_t = false)]
        test: bool,
    },
    /// Show the status of the running server
    Status,
    /// List config options
    Options,
}

/// Execute the CLI command provided by the user
///
/// # Errors
///
/// Returns an error if:
/// - The config cannot be loaded
/// - Logging cannot be initialized
/// - The server cannot start, or another server owns the work dir
/// - The admin socket call fails
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config).context("Failed to load config")?;

    match cli.command {
        Commands::Server => serve(config),
        Commands::Call {
            endpoint,
            request,
            test,
        } => call(config, &endpoint, &request, test),
        Commands::Status => status(&config),
        Commands::Options => {
            for (key, description) in options::describe_all() {
                println!("{key:<24} {description}");
            }
            Ok(())
        }
    }
}

fn start_server(config: Config, initiator: ServerInitiator) -> Result<AppServer> {
    RuntimeConfig::from_config(&config).apply();

    let services = Services::in_memory(config);
    init_logging(
        &LogConfig::from_config(&services.config),
        Some(services.logs.clone()),
    )?;

    let router = Router::with_core_routes(Vec::new()).context("Failed to build routes")?;
    AppServer::start(services, router, initiator)
}

fn serve(config: Config) -> Result<()> {
    let server = start_server(config, ServerInitiator::PrimaryServer)?;
    wait_for_shutdown()?;
    server.stop();
    Ok(())
}

#[cfg(unix)]
fn wait_for_shutdown() -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Failed to register signals")?;
    if let Some(signal) = signals.forever().next() {
        info!(signal, "Received shutdown signal");
    }
    Ok(())
}

#[cfg(not(unix))]
fn wait_for_shutdown() -> Result<()> {
    loop {
        std::thread::park();
    }
}

#[cfg(unix)]
fn call(mut config: Config, endpoint: &str, request: &str, test: bool) -> Result<()> {
    use crate::server::unix_socket;
    use crate::server::StatusError;

    let request: Value = serde_json::from_str(request).context("Request is not valid JSON")?;
    let endpoint = if endpoint.starts_with('/') {
        endpoint.to_string()
    } else {
        api_path(endpoint)
    };

    let (socket_path, temp_server) = match StatusFile::new(&config).unix_socket_path() {
        Ok(path) => (path, None),
        Err(StatusError::NotRunning { .. }) => {
            let initiator = if test {
                config.set(options::LOAD_TEST_DATA.key, true);
                ServerInitiator::CmdTestServer
            } else {
                ServerInitiator::CmdServer
            };
            config.set(options::NO_TASKS.key, true);

            let server = start_server(config, initiator)?;
            (server.socket_path().to_path_buf(), Some(server))
        }
        Err(e) => return Err(e.into()),
    };

    let response = unix_socket::call(&socket_path, &endpoint, request);
    if let Some(server) = temp_server {
        server.stop();
    }

    let response = response.context("Admin socket call failed")?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

#[cfg(not(unix))]
fn call(_config: Config, _endpoint: &str, _request: &str, _test: bool) -> Result<()> {
    anyhow::bail!("the admin socket requires a unix platform")
}

fn status(config: &Config) -> Result<()> {
    match StatusFile::new(config).current()? {
        Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
        None => println!("No server running."),
    }
    Ok(())
}
