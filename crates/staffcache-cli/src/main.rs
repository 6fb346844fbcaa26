//! Staffcache - command-line access to the hospital personnel records API.
//!
//! Wires the credential store, response cache and clients together once at
//! startup, then runs a single command against them.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use staffcache_core::api::{ApiRequest, Method};
use staffcache_core::{ApiError, CachedClient, Config};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "staffcache", version, about = "Hospital personnel records from the command line")]
struct Cli {
    /// API base URL (overrides the config file and STAFFCACHE_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Write logs to a file in this directory instead of stderr
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in and store the credential
    Login {
        #[arg(long, env = "STAFFCACHE_USERNAME")]
        username: Option<String>,
    },
    /// Invalidate the session on the server and forget the credential
    Logout,
    /// Show the stored credential
    Status,
    /// Read a resource, e.g. `get /api/pegawai`
    Get { path: String },
    /// Send a mutating request, e.g. `send put /api/riwayat-pendidikan/7 --data '{...}'`
    Send {
        method: String,
        path: String,
        /// JSON request body
        #[arg(long)]
        data: Option<String>,
    },
    /// Fetch every configured dashboard source in one combined view
    Dashboard,
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<&PathBuf>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "staffcache.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_ref());

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(base_url) = cli.base_url.clone() {
        config.base_url = base_url;
    }
    info!(base_url = %config.base_url, storage = ?config.storage, "Configuration loaded");

    let client = config.build_client()?;
    let _sweeper = config
        .sweep_interval()
        .map(|interval| client.cache().spawn_sweeper(interval));

    match run(cli.command, &mut config, &client).await {
        Err(e) if e.downcast_ref::<ApiError>().is_some_and(ApiError::requires_login) => {
            eprintln!("{e}. Run `staffcache login` first.");
            std::process::exit(2);
        }
        other => other,
    }
}

async fn run(command: Command, config: &mut Config, client: &CachedClient) -> Result<()> {
    match command {
        Command::Login { username } => login(config, client, username).await,
        Command::Logout => {
            client.client().logout().await;
            println!("Logged out.");
            Ok(())
        }
        Command::Status => {
            status(client);
            Ok(())
        }
        Command::Get { path } => {
            let response = client.get(&path).await?;
            print_body(&response.body);
            response.error_for_status()?;
            Ok(())
        }
        Command::Send { method, path, data } => {
            let method: Method = method
                .to_uppercase()
                .parse()
                .with_context(|| format!("Unknown HTTP method {method}"))?;
            let mut request = ApiRequest::new(method, path);
            if let Some(data) = data {
                let body: Value =
                    serde_json::from_str(&data).context("--data is not valid JSON")?;
                request = request.with_body(body);
            }
            let response = client.send(&request).await?;
            print_body(&response.body);
            response.error_for_status()?;
            Ok(())
        }
        Command::Dashboard => {
            if config.dashboard.is_empty() {
                anyhow::bail!(
                    "No dashboard sources configured in {}",
                    Config::config_path()?.display()
                );
            }
            let view = client.aggregate("dashboard", &config.dashboard).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(())
        }
    }
}

async fn login(config: &mut Config, client: &CachedClient, username: Option<String>) -> Result<()> {
    let username = match username.or_else(|| config.last_username.clone()) {
        Some(username) => username,
        None => prompt_username()?,
    };
    let password = match std::env::var("STAFFCACHE_PASSWORD") {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password("Password: ")?,
    };

    println!("Authenticating...");
    let credential = client.client().login(&username, &password).await?;

    config.last_username = Some(username);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Login successful, session valid until {}.", credential.expires_at);
    Ok(())
}

fn prompt_username() -> Result<String> {
    print!("Username: ");
    io::stdout().flush()?;

    let mut username = String::new();
    io::stdin().read_line(&mut username)?;
    Ok(username.trim().to_string())
}

fn status(client: &CachedClient) {
    let credentials = client.client().credentials();
    match credentials.valid_credential() {
        Some(credential) => {
            let minutes = credentials
                .expires_in()
                .map(|d| d.as_secs() / 60)
                .unwrap_or_default();
            println!("Logged in ({} token), expires in {}m", credential.token_type, minutes);
            if !credential.user.is_null() {
                println!("User: {}", credential.user);
            }
        }
        None => println!("Not logged in."),
    }
}

fn print_body(body: &str) {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| body.to_string())
        ),
        Err(_) => println!("{body}"),
    }
}
