//! graph-connect - command line client
//!
//! Signs in with Microsoft identity and sends a sample mail through Microsoft Graph.

#![deny(clippy::all)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use graph_connect::auth::graph::GraphClient;
use graph_connect::auth::{AuthSession, AzureAdProvider, IdentityProvider};
use graph_connect::cache::CredentialCache;
use graph_connect::config::Config;
use graph_connect::connect::send_connect_mail;
use graph_connect::error::AppError;

const SUCCESS_MESSAGE: &str = "Check your Inbox, you have a new message.";
const FAILURE_MESSAGE: &str = "The email couldn't be sent. Check the log for errors.";

/// Microsoft Graph Connect sample
#[derive(Parser, Debug)]
#[command(name = "graph-connect", version, about)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in (silently if possible) and show the connected account
    Connect,
    /// Send the sample mail, to yourself unless --to is given
    SendMail {
        /// Recipient address
        #[arg(long)]
        to: Option<String>,
        /// Skip sharing the profile picture
        #[arg(long)]
        no_picture: bool,
    },
    /// Show the signed-in account
    Status,
    /// Sign out and forget cached credentials
    Disconnect,
}

fn main() {
    let cli = Cli::parse();

    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config, cli.verbose);

    info!("Starting {} v{}", config.app.name, env!("CARGO_PKG_VERSION"));

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli.command, config)) {
        error!("{:#}", e);
        match e.downcast_ref::<AppError>() {
            Some(app_error) => eprintln!("{}", app_error.user_message()),
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

/// Initialize tracing/logging.
fn init_logging(config: &Config, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

async fn run(command: Command, config: Config) -> Result<()> {
    let cache = match CredentialCache::load_default() {
        Ok(cache) => cache,
        Err(e) => {
            warn!("{}; credentials will not be remembered", e);
            CredentialCache::in_memory()
        }
    };

    let provider = AzureAdProvider::new(&config.oauth, cache);
    let session = AuthSession::with_provider(&config.oauth, provider);

    if let Some(account) = session.restore().await {
        info!("Found cached session for {}", account.username);
    }

    match command {
        Command::Connect => connect(&session, &config).await,
        Command::SendMail { to, no_picture } => send_mail(&session, &config, to, !no_picture).await,
        Command::Status => {
            println!("{}", session.store().status().describe());
            Ok(())
        }
        Command::Disconnect => {
            session.disconnect().await;
            println!("Disconnected.");
            Ok(())
        }
    }
}

async fn connect<P: IdentityProvider>(session: &AuthSession<P>, config: &Config) -> Result<()> {
    let token = session
        .acquire_default()
        .await
        .into_result()
        .map_err(AppError::from)?;

    let graph = GraphClient::new(&config.api.graph_base_url).map_err(AppError::from)?;
    let profile = graph
        .get_user_profile(token.as_str())
        .await
        .map_err(AppError::from)?;

    println!(
        "Connected as {} ({})",
        profile.display_name_or_upn(),
        profile.email().unwrap_or_else(|| "no email".to_string())
    );
    Ok(())
}

async fn send_mail<P: IdentityProvider>(
    session: &AuthSession<P>,
    config: &Config,
    to: Option<String>,
    with_picture: bool,
) -> Result<()> {
    let graph = GraphClient::new(&config.api.graph_base_url).map_err(AppError::from)?;

    match send_connect_mail(session, &graph, to.as_deref(), with_picture).await {
        Ok(sent) => {
            info!(
                "Sent mail to {} ({})",
                sent.recipient,
                if sent.with_picture { "with picture" } else { "without picture" }
            );
            println!("{}", SUCCESS_MESSAGE);
            Ok(())
        }
        Err(e) => {
            println!("{}", FAILURE_MESSAGE);
            Err(e.into())
        }
    }
}
