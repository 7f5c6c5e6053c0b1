//! Storefront Auth - operational CLI for credentials and session maintenance

use std::io::{BufRead, Write};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use storefront_auth::auth::Authenticator;
use storefront_auth::config::{Config, StoreConfig};
use storefront_auth::credentials::Credentials;
use storefront_auth::passwords::PasswordValidator;
use storefront_auth::session::Sessions;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Storefront Auth - account and session administration
#[derive(Parser, Debug)]
#[command(name = "storefront-auth")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Set or replace a user's password, read from stdin
    SetPassword {
        /// User identifier
        user_id: String,
    },
    /// Verify a password read from stdin against the stored hash
    CheckPassword {
        /// User identifier
        user_id: String,
    },
    /// Flip all overdue sessions to the expired state
    CleanupSessions,
    /// Expire every session sharing the given sticky id
    CloseSessions {
        /// Sticky id of the session chain to revoke
        sticky_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration from file if specified, otherwise use default loading
    let config = if let Some(ref path) = cli.config {
        Config::from_file(path)?
    } else {
        Config::load()
    };

    // Initialize tracing
    let log_level = if cli.verbose {
        "storefront_auth=trace".to_string()
    } else {
        config.log_level.clone()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &config.store {
        StoreConfig::Sqlite { path } => info!("Store: SQLite at {:?}", path),
        StoreConfig::Memory => info!("Store: in-memory (nothing will persist)"),
    }

    let backend = config.open_backend()?;
    let denylist: Vec<&str> = config.password_denylist.iter().map(String::as_str).collect();
    let validator = PasswordValidator::with_denylist(&denylist);
    let sessions = Sessions::new(Arc::clone(&backend));
    let credentials = Credentials::with_cost(backend, validator, config.bcrypt_cost);
    let auth = Authenticator::new(sessions, credentials);

    match cli.command {
        Command::SetPassword { user_id } => {
            let password = read_password()?;
            match auth.credentials().set_credentials(&user_id, &password).await {
                Ok(()) => println!("Password updated for {user_id}"),
                Err(err) if err.is_user_safe() => {
                    eprintln!("Rejected: {err}");
                    std::process::exit(1);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Command::CheckPassword { user_id } => {
            let password = read_password()?;
            match auth.credentials().check_password(&user_id, &password).await {
                Ok(()) => println!("Password accepted for {user_id}"),
                Err(err) if err.is_user_safe() => {
                    eprintln!("Rejected: {err}");
                    std::process::exit(1);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Command::CleanupSessions => {
            let changed = auth.sessions().close_expired().await?;
            println!("{changed} overdue sessions flipped from active to expired");
        }
        Command::CloseSessions { sticky_id } => {
            auth.sessions().close(&sticky_id).await?;
            println!("Closed all sessions for sticky id {sticky_id}");
        }
    }

    Ok(())
}

/// Read one password line from stdin. Reading from stdin rather than the
/// terminal lets the command be driven by pipes and provisioning scripts.
fn read_password() -> std::io::Result<String> {
    eprint!("Password: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
