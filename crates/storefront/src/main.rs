//! Storefront - credential operator tool for the storefront API

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::{Config, LoggingConfig};
use storefront_auth::{AuthError, RoleAuthorizer, SessionService, TokenClass};
use storefront_db::{Database, NewProfile};

/// Storefront - issue, rotate and inspect API credentials
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "STOREFRONT_CONFIG", default_value = "config/default.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a user profile
    AddProfile {
        #[arg(long)]
        email: String,
        #[arg(long)]
        username: String,
        /// Role title or id
        #[arg(long, default_value = "customer")]
        role: String,
    },
    /// Start a session for a user and print the token pair
    SignIn {
        #[arg(long)]
        user_id: String,
    },
    /// Rotate a refresh token
    Refresh { token: String },
    /// End a session
    SignOut { session_id: String },
    /// Mint a short-lived admin token
    AdminToken,
    /// Mint an API key
    ApiKey,
    /// Verify a token of the given class and print its payload
    Verify {
        #[arg(long)]
        class: TokenClass,
        token: String,
    },
    /// Check a caller role against a set of required roles
    Authorize {
        #[arg(long)]
        role: i32,
        #[arg(long, value_delimiter = ',')]
        required: Vec<i32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;

    init_logging(&config.logging);

    info!("Starting Storefront v{}", env!("CARGO_PKG_VERSION"));

    let metrics = install_metrics()?;
    let result = run(args.command, &config).await;
    debug!(metrics = %metrics.render(), "Metrics snapshot");
    result
}

async fn run(command: Command, config: &Config) -> Result<()> {
    let authorizer = RoleAuthorizer::from_config(&config.auth).context("Invalid role configuration")?;

    // Token-only commands never touch the database
    if let Command::Authorize { role, required } = &command {
        let allowed = authorizer.authorize(*role, required);
        return print(&json!({
            "role": role,
            "required": required,
            "allowed": allowed,
        }));
    }
    if matches!(
        command,
        Command::AdminToken | Command::ApiKey | Command::Verify { .. }
    ) {
        let service = token_service(config, None)?;
        return run_token_command(&service, command);
    }

    let db = open_database(config).await?;
    let service = token_service(config, Some(db.clone()))?;

    match command {
        Command::AddProfile {
            email,
            username,
            role,
        } => {
            let role_id = resolve_role(&authorizer, &role)?;
            let profile = db
                .insert_profile(NewProfile {
                    email,
                    username,
                    role_id,
                })
                .await?;
            info!(user_id = %profile.id, role_id, "Profile created");
            print(&profile)
        }
        Command::SignIn { user_id } => {
            let profile = db.get_profile(&user_id).await?.ok_or(AuthError::ProfileNotFound)?;
            let passport = service.sign_in(&profile).await?;
            print(&passport)
        }
        Command::Refresh { token } => {
            let passport = service.rotate(&token).await?;
            print(&passport)
        }
        Command::SignOut { session_id } => {
            service.sign_out(&session_id).await?;
            print(&json!({ "signed_out": session_id }))
        }
        other => run_token_command(&service, other),
    }
}

fn run_token_command(service: &SessionService, command: Command) -> Result<()> {
    match command {
        Command::AdminToken => {
            let token = service.factory().issue(TokenClass::Admin, None)?;
            print(&json!({ "class": TokenClass::Admin, "token": token }))
        }
        Command::ApiKey => {
            let token = service.factory().issue(TokenClass::ApiKey, None)?;
            print(&json!({ "class": TokenClass::ApiKey, "token": token }))
        }
        Command::Verify { class, token } => {
            let claims = service.validator().verify(class, &token)?;
            print(&claims)
        }
        other => bail!("{:?} needs the database", other),
    }
}

/// Build the session service; without a database, stores live in memory
fn token_service(config: &Config, db: Option<Database>) -> Result<SessionService> {
    let service = match db {
        Some(db) => {
            let db = Arc::new(db);
            SessionService::from_config(&config.auth, db.clone(), db)
        }
        None => {
            let store = Arc::new(storefront_auth::MemoryStore::new());
            SessionService::from_config(&config.auth, store.clone(), store)
        }
    };
    service.context("Invalid signing key configuration")
}

async fn open_database(config: &Config) -> Result<Database> {
    if let Some(parent) = std::path::Path::new(&config.database.path).parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let db = Database::new(&config.database.url())
        .await
        .with_context(|| format!("Failed to open database at {}", config.database.path))?;
    Ok(db)
}

/// Install the process-wide metrics recorder
///
/// No exporter endpoint is started; the snapshot is logged at exit.
fn install_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install metrics recorder")
}

/// Accept either a configured role title or a numeric id
fn resolve_role(authorizer: &RoleAuthorizer, role: &str) -> Result<i32> {
    let roles = authorizer.roles();
    if let Some(id) = roles.id_of(role) {
        return Ok(id);
    }
    match role.parse::<i32>() {
        Ok(id) if roles.title_of(id).is_some() => Ok(id),
        _ => bail!("Unknown role '{}'", role),
    }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialize logging
///
/// Logs go to stderr so stdout stays machine readable.
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
