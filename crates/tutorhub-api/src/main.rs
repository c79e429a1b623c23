use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tutorhub_api::Server;
use tutorhub_core::{
    validation::{validate_email, validate_password},
    DatabaseBackend, NewUser, Settings,
};
use tutorhub_store::Database;

#[derive(Parser)]
#[command(name = "tutorhub")]
#[command(about = "TutorHub - tutoring forum and tutor directory API", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding default.toml, {env}.toml and local.toml
    #[arg(long, global = true, env = "TUTORHUB_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Environment name used to pick the {env}.toml layer
    #[arg(long, global = true, env = "APP_ENV", default_value = "development")]
    env: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve {
        /// Override server.host
        #[arg(long)]
        host: Option<String>,

        /// Override server.port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Create a staff superuser account
    CreateSuperuser {
        #[arg(long)]
        email: String,

        #[arg(long, env = "TUTORHUB_SUPERUSER_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Delete expired password-reset tokens and exit
    PurgeResets,

    /// Print the effective configuration as TOML (secrets omitted)
    ShowConfig,
}

fn init_tracing(settings: &Settings) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_dir = cli.config_dir.unwrap_or_else(Settings::default_config_dir);
    let settings = Settings::load_from_sources(&config_dir, &cli.env)
        .with_context(|| format!("loading configuration from {}", config_dir.display()))?;
    init_tracing(&settings);
    info!(
        config_dir = %config_dir.display(),
        env = %settings.env,
        "configuration loaded"
    );

    match cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
    }) {
        Commands::Serve { host, port } => serve(settings, host, port).await,
        Commands::CreateSuperuser { email, password } => {
            create_superuser(&settings, &email, &password)
        }
        Commands::PurgeResets => {
            let db = Database::from_config(&settings.database)?;
            let purged = db.delete_expired_password_resets(Utc::now())?;
            println!("Purged {} expired password reset token(s)", purged);
            Ok(())
        }
        Commands::ShowConfig => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}

async fn serve(mut settings: Settings, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        settings.server.host = host;
    }
    if let Some(port) = port {
        settings.server.port = port;
    }
    settings.validate()?;
    if settings.database.backend == DatabaseBackend::Memory {
        warn!("using the in-memory store; data is lost on shutdown");
    }
    let server = Server::new(settings)?;
    server.run().await?;
    Ok(())
}

fn create_superuser(settings: &Settings, email: &str, password: &str) -> Result<()> {
    if settings.database.backend == DatabaseBackend::Memory {
        warn!("database.backend is memory; the account will not outlive this command");
    }
    let email = validate_email(email)?;
    validate_password(password)?;

    let db = Database::from_config(&settings.database)?;
    let user = db.create_user(NewUser {
        email,
        password_hash: tutorhub_core::hash_password(password)?,
        is_staff: true,
        is_superuser: true,
        ..NewUser::default()
    })?;
    info!(user_id = user.id, "created superuser");
    println!("Created superuser {} (id {})", user.email, user.id);
    Ok(())
}
