mod access;
mod audit;
mod cache;
mod entities;
mod errors;
mod jobs;
mod roles;
mod settings;
mod storage;
mod web;

use clap::Parser;
use migration::MigratorTrait;
use miette::{IntoDiagnostic, Result};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "concordia",
    version,
    about = "Consent-based PHI access decision service"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // init storage (database) and apply migrations
    let db = storage::init(&settings.database).await?;
    migration::Migrator::up(&db, None).await.into_diagnostic()?;

    // role directory for the emergency branch
    let role_directory: Arc<dyn roles::RoleDirectory> = match &settings.auth.base_url {
        Some(base_url) => Arc::new(roles::HttpRoleDirectory::new(
            base_url,
            settings.auth.request_timeout_ms,
        )?),
        None => {
            tracing::warn!(
                "auth.base_url is not set; break-glass requests will be denied for lack of a role"
            );
            Arc::new(roles::StaticRoleDirectory::new())
        }
    };

    // the service object: built once, shared by reference
    let service = Arc::new(access::ConsentService::new(
        db.clone(),
        &settings,
        role_directory,
    ));

    // background jobs
    let _scheduler = jobs::init_scheduler(db).await?;

    // start web server
    web::serve(settings, service).await?;
    Ok(())
}
