use clap::Parser;
use miette::Result;
use rolegate::access::loader;
use rolegate::{jobs, settings, storage, user_sync, web};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "rolegate",
    version,
    about = "Role-based URL access gate with remember-me logins"
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

    // access rules
    let policy = match &settings.access.policies_dir {
        Some(dir) => loader::load_policies(dir)?,
        None => {
            tracing::info!("No policies_dir configured, using built-in access rules");
            loader::builtin_policy()?
        }
    };
    tracing::info!(
        rules = policy.rules.len(),
        default = ?policy.default,
        "Access policy ready"
    );

    // init storage (database)
    let db = storage::init(&settings.database).await?;

    if let Some(users_file) = &settings.bootstrap.users_file {
        user_sync::sync_users_from_file(&db, users_file).await?;
    }

    let cleanup_schedule = settings.remember_me.cleanup_schedule.clone();
    let state = web::AppState::new(settings, db, policy);

    // keep the scheduler alive for the lifetime of the server
    let _scheduler =
        jobs::init_scheduler(state.db.clone(), state.remember_me.clone(), &cleanup_schedule)
            .await?;

    web::serve(state).await
}
