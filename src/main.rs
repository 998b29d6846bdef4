use dotenvy::dotenv;
use loyalty_ledger::{
    config::{self, database},
    context::LedgerContext,
    core::{ledger, user},
    errors::Result,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();

    // 3. Load settings (LOYALTY_CONFIG, then loyalty.toml, then defaults)
    let settings = config::settings::load_default_settings()
        .inspect_err(|e| error!("Failed to load settings: {}", e))?;
    info!(database_url = %settings.database_url, "Loaded settings");

    // 4. Connect and make sure the schema exists
    let db = database::create_connection(&settings.database_url)
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|_| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to create tables: {}", e))?;

    // 5. Build the shared context from the [points] and [cache] sections
    let ctx = LedgerContext::from_settings(db, &settings);
    info!(
        cents_per_point = ctx.policy.cents_per_point,
        cache_enabled = ctx.cache.is_enabled(),
        "Ledger context ready"
    );

    // 6. Seed the configured superuser
    if let Some(superuser) = &settings.superuser {
        let created = user::bootstrap_superuser(&ctx.database, superuser)
            .await
            .inspect_err(|e| error!("Failed to bootstrap superuser: {}", e))?;
        info!(user_id = created.id, utorid = %created.utorid, "Superuser ready");
    }

    // 7. Check every cached balance against its transaction history
    let reports = ledger::reconcile_all(&ctx.database).await?;
    let drifted: Vec<_> = reports.iter().filter(|r| !r.is_consistent()).collect();
    for report in &drifted {
        warn!(
            account_id = report.account_id,
            cached = report.cached,
            posted_sum = report.posted_sum,
            "Cached balance does not match transaction history"
        );
    }
    info!(
        accounts = reports.len(),
        drifted = drifted.len(),
        "Ledger reconciliation finished"
    );

    Ok(())
}
