//! Re-run Stripe product/price synchronization for every plan.
//!
//! Usage:
//!   cargo run --bin reconcile-plans

use starchat_billing::{PlanSynchronizer, StripeClient};
use starchat_shared::{create_pool, PgStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    starchat_api::init_tracing("info");

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL not set"))?;
    let stripe = StripeClient::from_env()?;
    let pool = create_pool(&database_url, 2).await?;

    let currency = stripe.config().currency.clone();
    let synchronizer = PlanSynchronizer::new(stripe, PgStore::new(pool), currency);
    let summary = synchronizer.resync_all().await?;

    println!(
        "Plans synced: {}, skipped: {}, failed: {}",
        summary.synced, summary.skipped, summary.failed
    );
    if summary.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
