//! Housekeeping: delete finished notifications past their retention window.
//!
//! Only terminal rows (`success`, `failed`, `error`) are removed; anything
//! still `new` or `in_progress` is left to the queue.

use clap::Parser;
use reportq::store::postgres::PgStore;

#[derive(Parser)]
#[command(name = "purge_db", about = "Delete finished notifications older than N days")]
struct Args {
    /// Retention window in days
    #[arg(long, default_value_t = 30)]
    days: i64,
    /// Report what would be deleted without deleting it
    #[arg(long)]
    dry_run: bool,
    #[arg(long, env = "DATABASE_URL", default_value = "postgres://localhost/reportq")]
    database_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    if args.days < 0 {
        anyhow::bail!("--days must not be negative");
    }

    println!("Connecting to database...");
    let store = PgStore::connect(&args.database_url).await?;

    let cutoff = chrono::Utc::now() - chrono::Duration::days(args.days);
    if args.dry_run {
        let count = store.count_finished(cutoff).await?;
        println!("{} finished notifications older than {} would be deleted.", count, cutoff);
        return Ok(());
    }

    let deleted = store.purge_finished(cutoff).await?;
    println!("Deleted {} finished notifications older than {}.", deleted, cutoff);
    Ok(())
}
