use paymongo_checkout::migrator::Migrator;
use sea_orm::{ConnectOptions, Database, DbErr};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::info;

/// Applies (or with `down`, rolls back) the checkout schema.
#[tokio::main]
async fn main() -> Result<(), DbErr> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite://paymongo_checkout.db?mode=rwc".to_string());
    let rollback = std::env::args().nth(1).as_deref() == Some("down");

    info!("Connecting to database: {}", database_url);

    let mut options = ConnectOptions::new(database_url);
    options
        .max_connections(5)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .sqlx_logging(true);

    let db = Database::connect(options).await?;

    if rollback {
        info!("Rolling back all migrations");
        Migrator::down(&db, None).await?;
    } else {
        info!("Starting database migration");
        Migrator::up(&db, None).await?;
    }

    info!("Migration completed successfully");
    Ok(())
}
