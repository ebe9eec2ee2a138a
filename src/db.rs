use rocket_db_pools::{Database, sqlx};
use sqlx::PgPool;
use sqlx::migrate::Migrator;

#[derive(Database)]
#[database("tourbook_db")]
pub struct TourbookDb(sqlx::PgPool);

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply any pending migrations before the server starts taking traffic.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    log::info!("checking database migration state");

    // `run` ensures the migrations table exists, verifies checksums, and applies
    // any pending migrations before we start serving requests.
    MIGRATOR.run(pool).await?;

    log::info!("database migrations up to date");
    Ok(())
}
