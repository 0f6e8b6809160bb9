use sea_orm::sea_query::TableCreateStatement;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Schema,
};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::entities;

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Establishes a connection pool to the database.
pub async fn establish_connection(
    database_url: &str,
    max_connections: u32,
) -> Result<DbPool, DbErr> {
    debug!("Configuring database connection for {}", database_url);

    let mut opt = ConnectOptions::new(database_url.to_owned());
    opt.max_connections(max_connections)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(false);

    let pool = Database::connect(opt).await?;
    info!(
        "Connected to database with max_connections={}",
        max_connections
    );
    Ok(pool)
}

pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, DbErr> {
    establish_connection(&cfg.database_url, cfg.db_max_connections).await
}

/// Creates any missing tables from the entity definitions. Used at startup
/// when `auto_migrate` is set and by the test harness.
pub async fn create_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let schema = Schema::new(db.get_database_backend());

    execute_create(db, schema.create_table_from_entity(entities::CheckoutSession)).await?;
    execute_create(db, schema.create_table_from_entity(entities::CheckoutItem)).await?;
    execute_create(db, schema.create_table_from_entity(entities::Order)).await?;
    execute_create(db, schema.create_table_from_entity(entities::OrderItem)).await?;
    execute_create(db, schema.create_table_from_entity(entities::Cart)).await?;
    execute_create(db, schema.create_table_from_entity(entities::CartItem)).await?;

    info!("Schema is up to date");
    Ok(())
}

async fn execute_create(
    db: &DatabaseConnection,
    mut statement: TableCreateStatement,
) -> Result<(), DbErr> {
    statement.if_not_exists();
    db.execute(db.get_database_backend().build(&statement))
        .await?;
    Ok(())
}
