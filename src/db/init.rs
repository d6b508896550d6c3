use clickhouse::Client;

use crate::db::schema::ALL_TABLES;
use crate::error::StoreError;

pub async fn init_database(client: &Client) -> Result<(), StoreError> {
    tracing::info!("Initializing database tables...");

    // Create tables if they don't exist (won't drop existing data)
    for ddl in ALL_TABLES {
        client.query(ddl).execute().await?;
    }

    Ok(())
}
