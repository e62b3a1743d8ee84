use mongodb::{bson::doc, Client, Database};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::Result;

pub async fn get_db_client(config: &AppConfig) -> Result<Database> {
    let client = Client::with_uri_str(&config.database_url).await?;
    let db = client.database(&config.database_name);

    // Verify the server is reachable before serving traffic
    match db.run_command(doc! { "ping": 1 }).await {
        Ok(_) => info!("✅ Connected to database: {}", config.database_name),
        Err(e) => warn!(
            "⚠️ Database '{}' may not be reachable yet: {}",
            config.database_name, e
        ),
    }

    Ok(db)
}
