use std::time::Duration;

use mongodb::{Client, Database, bson::doc};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
};

const PING_INTERVAL: Duration = Duration::from_millis(500);

/// Open the configured database and ping it until it answers or
/// `config.ping_attempts` is exhausted.
pub async fn open_database(config: &MongoConfig) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(config.options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(&config.database_name);

    let mut attempts = 0;
    loop {
        attempts += 1;
        match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => {
                debug!(database = %config.database_name, attempts, "MongoDB reachable");
                return Ok((client, database));
            }
            Err(source) if attempts >= config.ping_attempts => {
                return Err(MongoDaoError::InitialPing { attempts, source });
            }
            Err(err) => {
                warn!(database = %config.database_name, attempts, error = %err, "MongoDB ping failed");
                sleep(PING_INTERVAL).await;
            }
        }
    }
}
