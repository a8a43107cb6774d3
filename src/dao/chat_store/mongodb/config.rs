use std::time::Duration;

use mongodb::options::ClientOptions;

use super::error::{MongoDaoError, MongoResult};

const DEFAULT_DATABASE: &str = "tandem";
const APP_NAME: &str = "tandem-back";
/// Pings before a connect attempt is reported to the storage supervisor.
const DEFAULT_PING_ATTEMPTS: u32 = 3;
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings for the MongoDB chat store.
#[derive(Clone)]
pub struct MongoConfig {
    /// Driver options parsed from the URI.
    pub options: ClientOptions,
    /// Database holding the collections.
    pub database_name: String,
    /// Pings tried before a connect attempt fails.
    pub ping_attempts: u32,
}

impl MongoConfig {
    /// Parse `uri`, falling back to the default database name.
    pub async fn from_uri(uri: &str, db_name: Option<&str>) -> MongoResult<Self> {
        let mut options =
            ClientOptions::parse(uri)
                .await
                .map_err(|source| MongoDaoError::InvalidUri {
                    uri: uri.to_owned(),
                    source,
                })?;
        options.app_name.get_or_insert_with(|| APP_NAME.to_owned());
        // Fail fast; the storage supervisor owns the retry schedule.
        options
            .server_selection_timeout
            .get_or_insert(SERVER_SELECTION_TIMEOUT);

        Ok(Self {
            options,
            database_name: db_name.unwrap_or(DEFAULT_DATABASE).to_owned(),
            ping_attempts: DEFAULT_PING_ATTEMPTS,
        })
    }

    /// Read `MONGO_URI` (required), `MONGO_DB` and `MONGO_PING_ATTEMPTS`.
    pub async fn from_env() -> MongoResult<Self> {
        let uri = std::env::var("MONGO_URI")
            .map_err(|_| MongoDaoError::MissingEnvVar { var: "MONGO_URI" })?;
        let db = std::env::var("MONGO_DB").ok();
        let mut config = Self::from_uri(&uri, db.as_deref()).await?;
        if let Some(attempts) = std::env::var("MONGO_PING_ATTEMPTS")
            .ok()
            .and_then(|raw| raw.parse::<u32>().ok())
        {
            config.ping_attempts = attempts.max(1);
        }
        Ok(config)
    }
}
