mod config;
mod connection;
mod error;
mod models;
mod store;

pub use config::MongoConfig;
use error::MongoDaoError;
pub use store::MongoChatStore;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        match err {
            MongoDaoError::Decode { id, reason } => StorageError::corrupted(id, reason),
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
