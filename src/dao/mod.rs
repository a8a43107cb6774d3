/// Persistence backends for accounts, sessions and messages.
pub mod chat_store;
/// Database model definitions.
pub mod models;
/// Storage abstraction layer for database operations.
pub mod storage;
