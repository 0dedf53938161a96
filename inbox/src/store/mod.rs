//! The user collection: one document per account with the received messages
//! embedded in it.
//!
//! `username`, `email` and `_id` are unique across the collection. Every
//! backend enforces this and reports collisions as [`StoreError::Conflict`].
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::types::{Message, User};

pub mod filesystem;
pub mod memory;
pub mod mongo;

pub use filesystem::FilesystemUserStore;
pub use memory::MemoryUserStore;
pub use mongo::MongoUserStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("duplicate value for unique field {0}")]
    Conflict(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("mongodb error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("bson error: {0}")]
    Bson(#[from] mongodb::bson::ser::Error),

    #[error("snapshot task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Matches either the email or the username.
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, StoreError>;

    async fn insert(&self, user: User) -> Result<(), StoreError>;

    /// Overwrites the document with the same `_id`. Returns false when there is none.
    async fn replace(&self, user: &User) -> Result<bool, StoreError>;

    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Returns false when the user does not exist.
    async fn push_message(&self, user_id: &str, message: Message) -> Result<bool, StoreError>;

    /// Returns false when nothing was removed.
    async fn pull_message(&self, user_id: &str, message_id: &str) -> Result<bool, StoreError>;

    /// Returns the updated document, or None when the user does not exist.
    async fn set_accepting_messages(
        &self,
        user_id: &str,
        accepting: bool,
    ) -> Result<Option<User>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub async fn build_store(config: &StoreConfig) -> Result<Arc<dyn UserStore>, StoreError> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryUserStore::new())),
        StoreConfig::Filesystem { base_dir, filename } => {
            Ok(Arc::new(FilesystemUserStore::open(base_dir, filename)?))
        }
        StoreConfig::Mongodb { uri, database } => {
            Ok(Arc::new(MongoUserStore::connect(uri, database).await?))
        }
    }
}
