use async_trait::async_trait;
use mongodb::bson::{Document, doc, to_bson};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::info;

use super::{StoreError, UserStore};
use crate::types::{Message, User};

const USERS_COLLECTION: &str = "users";
const DUPLICATE_KEY: i32 = 11000;

pub struct MongoUserStore {
    database: Database,
    users: Collection<User>,
}

impl MongoUserStore {
    /// Connects and makes sure the unique indexes exist.
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await?;
        let database = client.database(database);
        let users = database.collection::<User>(USERS_COLLECTION);

        for field in ["username", "email"] {
            let mut keys = Document::new();
            keys.insert(field, 1);
            let index = IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().unique(true).build())
                .build();
            users.create_index(index).await?;
        }

        info!("Connected to MongoDB database {}", database.name());
        Ok(MongoUserStore { database, users })
    }
}

fn map_write_error(err: mongodb::error::Error) -> StoreError {
    if let ErrorKind::Write(WriteFailure::WriteError(write_error)) = err.kind.as_ref()
        && write_error.code == DUPLICATE_KEY
    {
        let field = if write_error.message.contains("email") {
            "email"
        } else if write_error.message.contains("username") {
            "username"
        } else {
            "_id"
        };
        return StoreError::Conflict(field);
    }
    StoreError::Mongo(err)
}

#[async_trait]
impl UserStore for MongoUserStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.find_one(doc! { "_id": id }).await?)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.find_one(doc! { "username": username }).await?)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.find_one(doc! { "email": email }).await?)
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, StoreError> {
        let filter = doc! {
            "$or": [ { "email": identifier }, { "username": identifier } ]
        };
        Ok(self.users.find_one(filter).await?)
    }

    async fn insert(&self, user: User) -> Result<(), StoreError> {
        self.users.insert_one(&user).await.map_err(map_write_error)?;
        Ok(())
    }

    async fn replace(&self, user: &User) -> Result<bool, StoreError> {
        let result = self
            .users
            .replace_one(doc! { "_id": &user.id }, user)
            .await
            .map_err(map_write_error)?;
        Ok(result.matched_count > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = self.users.delete_one(doc! { "_id": id }).await?;
        Ok(result.deleted_count > 0)
    }

    async fn push_message(&self, user_id: &str, message: Message) -> Result<bool, StoreError> {
        let message = to_bson(&message)?;
        let result = self
            .users
            .update_one(
                doc! { "_id": user_id },
                doc! { "$push": { "messages": message } },
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn pull_message(&self, user_id: &str, message_id: &str) -> Result<bool, StoreError> {
        let result = self
            .users
            .update_one(
                doc! { "_id": user_id },
                doc! { "$pull": { "messages": { "_id": message_id } } },
            )
            .await?;
        Ok(result.modified_count > 0)
    }

    async fn set_accepting_messages(
        &self,
        user_id: &str,
        accepting: bool,
    ) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .find_one_and_update(
                doc! { "_id": user_id },
                doc! { "$set": { "isAcceptingMessage": accepting } },
            )
            .return_document(ReturnDocument::After)
            .await?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.database.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }
}
