use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{StoreError, UserStore};
use crate::types::{Message, User, UserId};

/// The collection itself, without any locking. Shared by the in-memory and
/// the filesystem backends.
#[derive(Default, Debug, Clone)]
pub(crate) struct UserTable {
    users: HashMap<UserId, User>,
}

impl UserTable {
    pub(crate) fn from_users(users: Vec<User>) -> Self {
        UserTable {
            users: users.into_iter().map(|u| (u.id.clone(), u)).collect(),
        }
    }

    pub(crate) fn to_users(&self) -> Vec<User> {
        self.users.values().cloned().collect()
    }

    pub(crate) fn get(&self, id: &str) -> Option<&User> {
        self.users.get(id)
    }

    pub(crate) fn by_username(&self, username: &str) -> Option<&User> {
        self.users.values().find(|u| u.username == username)
    }

    pub(crate) fn by_email(&self, email: &str) -> Option<&User> {
        self.users.values().find(|u| u.email == email)
    }

    pub(crate) fn by_identifier(&self, identifier: &str) -> Option<&User> {
        self.users
            .values()
            .find(|u| u.email == identifier || u.username == identifier)
    }

    /// Rejects `candidate` if another document already holds one of its unique fields.
    fn check_unique(&self, candidate: &User, ignore_id: Option<&str>) -> Result<(), StoreError> {
        for existing in self.users.values() {
            if Some(existing.id.as_str()) == ignore_id {
                continue;
            }
            if existing.username == candidate.username {
                return Err(StoreError::Conflict("username"));
            }
            if existing.email == candidate.email {
                return Err(StoreError::Conflict("email"));
            }
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, user: User) -> Result<(), StoreError> {
        if self.users.contains_key(&user.id) {
            return Err(StoreError::Conflict("_id"));
        }
        self.check_unique(&user, None)?;
        self.users.insert(user.id.clone(), user);
        Ok(())
    }

    pub(crate) fn replace(&mut self, user: &User) -> Result<bool, StoreError> {
        if !self.users.contains_key(&user.id) {
            return Ok(false);
        }
        self.check_unique(user, Some(&user.id))?;
        self.users.insert(user.id.clone(), user.clone());
        Ok(true)
    }

    pub(crate) fn remove(&mut self, id: &str) -> bool {
        self.users.remove(id).is_some()
    }

    pub(crate) fn push_message(&mut self, user_id: &str, message: Message) -> bool {
        match self.users.get_mut(user_id) {
            Some(user) => {
                user.messages.push(message);
                true
            }
            None => false,
        }
    }

    pub(crate) fn pull_message(&mut self, user_id: &str, message_id: &str) -> bool {
        let Some(user) = self.users.get_mut(user_id) else {
            return false;
        };
        let before = user.messages.len();
        user.messages.retain(|m| m.id != message_id);
        user.messages.len() != before
    }

    pub(crate) fn set_accepting(&mut self, user_id: &str, accepting: bool) -> Option<User> {
        let user = self.users.get_mut(user_id)?;
        user.is_accepting_messages = accepting;
        Some(user.clone())
    }
}

/// Process-local store. Everything is lost on restart; meant for tests and
/// local development.
#[derive(Default)]
pub struct MemoryUserStore {
    table: RwLock<UserTable>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: Vec<User>) -> Self {
        MemoryUserStore {
            table: RwLock::new(UserTable::from_users(users)),
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.table.read().get(id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.table.read().by_username(username).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.table.read().by_email(email).cloned())
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, StoreError> {
        Ok(self.table.read().by_identifier(identifier).cloned())
    }

    async fn insert(&self, user: User) -> Result<(), StoreError> {
        self.table.write().insert(user)
    }

    async fn replace(&self, user: &User) -> Result<bool, StoreError> {
        self.table.write().replace(user)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.table.write().remove(id))
    }

    async fn push_message(&self, user_id: &str, message: Message) -> Result<bool, StoreError> {
        Ok(self.table.write().push_message(user_id, message))
    }

    async fn pull_message(&self, user_id: &str, message_id: &str) -> Result<bool, StoreError> {
        Ok(self.table.write().pull_message(user_id, message_id))
    }

    async fn set_accepting_messages(
        &self,
        user_id: &str,
        accepting: bool,
    ) -> Result<Option<User>, StoreError> {
        Ok(self.table.write().set_accepting(user_id, accepting))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
