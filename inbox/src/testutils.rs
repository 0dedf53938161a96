use async_trait::async_trait;
use chrono::Duration;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use url::Url;

use crate::inbox::{Inbox, InboxSettings};
use crate::mailer::{MailError, Mailer, VerificationEmail};
use crate::session::SessionKeys;
use crate::store::{MemoryUserStore, StoreError, UserStore};
use crate::types::{Message, User};

pub const TEST_SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

/// Captures verification emails instead of sending them.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<VerificationEmail>>,
    fail: AtomicBool,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<VerificationEmail> {
        self.sent.lock().clone()
    }

    pub fn last_code_for(&self, username: &str) -> Option<String> {
        self.sent
            .lock()
            .iter()
            .rev()
            .find(|email| email.username == username)
            .map(|email| email.code.clone())
    }

    pub fn fail_next_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_verification(&self, email: &VerificationEmail) -> Result<(), MailError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MailError::RetriesExceeded);
        }
        self.sent.lock().push(email.clone());
        Ok(())
    }
}

pub struct TestInbox {
    pub inbox: Inbox,
    pub store: Arc<MemoryUserStore>,
    pub mailer: Arc<RecordingMailer>,
}

pub fn test_settings() -> InboxSettings {
    InboxSettings {
        sessions: SessionKeys::new(TEST_SECRET, Duration::days(30)).unwrap(),
        code_ttl: Duration::hours(1),
        // Lowest cost bcrypt accepts, keeps the tests fast.
        password_cost: 4,
        public_url: Url::parse("https://umessage.example").unwrap(),
    }
}

pub fn test_inbox() -> TestInbox {
    let store = Arc::new(MemoryUserStore::new());
    let mailer = Arc::new(RecordingMailer::default());
    let inbox = Inbox::new(store.clone(), mailer.clone(), test_settings());
    TestInbox {
        inbox,
        store,
        mailer,
    }
}

/// Store whose every call fails with an I/O error carrying `FAILING_STORE_DETAIL`.
pub struct FailingStore;

pub const FAILING_STORE_DETAIL: &str = "disk on fire at /var/lib/umessage";

fn store_down<T>() -> Result<T, StoreError> {
    Err(StoreError::Io(io::Error::other(FAILING_STORE_DETAIL)))
}

#[async_trait]
impl UserStore for FailingStore {
    async fn find_by_id(&self, _id: &str) -> Result<Option<User>, StoreError> {
        store_down()
    }

    async fn find_by_username(&self, _username: &str) -> Result<Option<User>, StoreError> {
        store_down()
    }

    async fn find_by_email(&self, _email: &str) -> Result<Option<User>, StoreError> {
        store_down()
    }

    async fn find_by_identifier(&self, _identifier: &str) -> Result<Option<User>, StoreError> {
        store_down()
    }

    async fn insert(&self, _user: User) -> Result<(), StoreError> {
        store_down()
    }

    async fn replace(&self, _user: &User) -> Result<bool, StoreError> {
        store_down()
    }

    async fn delete(&self, _id: &str) -> Result<bool, StoreError> {
        store_down()
    }

    async fn push_message(&self, _user_id: &str, _message: Message) -> Result<bool, StoreError> {
        store_down()
    }

    async fn pull_message(&self, _user_id: &str, _message_id: &str) -> Result<bool, StoreError> {
        store_down()
    }

    async fn set_accepting_messages(
        &self,
        _user_id: &str,
        _accepting: bool,
    ) -> Result<Option<User>, StoreError> {
        store_down()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        store_down()
    }
}

pub fn failing_inbox() -> Inbox {
    Inbox::new(
        Arc::new(FailingStore),
        Arc::new(RecordingMailer::default()),
        test_settings(),
    )
}
