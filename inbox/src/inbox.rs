use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Serialize;
use shared::admin_service::ReadinessProbe;
use shared::counter;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::config::Config;
use crate::mailer::{MailError, Mailer, VerificationEmail, build_mailer};
use crate::metrics_defs::{
    MESSAGES_DELETED, MESSAGES_REJECTED, MESSAGES_SENT, SIGNINS, SIGNUPS, VERIFICATIONS,
};
use crate::password::{PasswordError, PasswordHasher};
use crate::session::{InvalidSecret, SessionClaims, SessionError, SessionKeys};
use crate::store::{StoreError, UserStore, build_store};
use crate::types::{Message, User};
use crate::validation::{self, ValidationError};
use crate::verification::{CodeCheck, check_code, consume_code, issue_code};

#[derive(thiserror::Error, Debug)]
pub enum InboxError {
    #[error("{0}")]
    Invalid(ValidationError),

    #[error("Username is already taken")]
    UsernameTaken,

    #[error("User already exists with this email")]
    EmailTaken,

    #[error("User not found")]
    UserNotFound,

    #[error("Account is already verified")]
    AlreadyVerified,

    #[error("Verification code has expired, please sign up again to get a new code")]
    CodeExpired,

    #[error("Incorrect verification code")]
    IncorrectCode,

    #[error("No user found with this email or username")]
    UnknownAccount,

    #[error("Please verify your account before signing in")]
    NotVerified,

    #[error("Incorrect password")]
    IncorrectPassword,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("User is not accepting messages")]
    NotAcceptingMessages,

    #[error("Message not found or already deleted")]
    MessageNotFound,

    #[error("mail error: {0}")]
    Mail(#[from] MailError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("password error: {0}")]
    Password(#[from] PasswordError),
}

/// Failures while wiring an [`Inbox`] from config.
#[derive(thiserror::Error, Debug)]
pub enum SetupError {
    #[error("could not open the user store: {0}")]
    Store(#[from] StoreError),

    #[error("could not build the mailer: {0}")]
    Mail(#[from] MailError),

    #[error(transparent)]
    Session(#[from] InvalidSecret),
}

impl From<ValidationError> for InboxError {
    fn from(err: ValidationError) -> Self {
        InboxError::Invalid(err)
    }
}

impl From<SessionError> for InboxError {
    fn from(_: SessionError) -> Self {
        InboxError::NotAuthenticated
    }
}

#[derive(Clone)]
pub struct InboxSettings {
    pub sessions: SessionKeys,
    pub code_ttl: Duration,
    pub password_cost: u32,
    pub public_url: Url,
}

#[derive(Debug, Clone)]
pub struct SignUpRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignUpKind {
    /// A new account document was created.
    Created,
    /// An unverified account with the same email got a new password and code.
    Refreshed,
}

/// A signed-in session: the claims and the token that carries them.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub claims: SessionClaims,
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    #[serde(flatten)]
    pub claims: SessionClaims,
    pub profile_url: String,
}

struct InboxInner {
    store: Arc<dyn UserStore>,
    mailer: Arc<dyn Mailer>,
    hasher: PasswordHasher,
    sessions: SessionKeys,
    code_ttl: Duration,
    public_url: Url,
}

/// Every account and message operation the API exposes. Cheap to clone.
#[derive(Clone)]
pub struct Inbox {
    inner: Arc<InboxInner>,
}

impl Inbox {
    pub fn new(
        store: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
        settings: InboxSettings,
    ) -> Self {
        Inbox {
            inner: Arc::new(InboxInner {
                store,
                mailer,
                hasher: PasswordHasher::new(settings.password_cost),
                sessions: settings.sessions,
                code_ttl: settings.code_ttl,
                public_url: settings.public_url,
            }),
        }
    }

    /// Connects the configured store and mailer.
    pub async fn from_config(config: &Config) -> Result<Self, SetupError> {
        let sessions = SessionKeys::new(
            config.session.secret.as_bytes(),
            Duration::seconds(config.session.max_age_secs as i64),
        )?;
        let mailer = build_mailer(&config.mailer)?;
        let store = build_store(&config.store).await?;

        let settings = InboxSettings {
            sessions,
            code_ttl: Duration::seconds(config.verification.code_ttl_secs as i64),
            password_cost: config.password_cost,
            public_url: config.public_url.clone(),
        };

        Ok(Inbox::new(store, mailer, settings))
    }

    pub fn sessions(&self) -> &SessionKeys {
        &self.inner.sessions
    }

    pub fn profile_url(&self, username: &str) -> String {
        format!(
            "{}/to/{}",
            self.inner.public_url.as_str().trim_end_matches('/'),
            username
        )
    }

    /// Registers or refreshes an unverified account and emails it a new code.
    pub async fn sign_up(&self, request: SignUpRequest) -> Result<SignUpKind, InboxError> {
        let username = validation::username(&request.username);
        let email = validation::email(&request.email);
        let password = validation::password(&request.password);

        let (username, email) = match (username, email, password) {
            (Ok(username), Ok(email), Ok(())) => (username, email),
            (username, email, password) => {
                let errors = [username.err(), email.err(), password.err()];
                return Err(ValidationError::merge(errors.into_iter().flatten())
                    .unwrap_or_else(|| ValidationError(Vec::new()))
                    .into());
            }
        };

        let store = &self.inner.store;

        let holder = store.find_by_username(&username).await?;
        if holder.as_ref().is_some_and(|user| user.is_verified) {
            return Err(InboxError::UsernameTaken);
        }

        let existing = store.find_by_email(&email).await?;
        if existing.as_ref().is_some_and(|user| user.is_verified) {
            return Err(InboxError::EmailTaken);
        }

        // Only verification confers ownership of a username, so an unverified
        // account holding it under another email gives it up.
        if let Some(holder) = holder
            && holder.email != email
        {
            info!("Releasing username {username} held by unverified account {}", holder.id);
            store.delete(&holder.id).await?;
        }

        let issued = issue_code(Utc::now(), self.inner.code_ttl);
        let password_hash = self.inner.hasher.hash(&request.password).await?;

        let kind = match existing {
            Some(mut user) => {
                user.username = username.clone();
                user.password_hash = password_hash;
                user.verify_code = Some(issued.code.clone());
                user.verify_code_expiry = Some(issued.expires_at);
                if !store.replace(&user).await.map_err(map_conflict)? {
                    return Err(InboxError::UserNotFound);
                }
                SignUpKind::Refreshed
            }
            None => {
                let user = User::new(
                    username.clone(),
                    email.clone(),
                    password_hash,
                    issued.code.clone(),
                    issued.expires_at,
                );
                store.insert(user).await.map_err(map_conflict)?;
                SignUpKind::Created
            }
        };

        self.inner
            .mailer
            .send_verification(&VerificationEmail {
                to: email,
                username,
                code: issued.code,
            })
            .await?;

        let kind_tag = match kind {
            SignUpKind::Created => "new",
            SignUpKind::Refreshed => "refreshed",
        };
        counter!(SIGNUPS, "kind" => kind_tag).increment(1);

        Ok(kind)
    }

    /// Succeeds when no verified account owns `username`.
    pub async fn check_username_unique(&self, username: Option<&str>) -> Result<(), InboxError> {
        let username = username.ok_or_else(|| InboxError::Invalid(ValidationError(Vec::new())))?;
        let username = validation::username(username)?;

        match self.inner.store.find_by_username(&username).await? {
            Some(user) if user.is_verified => Err(InboxError::UsernameTaken),
            _ => Ok(()),
        }
    }

    /// Consumes the emailed code and marks the account verified.
    pub async fn verify_code(&self, username: &str, code: &str) -> Result<(), InboxError> {
        validation::verification_code(code)?;

        let mut user = self
            .inner
            .store
            .find_by_username(username)
            .await?
            .ok_or(InboxError::UserNotFound)?;

        let outcome = check_code(&user, code, Utc::now());
        let outcome_tag = match outcome {
            CodeCheck::Accepted => "accepted",
            CodeCheck::Expired => "expired",
            CodeCheck::Mismatch => "mismatch",
            CodeCheck::AlreadyVerified => "already_verified",
        };
        counter!(VERIFICATIONS, "outcome" => outcome_tag).increment(1);

        match outcome {
            CodeCheck::Accepted => {
                consume_code(&mut user);
                if !self.inner.store.replace(&user).await? {
                    return Err(InboxError::UserNotFound);
                }
                info!("Account {} verified", user.id);
                Ok(())
            }
            CodeCheck::Expired => Err(InboxError::CodeExpired),
            CodeCheck::Mismatch => Err(InboxError::IncorrectCode),
            CodeCheck::AlreadyVerified => Err(InboxError::AlreadyVerified),
        }
    }

    pub async fn sign_in(&self, identifier: &str, password: &str) -> Result<IssuedSession, InboxError> {
        let identifier = identifier.trim();
        let user = match self.inner.store.find_by_identifier(identifier).await? {
            Some(user) => Some(user),
            // Emails are stored lower-cased, usernames match exactly.
            None if identifier.contains('@') => {
                self.inner
                    .store
                    .find_by_email(&identifier.to_lowercase())
                    .await?
            }
            None => None,
        };

        let result = match user {
            None => Err(InboxError::UnknownAccount),
            Some(user) if !user.is_verified => Err(InboxError::NotVerified),
            Some(user) => match self.inner.hasher.verify(password, &user.password_hash).await? {
                true => Ok(self.issue_session(&user)),
                false => Err(InboxError::IncorrectPassword),
            },
        };

        let outcome_tag = match &result {
            Ok(_) => "ok",
            Err(InboxError::UnknownAccount) => "unknown_account",
            Err(InboxError::NotVerified) => "not_verified",
            Err(InboxError::IncorrectPassword) => "incorrect_password",
            Err(_) => "error",
        };
        counter!(SIGNINS, "outcome" => outcome_tag).increment(1);

        result
    }

    fn issue_session(&self, user: &User) -> IssuedSession {
        let claims = self.inner.sessions.claims_for(user, Utc::now());
        let token = self.inner.sessions.sign(&claims);
        IssuedSession { claims, token }
    }

    pub fn authenticate(&self, token: Option<&str>) -> Result<SessionClaims, InboxError> {
        let token = token.ok_or(InboxError::NotAuthenticated)?;
        Ok(self.inner.sessions.verify(token, Utc::now())?)
    }

    pub fn session_view(&self, claims: SessionClaims) -> SessionView {
        let profile_url = self.profile_url(&claims.username);
        SessionView {
            claims,
            profile_url,
        }
    }

    async fn current_user(&self, claims: &SessionClaims) -> Result<User, InboxError> {
        self.inner
            .store
            .find_by_id(&claims.user_id)
            .await?
            .ok_or(InboxError::UserNotFound)
    }

    pub async fn accepting_messages(&self, claims: &SessionClaims) -> Result<bool, InboxError> {
        Ok(self.current_user(claims).await?.is_accepting_messages)
    }

    /// Stores the preference and re-issues the session so its flag stays current.
    pub async fn set_accepting_messages(
        &self,
        claims: &SessionClaims,
        accepting: bool,
    ) -> Result<IssuedSession, InboxError> {
        let user = self
            .inner
            .store
            .set_accepting_messages(&claims.user_id, accepting)
            .await?
            .ok_or(InboxError::UserNotFound)?;

        info!(
            "Account {} now {} messages",
            user.id,
            if accepting { "accepts" } else { "rejects" }
        );
        Ok(self.issue_session(&user))
    }

    /// Drops an anonymous message into `username`'s inbox.
    pub async fn send_message(&self, username: &str, content: &str) -> Result<Message, InboxError> {
        let content = validation::content(content)?;

        let recipient = match self.inner.store.find_by_username(username).await? {
            Some(user) if user.is_verified => user,
            _ => {
                counter!(MESSAGES_REJECTED, "reason" => "unknown_recipient").increment(1);
                return Err(InboxError::UserNotFound);
            }
        };

        if !recipient.is_accepting_messages {
            counter!(MESSAGES_REJECTED, "reason" => "not_accepting").increment(1);
            return Err(InboxError::NotAcceptingMessages);
        }

        let message = Message::new(content, Utc::now());
        if !self
            .inner
            .store
            .push_message(&recipient.id, message.clone())
            .await?
        {
            warn!("Recipient {} vanished before the message was stored", recipient.id);
            return Err(InboxError::UserNotFound);
        }

        counter!(MESSAGES_SENT).increment(1);
        Ok(message)
    }

    /// The caller's messages, newest first.
    pub async fn list_messages(&self, claims: &SessionClaims) -> Result<Vec<Message>, InboxError> {
        Ok(self.current_user(claims).await?.messages_newest_first())
    }

    pub async fn delete_message(
        &self,
        claims: &SessionClaims,
        message_id: &str,
    ) -> Result<(), InboxError> {
        if !self
            .inner
            .store
            .pull_message(&claims.user_id, message_id)
            .await?
        {
            return Err(InboxError::MessageNotFound);
        }

        counter!(MESSAGES_DELETED).increment(1);
        Ok(())
    }
}

fn map_conflict(err: StoreError) -> InboxError {
    match err {
        StoreError::Conflict("username") => InboxError::UsernameTaken,
        StoreError::Conflict("email") => InboxError::EmailTaken,
        other => InboxError::Store(other),
    }
}

#[async_trait]
impl ReadinessProbe for Inbox {
    async fn is_ready(&self) -> bool {
        match self.inner.store.ping().await {
            Ok(()) => true,
            Err(err) => {
                warn!("Store ping failed: {err}");
                false
            }
        }
    }
}
