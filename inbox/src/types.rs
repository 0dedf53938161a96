use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = String;
pub type MessageId = String;

/// An anonymous message as stored inside its recipient's document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: MessageId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new<C>(content: C, created_at: DateTime<Utc>) -> Self
    where
        C: Into<String>,
    {
        Message {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            created_at,
        }
    }
}

/// One account document. Field names match the stored layout so the same
/// type round-trips through every store backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(rename = "password")]
    pub password_hash: String,
    pub verify_code: Option<String>,
    pub verify_code_expiry: Option<DateTime<Utc>>,
    pub is_verified: bool,
    #[serde(rename = "isAcceptingMessage")]
    pub is_accepting_messages: bool,
    pub messages: Vec<Message>,
}

impl User {
    /// A fresh, unverified account that accepts messages and has an empty inbox.
    pub fn new<U, E>(
        username: U,
        email: E,
        password_hash: String,
        code: String,
        code_expiry: DateTime<Utc>,
    ) -> Self
    where
        U: Into<String>,
        E: Into<String>,
    {
        User {
            id: Uuid::new_v4().to_string(),
            username: username.into(),
            email: email.into(),
            password_hash,
            verify_code: Some(code),
            verify_code_expiry: Some(code_expiry),
            is_verified: false,
            is_accepting_messages: true,
            messages: Vec::new(),
        }
    }

    /// Messages ordered newest first.
    pub fn messages_newest_first(&self) -> Vec<Message> {
        let mut messages = self.messages.clone();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn new_user_defaults() {
        let now = Utc::now();
        let user = User::new("alice", "alice@example.com", "hash".into(), "123456".into(), now);

        assert!(!user.is_verified);
        assert!(user.is_accepting_messages);
        assert!(user.messages.is_empty());
        assert_eq!(user.verify_code.as_deref(), Some("123456"));
        assert_eq!(user.verify_code_expiry, Some(now));
        assert!(Uuid::parse_str(&user.id).is_ok());
    }

    #[test]
    fn stored_field_names() {
        let user = User::new("bob", "bob@example.com", "hash".into(), "654321".into(), Utc::now());
        let value = serde_json::to_value(&user).unwrap();

        for key in [
            "_id",
            "username",
            "email",
            "password",
            "verifyCode",
            "verifyCodeExpiry",
            "isVerified",
            "isAcceptingMessage",
            "messages",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn messages_sorted_newest_first() {
        let now = Utc::now();
        let mut user = User::new("carol", "carol@example.com", "hash".into(), "111111".into(), now);
        user.messages.push(Message::new("first message!", now - Duration::minutes(2)));
        user.messages.push(Message::new("third message!", now));
        user.messages.push(Message::new("second message", now - Duration::minutes(1)));

        let contents: Vec<_> = user
            .messages_newest_first()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, ["third message!", "second message", "first message!"]);
    }
}
