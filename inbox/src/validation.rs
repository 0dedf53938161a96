//! Input rules shared by the sign-up form, the username check, the verify
//! form and the public message form.
use regex::Regex;
use std::sync::LazyLock;

pub const USERNAME_MIN_CHARS: usize = 2;
pub const USERNAME_MAX_CHARS: usize = 20;
pub const PASSWORD_MIN_CHARS: usize = 6;
pub const CONTENT_MIN_CHARS: usize = 10;
pub const CONTENT_MAX_CHARS: usize = 300;
pub const CODE_LENGTH: usize = 6;

static USERNAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_]+$").expect("static username pattern"));

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static email pattern"));

/// Every rule a value broke, in rule order.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", .0.join(", "))]
pub struct ValidationError(pub Vec<String>);

impl ValidationError {
    fn single(message: &str) -> Self {
        ValidationError(vec![message.to_string()])
    }

    pub fn merge(errors: impl IntoIterator<Item = ValidationError>) -> Option<Self> {
        let messages: Vec<String> = errors.into_iter().flat_map(|e| e.0).collect();
        (!messages.is_empty()).then_some(ValidationError(messages))
    }
}

pub fn username(value: &str) -> Result<String, ValidationError> {
    let mut messages = Vec::new();
    let chars = value.chars().count();

    if chars < USERNAME_MIN_CHARS {
        messages.push(format!(
            "Username must be at least {USERNAME_MIN_CHARS} characters"
        ));
    }
    if chars > USERNAME_MAX_CHARS {
        messages.push(format!(
            "Username must be no more than {USERNAME_MAX_CHARS} characters"
        ));
    }
    if !USERNAME_PATTERN.is_match(value) {
        messages.push("Username must not contain special characters".to_string());
    }

    match messages.is_empty() {
        true => Ok(value.to_string()),
        false => Err(ValidationError(messages)),
    }
}

/// Returns the trimmed, lower-cased address.
pub fn email(value: &str) -> Result<String, ValidationError> {
    let normalized = value.trim().to_lowercase();
    if EMAIL_PATTERN.is_match(&normalized) {
        Ok(normalized)
    } else {
        Err(ValidationError::single("Invalid email address"))
    }
}

pub fn password(value: &str) -> Result<(), ValidationError> {
    if value.chars().count() < PASSWORD_MIN_CHARS {
        return Err(ValidationError(vec![format!(
            "Password must be at least {PASSWORD_MIN_CHARS} characters"
        )]));
    }
    Ok(())
}

/// Returns the trimmed message body.
pub fn content(value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    let chars = trimmed.chars().count();

    if chars < CONTENT_MIN_CHARS {
        return Err(ValidationError(vec![format!(
            "Content must be at least {CONTENT_MIN_CHARS} characters"
        )]));
    }
    if chars > CONTENT_MAX_CHARS {
        return Err(ValidationError(vec![format!(
            "Content must be no longer than {CONTENT_MAX_CHARS} characters"
        )]));
    }
    Ok(trimmed.to_string())
}

pub fn verification_code(value: &str) -> Result<(), ValidationError> {
    if value.len() == CODE_LENGTH && value.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError(vec![format!(
            "Verification code must be {CODE_LENGTH} digits"
        )]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_rules() {
        assert_eq!(username("alice_01"), Ok("alice_01".to_string()));
        assert_eq!(username("ab"), Ok("ab".to_string()));
        assert!(username(&"a".repeat(20)).is_ok());

        assert_eq!(
            username("a"),
            Err(ValidationError(vec![
                "Username must be at least 2 characters".into()
            ]))
        );
        assert_eq!(
            username(&"a".repeat(21)),
            Err(ValidationError(vec![
                "Username must be no more than 20 characters".into()
            ]))
        );
        assert_eq!(
            username("bad name"),
            Err(ValidationError(vec![
                "Username must not contain special characters".into()
            ]))
        );
    }

    #[test]
    fn empty_username_reports_every_rule() {
        let err = username("").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Username must be at least 2 characters, Username must not contain special characters"
        );
    }

    #[test]
    fn email_is_normalized() {
        assert_eq!(email("  Alice@Example.COM "), Ok("alice@example.com".into()));
        assert!(email("not-an-email").is_err());
        assert!(email("a@b").is_err());
        assert!(email("a b@c.d").is_err());
    }

    #[test]
    fn password_length() {
        assert!(password("secret").is_ok());
        assert!(password("short").is_err());
    }

    #[test]
    fn content_bounds() {
        assert_eq!(content("  hello there  "), Ok("hello there".into()));
        assert!(content("too short").is_err());
        assert!(content("          x          ").is_err());
        assert!(content(&"x".repeat(300)).is_ok());
        assert!(content(&"x".repeat(301)).is_err());
    }

    #[test]
    fn code_shape() {
        assert!(verification_code("012345").is_ok());
        assert!(verification_code("12345").is_err());
        assert!(verification_code("1234567").is_err());
        assert!(verification_code("12a456").is_err());
    }

    #[test]
    fn merge_keeps_order() {
        let merged = ValidationError::merge([
            username("a").unwrap_err(),
            password("x").unwrap_err(),
        ])
        .unwrap();
        assert_eq!(merged.0.len(), 2);
        assert!(ValidationError::merge([]).is_none());
    }
}
