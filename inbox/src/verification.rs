use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use subtle::ConstantTimeEq;

use crate::types::User;

const CODE_MIN: u32 = 100_000;
const CODE_MAX: u32 = 999_999;

/// A freshly issued code and the instant it stops being accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

pub fn issue_code(now: DateTime<Utc>, ttl: Duration) -> IssuedCode {
    let code = rand::rng().random_range(CODE_MIN..=CODE_MAX);
    IssuedCode {
        code: code.to_string(),
        expires_at: now + ttl,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeCheck {
    Accepted,
    Expired,
    Mismatch,
    AlreadyVerified,
}

/// Checks `submitted` against the code stored on `user`. Expiry is reported
/// before a mismatch.
pub fn check_code(user: &User, submitted: &str, now: DateTime<Utc>) -> CodeCheck {
    if user.is_verified {
        return CodeCheck::AlreadyVerified;
    }

    let Some(expires_at) = user.verify_code_expiry else {
        return CodeCheck::Expired;
    };
    if expires_at <= now {
        return CodeCheck::Expired;
    }

    match &user.verify_code {
        Some(stored) if bool::from(stored.as_bytes().ct_eq(submitted.as_bytes())) => {
            CodeCheck::Accepted
        }
        _ => CodeCheck::Mismatch,
    }
}

/// Marks the account verified and clears the code.
pub fn consume_code(user: &mut User) {
    user.is_verified = true;
    user.verify_code = None;
    user.verify_code_expiry = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_code(code: &str, expires_at: DateTime<Utc>) -> User {
        User::new(
            "dave",
            "dave@example.com",
            "hash".into(),
            code.into(),
            expires_at,
        )
    }

    #[test]
    fn issued_codes_are_six_digits() {
        let now = Utc::now();
        for _ in 0..200 {
            let issued = issue_code(now, Duration::hours(1));
            assert_eq!(issued.code.len(), 6);
            let value: u32 = issued.code.parse().unwrap();
            assert!((CODE_MIN..=CODE_MAX).contains(&value));
            assert_eq!(issued.expires_at, now + Duration::hours(1));
        }
    }

    #[test]
    fn accepts_matching_unexpired_code() {
        let now = Utc::now();
        let user = user_with_code("123456", now + Duration::minutes(5));
        assert_eq!(check_code(&user, "123456", now), CodeCheck::Accepted);
    }

    #[test]
    fn rejects_wrong_code() {
        let now = Utc::now();
        let user = user_with_code("123456", now + Duration::minutes(5));
        assert_eq!(check_code(&user, "654321", now), CodeCheck::Mismatch);
        assert_eq!(check_code(&user, "12345", now), CodeCheck::Mismatch);
        assert_eq!(check_code(&user, "1234567", now), CodeCheck::Mismatch);
        assert_eq!(check_code(&user, "", now), CodeCheck::Mismatch);
    }

    #[test]
    fn expiry_wins_over_mismatch() {
        let now = Utc::now();
        let user = user_with_code("123456", now - Duration::seconds(1));
        assert_eq!(check_code(&user, "123456", now), CodeCheck::Expired);
        assert_eq!(check_code(&user, "000000", now), CodeCheck::Expired);
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let now = Utc::now();
        let user = user_with_code("123456", now);
        assert_eq!(check_code(&user, "123456", now), CodeCheck::Expired);
    }

    #[test]
    fn consumed_code_cannot_be_replayed() {
        let now = Utc::now();
        let mut user = user_with_code("123456", now + Duration::minutes(5));
        consume_code(&mut user);

        assert!(user.is_verified);
        assert!(user.verify_code.is_none());
        assert_eq!(check_code(&user, "123456", now), CodeCheck::AlreadyVerified);
    }
}
