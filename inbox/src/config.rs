use serde::Deserialize;
use thiserror::Error;
use url::Url;

const MIN_SECRET_BYTES: usize = 32;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Session secret must be at least {MIN_SECRET_BYTES} bytes")]
    WeakSessionSecret,

    #[error("{0} must be greater than 0")]
    ZeroDuration(&'static str),

    #[error("Password cost must be between 4 and 31, got {0}")]
    InvalidPasswordCost(u32),
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

fn default_admin_listener() -> Listener {
    Listener {
        host: "127.0.0.1".into(),
        port: 3001,
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Session {
    pub secret: String,
    #[serde(default = "default_session_max_age")]
    pub max_age_secs: u64,
}

// 30 days
fn default_session_max_age() -> u64 {
    30 * 24 * 60 * 60
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Verification {
    #[serde(default = "default_code_ttl")]
    pub code_ttl_secs: u64,
}

impl Default for Verification {
    fn default() -> Self {
        Verification {
            code_ttl_secs: default_code_ttl(),
        }
    }
}

// 1 hour
fn default_code_ttl() -> u64 {
    60 * 60
}

fn default_password_cost() -> u32 {
    10
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreConfig {
    Memory,
    Filesystem { base_dir: String, filename: String },
    Mongodb { uri: String, database: String },
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum MailerConfig {
    /// Writes verification emails to the log instead of sending them.
    Log,
    /// Posts to a transactional email HTTP API.
    Http {
        url: Url,
        api_key: String,
        from: String,
        /// Upper bound on a single request, connect included.
        #[serde(default = "default_mail_timeout")]
        timeout_secs: u64,
    },
}

fn default_mail_timeout() -> u64 {
    10
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    #[serde(default = "default_admin_listener")]
    pub admin_listener: Listener,
    /// Base of the links handed to users, e.g. `https://umessage.app`.
    pub public_url: Url,
    pub session: Session,
    #[serde(default)]
    pub verification: Verification,
    #[serde(default = "default_password_cost")]
    pub password_cost: u32,
    pub store: StoreConfig,
    pub mailer: MailerConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.session.secret.len() < MIN_SECRET_BYTES {
            return Err(ValidationError::WeakSessionSecret);
        }
        if self.session.max_age_secs == 0 {
            return Err(ValidationError::ZeroDuration("session.max_age_secs"));
        }
        if self.verification.code_ttl_secs == 0 {
            return Err(ValidationError::ZeroDuration("verification.code_ttl_secs"));
        }
        if !(4..=31).contains(&self.password_cost) {
            return Err(ValidationError::InvalidPasswordCost(self.password_cost));
        }

        Ok(())
    }

    /// Cookies get the `Secure` attribute when the site is served over https.
    pub fn secure_cookies(&self) -> bool {
        self.public_url.scheme() == "https"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).expect("parse config")
    }

    const MINIMAL: &str = r#"
        public_url: https://umessage.example
        session:
            secret: 0123456789abcdef0123456789abcdef
        store:
            type: memory
        mailer:
            type: log
        "#;

    #[test]
    fn defaults() {
        let config = parse(MINIMAL);

        assert_eq!(config.listener, Listener::default());
        assert_eq!(config.admin_listener.port, 3001);
        assert_eq!(config.session.max_age_secs, 2_592_000);
        assert_eq!(config.verification.code_ttl_secs, 3600);
        assert_eq!(config.password_cost, 10);
        assert_eq!(config.store, StoreConfig::Memory);
        assert_eq!(config.mailer, MailerConfig::Log);
        assert!(config.secure_cookies());
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn tagged_backends() {
        let config = parse(
            r#"
            listener:
                host: 0.0.0.0
                port: 8080
            public_url: http://localhost:8080
            session:
                secret: 0123456789abcdef0123456789abcdef
                max_age_secs: 60
            store:
                type: mongodb
                uri: mongodb://localhost:27017
                database: umessage
            mailer:
                type: http
                url: https://api.resend.com/emails
                api_key: re_test
                from: Umessage <noreply@umessage.example>
            "#,
        );

        assert_eq!(
            config.store,
            StoreConfig::Mongodb {
                uri: "mongodb://localhost:27017".into(),
                database: "umessage".into(),
            }
        );
        match &config.mailer {
            MailerConfig::Http {
                url,
                from,
                timeout_secs,
                ..
            } => {
                assert_eq!(url.as_str(), "https://api.resend.com/emails");
                assert_eq!(from, "Umessage <noreply@umessage.example>");
                assert_eq!(*timeout_secs, 10);
            }
            other => panic!("unexpected mailer {other:?}"),
        }
        assert!(!config.secure_cookies());
    }

    #[test]
    fn validation_failures() {
        let mut config = parse(MINIMAL);
        config.listener.port = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));

        let mut config = parse(MINIMAL);
        config.session.secret = "short".into();
        assert_eq!(config.validate(), Err(ValidationError::WeakSessionSecret));

        let mut config = parse(MINIMAL);
        config.verification.code_ttl_secs = 0;
        assert_eq!(
            config.validate(),
            Err(ValidationError::ZeroDuration("verification.code_ttl_secs"))
        );

        let mut config = parse(MINIMAL);
        config.password_cost = 3;
        assert_eq!(
            config.validate(),
            Err(ValidationError::InvalidPasswordCost(3))
        );
    }

    #[test]
    fn invalid_public_url_is_rejected() {
        let result: Result<Config, _> = serde_yaml::from_str(
            r#"
            public_url: not a url
            session:
                secret: 0123456789abcdef0123456789abcdef
            store:
                type: memory
            mailer:
                type: log
            "#,
        );
        assert!(result.is_err());
    }
}
