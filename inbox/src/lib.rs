pub mod api;
pub mod config;
pub mod inbox;
pub mod mailer;
pub mod metrics_defs;
pub mod password;
pub mod session;
pub mod store;
pub mod types;
pub mod validation;
pub mod verification;

#[cfg(test)]
mod testutils;

use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::api::ApiState;
use crate::inbox::{Inbox, SetupError};

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("invalid config: {0}")]
    InvalidConfig(#[from] config::ValidationError),
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs the API and admin listeners until `shutdown` resolves.
pub async fn run<F>(config: config::Config, shutdown: F) -> Result<(), RunError>
where
    F: Future<Output = ()> + Send + 'static,
{
    config.validate()?;

    let inbox = Inbox::from_config(&config).await?;
    info!("User store ready");

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown.await;
        let _ = stop_tx.send(true);
    });

    let stopped = |mut rx: watch::Receiver<bool>| async move {
        let _ = rx.wait_for(|stop| *stop).await;
    };

    let api_task = api::serve(
        config.listener.clone(),
        ApiState::new(inbox.clone(), config.secure_cookies()),
        stopped(stop_rx.clone()),
    );

    let admin_service: AdminService<std::io::Error> = AdminService::new(Arc::new(inbox));
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
        stopped(stop_rx),
    );

    tokio::try_join!(api_task, admin_task)?;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM, shutting down");
            }
            Err(err) => {
                tracing::error!("Failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config(api_port: u16, admin_port: u16) -> config::Config {
        serde_yaml::from_str(&format!(
            r#"
            listener:
                host: 127.0.0.1
                port: {api_port}
            admin_listener:
                host: 127.0.0.1
                port: {admin_port}
            public_url: http://localhost:{api_port}
            session:
                secret: 0123456789abcdef0123456789abcdef
            store:
                type: memory
            mailer:
                type: log
            "#
        ))
        .unwrap()
    }

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_binding() {
        let mut config = memory_config(free_port(), free_port());
        config.session.secret = "short".into();
        let result = run(config, async {}).await;
        assert!(matches!(result, Err(RunError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn unusable_store_is_a_setup_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut config = memory_config(free_port(), free_port());
        config.store = config::StoreConfig::Filesystem {
            base_dir: file.path().join("data").to_string_lossy().into_owned(),
            filename: "users.bin".into(),
        };

        let result = run(config, async {}).await;
        assert!(matches!(result, Err(RunError::Setup(SetupError::Store(_)))));
    }

    #[tokio::test]
    async fn serves_until_shutdown() {
        let (api_port, admin_port) = (free_port(), free_port());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(run(memory_config(api_port, admin_port), async {
            let _ = rx.await;
        }));

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let check = reqwest::get(format!(
            "http://127.0.0.1:{api_port}/api/check-username-unique?username=alice"
        ))
        .await
        .unwrap();
        assert_eq!(check.status(), reqwest::StatusCode::OK);

        let ready = reqwest::get(format!("http://127.0.0.1:{admin_port}/ready"))
            .await
            .unwrap();
        assert_eq!(ready.status(), reqwest::StatusCode::OK);

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
