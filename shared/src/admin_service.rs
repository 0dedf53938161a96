use crate::http::make_boxed_error_response;
use async_trait::async_trait;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

/// Answers the `/ready` probe. Implementations should be cheap enough to run
/// on every probe request.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn is_ready(&self) -> bool;
}

/// Serves `/health` (process is up) and `/ready` (dependencies reachable) on
/// the admin listener.
pub struct AdminService<E> {
    probe: Arc<dyn ReadinessProbe>,
    _error: PhantomData<fn() -> E>,
}

impl<E> AdminService<E> {
    pub fn new(probe: Arc<dyn ReadinessProbe>) -> Self {
        Self {
            probe,
            _error: PhantomData,
        }
    }
}

impl<E> Service<Request<Incoming>> for AdminService<E>
where
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let probe = self.probe.clone();
        let path = req.uri().path().to_owned();

        Box::pin(async move { Ok(route(&path, probe.as_ref()).await) })
    }
}

async fn route(path: &str, probe: &dyn ReadinessProbe) -> Response<BoxBody<Bytes, Infallible>> {
    let ok_body = || Full::new(Bytes::from("ok\n")).boxed();

    match path {
        "/health" => Response::new(ok_body()),
        "/ready" => match probe.is_ready().await {
            true => Response::new(ok_body()),
            false => make_boxed_error_response(StatusCode::SERVICE_UNAVAILABLE),
        },
        _ => make_boxed_error_response(StatusCode::NOT_FOUND),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(bool);

    #[async_trait]
    impl ReadinessProbe for Fixed {
        async fn is_ready(&self) -> bool {
            self.0
        }
    }

    #[tokio::test]
    async fn health_ignores_readiness() {
        let response = route("/health", &Fixed(false)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_follows_probe() {
        assert_eq!(route("/ready", &Fixed(true)).await.status(), StatusCode::OK);
        assert_eq!(
            route("/ready", &Fixed(false)).await.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let response = route("/metrics", &Fixed(true)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn serves_over_tcp() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let service: AdminService<std::io::Error> = AdminService::new(Arc::new(Fixed(true)));
        let server = tokio::spawn(async move {
            crate::http::run_http_service("127.0.0.1", port, service, async {
                let _ = rx.await;
            })
            .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let response = reqwest::get(format!("http://127.0.0.1:{port}/ready"))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "ok\n");

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
