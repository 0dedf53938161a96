use crate::config::Listener as ListenerConfig;
use crate::inbox::{Inbox, InboxError, SignUpRequest};
use crate::metrics_defs::REQUEST_DURATION;
use crate::session::{SessionClaims, cleared_session_cookie, session_cookie, token_from_headers};
use crate::validation::ValidationError;
use axum::{
    Json, Router,
    extract::{FromRequestParts, MatchedPath, Path, Query, Request, State},
    extract::rejection::{JsonRejection, QueryRejection},
    http::{StatusCode, header::SET_COOKIE, request::Parts},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Deserialize;
use serde_json::json;
use shared::histogram;
use std::future::Future;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Clone)]
pub struct ApiState {
    inbox: Inbox,
    secure_cookies: bool,
}

impl ApiState {
    pub fn new(inbox: Inbox, secure_cookies: bool) -> Self {
        ApiState {
            inbox,
            secure_cookies,
        }
    }

    fn session_cookie(&self, token: &str) -> String {
        session_cookie(token, self.inbox.sessions().max_age(), self.secure_cookies)
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/sign-up", post(sign_up))
        .route("/api/check-username-unique", get(check_username_unique))
        .route("/api/verify-code", post(verify_code))
        .route("/api/sign-in", post(sign_in))
        .route("/api/sign-out", post(sign_out))
        .route("/api/session", get(session))
        .route("/api/send-message", post(send_message))
        .route("/api/get-messages", get(get_messages))
        .route("/api/delete-message/{messageid}", delete(delete_message))
        .route(
            "/api/accept-messages",
            get(get_accept_messages).post(set_accept_messages),
        )
        .route_layer(middleware::from_fn(record_duration))
        .with_state(state)
}

/// Serves the API until `shutdown` resolves, then drains open connections.
pub async fn serve<F>(listener: ListenerConfig, state: ApiState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);
    let addr = format!("{}:{}", listener.host, listener.port);

    let listener = TcpListener::bind(&addr).await?;
    info!("API listener bound to {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("API listener on {addr} stopped");
    Ok(())
}

async fn record_duration(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());

    let start = Instant::now();
    let response = next.run(request).await;

    histogram!(
        REQUEST_DURATION,
        "route" => route,
        "status" => response.status().as_u16().to_string()
    )
    .record(start.elapsed().as_secs_f64());

    response
}

/// Claims of a valid session token taken from the bearer header or cookie.
pub struct Session(pub SessionClaims);

impl FromRequestParts<ApiState> for Session {
    type Rejection = InboxError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let token = token_from_headers(&parts.headers);
        state.inbox.authenticate(token.as_deref()).map(Session)
    }
}

fn ok(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": true, "message": message }))).into_response()
}

fn invalid_body(rejection: JsonRejection) -> InboxError {
    InboxError::Invalid(ValidationError(vec![rejection.body_text()]))
}

#[derive(Deserialize)]
struct SignUpBody {
    username: String,
    email: String,
    password: String,
}

async fn sign_up(
    State(state): State<ApiState>,
    body: Result<Json<SignUpBody>, JsonRejection>,
) -> Result<Response, InboxError> {
    let Json(body) = body.map_err(invalid_body)?;
    state
        .inbox
        .sign_up(SignUpRequest {
            username: body.username,
            email: body.email,
            password: body.password,
        })
        .await?;

    Ok(ok(
        StatusCode::CREATED,
        "User registered successfully. Please verify your email",
    ))
}

#[derive(Deserialize)]
struct UsernameQuery {
    username: Option<String>,
}

async fn check_username_unique(
    State(state): State<ApiState>,
    query: Result<Query<UsernameQuery>, QueryRejection>,
) -> Result<Response, InboxError> {
    let username = query.ok().and_then(|Query(query)| query.username);
    state
        .inbox
        .check_username_unique(username.as_deref())
        .await?;

    Ok(ok(StatusCode::OK, "Username is unique"))
}

#[derive(Deserialize)]
struct VerifyCodeBody {
    username: String,
    code: String,
}

async fn verify_code(
    State(state): State<ApiState>,
    body: Result<Json<VerifyCodeBody>, JsonRejection>,
) -> Result<Response, InboxError> {
    let Json(body) = body.map_err(invalid_body)?;
    state.inbox.verify_code(&body.username, &body.code).await?;

    Ok(ok(StatusCode::OK, "Account verified successfully"))
}

#[derive(Deserialize)]
struct SignInBody {
    identifier: String,
    password: String,
}

async fn sign_in(
    State(state): State<ApiState>,
    body: Result<Json<SignInBody>, JsonRejection>,
) -> Result<Response, InboxError> {
    let Json(body) = body.map_err(invalid_body)?;
    let issued = state.inbox.sign_in(&body.identifier, &body.password).await?;

    let cookie = state.session_cookie(&issued.token);
    let body = json!({
        "success": true,
        "message": "Signed in successfully",
        "token": issued.token,
        "user": issued.claims,
    });
    Ok((StatusCode::OK, [(SET_COOKIE, cookie)], Json(body)).into_response())
}

async fn sign_out(State(state): State<ApiState>) -> Response {
    let body = json!({ "success": true, "message": "Signed out" });
    (
        StatusCode::OK,
        [(SET_COOKIE, cleared_session_cookie(state.secure_cookies))],
        Json(body),
    )
        .into_response()
}

async fn session(State(state): State<ApiState>, Session(claims): Session) -> Response {
    let body = json!({
        "success": true,
        "message": "Session active",
        "user": state.inbox.session_view(claims),
    });
    (StatusCode::OK, Json(body)).into_response()
}

#[derive(Deserialize)]
struct SendMessageBody {
    username: String,
    content: String,
}

async fn send_message(
    State(state): State<ApiState>,
    body: Result<Json<SendMessageBody>, JsonRejection>,
) -> Result<Response, InboxError> {
    let Json(body) = body.map_err(invalid_body)?;
    state.inbox.send_message(&body.username, &body.content).await?;

    Ok(ok(StatusCode::CREATED, "Message sent successfully"))
}

async fn get_messages(
    State(state): State<ApiState>,
    Session(claims): Session,
) -> Result<Response, InboxError> {
    let messages = state.inbox.list_messages(&claims).await?;
    let body = json!({
        "success": true,
        "message": "Messages fetched successfully",
        "messages": messages,
    });
    Ok((StatusCode::OK, Json(body)).into_response())
}

async fn delete_message(
    State(state): State<ApiState>,
    Session(claims): Session,
    Path(message_id): Path<String>,
) -> Result<Response, InboxError> {
    state.inbox.delete_message(&claims, &message_id).await?;
    Ok(ok(StatusCode::OK, "Message deleted"))
}

async fn get_accept_messages(
    State(state): State<ApiState>,
    Session(claims): Session,
) -> Result<Response, InboxError> {
    let accepting = state.inbox.accepting_messages(&claims).await?;
    let body = json!({
        "success": true,
        "message": "Message acceptance status fetched successfully",
        "isAcceptingMessage": accepting,
    });
    Ok((StatusCode::OK, Json(body)).into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcceptMessagesBody {
    #[serde(alias = "acceptMessage")]
    accept_messages: bool,
}

async fn set_accept_messages(
    State(state): State<ApiState>,
    Session(claims): Session,
    body: Result<Json<AcceptMessagesBody>, JsonRejection>,
) -> Result<Response, InboxError> {
    let Json(body) = body.map_err(invalid_body)?;
    let issued = state
        .inbox
        .set_accepting_messages(&claims, body.accept_messages)
        .await?;

    let cookie = state.session_cookie(&issued.token);
    let body = json!({
        "success": true,
        "message": "Message acceptance status updated successfully",
        "isAcceptingMessage": issued.claims.is_accepting_messages,
        "token": issued.token,
    });
    Ok((StatusCode::OK, [(SET_COOKIE, cookie)], Json(body)).into_response())
}

impl IntoResponse for InboxError {
    fn into_response(self) -> Response {
        let status = match &self {
            InboxError::Invalid(_)
            | InboxError::UsernameTaken
            | InboxError::EmailTaken
            | InboxError::AlreadyVerified
            | InboxError::CodeExpired
            | InboxError::IncorrectCode => StatusCode::BAD_REQUEST,
            InboxError::UnknownAccount
            | InboxError::IncorrectPassword
            | InboxError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            InboxError::NotVerified | InboxError::NotAcceptingMessages => StatusCode::FORBIDDEN,
            InboxError::UserNotFound | InboxError::MessageNotFound => StatusCode::NOT_FOUND,
            InboxError::Mail(_) | InboxError::Store(_) | InboxError::Password(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match self {
            InboxError::Invalid(ValidationError(messages)) if messages.is_empty() => {
                "Invalid query parameter".to_string()
            }
            InboxError::Mail(err) => {
                error!("Failed to send verification email: {err}");
                "Failed to send verification email".to_string()
            }
            InboxError::Store(err) => {
                error!("Store request failed: {err}");
                "Internal server error".to_string()
            }
            InboxError::Password(err) => {
                error!("Password hashing failed: {err}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "success": false, "message": message }))).into_response()
    }
}
