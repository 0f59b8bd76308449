use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tokio::sync::Notify;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::users;

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .merge(users::router())
                .route("/health", get(|| async { "ok" })),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router, state: &AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port).parse()?;

    tracing::info!(name = %state.config.name, %addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_until(listener, app, shutdown_signal(), state.config.shutdown_timeout).await
}

/// Serves until `signal` resolves, then gives in-flight requests `grace` to
/// finish before dropping them. Always returns, so the caller can release
/// its resources.
async fn serve_until<F>(
    listener: tokio::net::TcpListener,
    app: Router,
    signal: F,
    grace: Duration,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let signalled = Arc::new(Notify::new());
    let server = axum::serve(listener, app)
        .with_graceful_shutdown({
            let signalled = signalled.clone();
            async move {
                signal.await;
                tracing::info!("shutting down server...");
                signalled.notify_one();
            }
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        res = &mut server => res?,
        _ = async {
            signalled.notified().await;
            tokio::time::sleep(grace).await;
        } => tracing::warn!("server forced to shutdown"),
    }
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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
    use crate::users::extractors::{USER_ID_HEADER, USER_ROLE_HEADER};
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct Call<'a> {
        method: Method,
        uri: &'a str,
        body: Option<Value>,
        caller: Option<i64>,
        admin: bool,
    }

    impl<'a> Call<'a> {
        fn new(method: Method, uri: &'a str) -> Self {
            Self {
                method,
                uri,
                body: None,
                caller: None,
                admin: false,
            }
        }

        fn json(mut self, body: Value) -> Self {
            self.body = Some(body);
            self
        }

        fn as_user(mut self, id: i64) -> Self {
            self.caller = Some(id);
            self
        }

        fn as_admin(mut self) -> Self {
            self.admin = true;
            self
        }
    }

    async fn send(app: &Router, call: Call<'_>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(call.method).uri(call.uri);
        if let Some(id) = call.caller {
            req = req.header(USER_ID_HEADER, id.to_string());
        }
        if call.admin {
            req = req.header(USER_ROLE_HEADER, "admin");
        }
        let body = match call.body {
            Some(v) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };

        let res = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, value)
    }

    async fn app_with_jane() -> (Router, i64) {
        let (state, _) = AppState::fake();
        let app = build_app(state);
        let (status, body) = send(
            &app,
            Call::new(Method::POST, "/api/v1/users").json(json!({
                "email": "jane@x.com",
                "fullName": "jane doe",
                "password": "secret123"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["user"]["id"].as_i64().unwrap();
        (app, id)
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (state, _) = AppState::fake();
        let app = build_app(state);
        let (status, body) = send(&app, Call::new(Method::GET, "/api/v1/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String("ok".into()));
    }

    #[tokio::test]
    async fn create_returns_pending_profile_without_hash() {
        let (app, id) = app_with_jane().await;
        let (status, body) = send(&app, Call::new(Method::GET, "/api/v1/users/jane-doe")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["id"], id);
        assert_eq!(body["user"]["fullName"], "Jane Doe");
        assert_eq!(body["user"]["role"], "unconfirmed");
        assert!(!body.to_string().contains("argon2"));
    }

    #[tokio::test]
    async fn duplicate_email_is_conflict() {
        let (app, _) = app_with_jane().await;
        let (status, body) = send(
            &app,
            Call::new(Method::POST, "/api/v1/users").json(json!({
                "email": "jane@x.com",
                "fullName": "Someone Else",
                "password": "secret123"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "already_exists");
        assert!(body["message"].as_str().unwrap().contains("email"));
    }

    #[tokio::test]
    async fn malformed_requests_use_error_body() {
        let (app, id) = app_with_jane().await;

        let (status, body) = send(
            &app,
            Call::new(Method::POST, "/api/v1/users")
                .json(json!({ "email": "a@b.co", "fullName": "x y" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "bad_request");
        assert!(body["message"].as_str().unwrap().contains("password"));

        let (status, body) = send(
            &app,
            Call::new(Method::PATCH, "/api/v1/users/abc")
                .as_user(id)
                .json(json!({ "bio": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "bad_request");
    }

    #[tokio::test]
    async fn login_returns_profile_or_generic_error() {
        let (app, id) = app_with_jane().await;

        let (status, body) = send(
            &app,
            Call::new(Method::POST, "/api/v1/auth/login")
                .json(json!({ "email": "jane@x.com", "password": "secret123" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["id"], id);
        assert!(body["user"]["lastLoginAt"].is_string());

        let (status, body) = send(
            &app,
            Call::new(Method::POST, "/api/v1/auth/login")
                .json(json!({ "email": "jane@x.com", "password": "nope-nope" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "invalid password");
    }

    #[tokio::test]
    async fn profile_requires_caller() {
        let (app, id) = app_with_jane().await;

        let (status, _) = send(&app, Call::new(Method::GET, "/api/v1/me")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, Call::new(Method::GET, "/api/v1/me").as_user(id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["slug"], "jane-doe");
    }

    #[tokio::test]
    async fn self_service_update_is_scoped_to_caller() {
        let (app, id) = app_with_jane().await;
        let uri = format!("/api/v1/users/{id}");

        let (status, body) = send(
            &app,
            Call::new(Method::PATCH, &uri)
                .as_user(id + 1)
                .json(json!({ "bio": "hijacked" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "forbidden");

        let (status, body) = send(
            &app,
            Call::new(Method::PATCH, &uri)
                .as_user(id)
                .json(json!({ "fullName": "jane smith" })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);

        let (_, body) = send(&app, Call::new(Method::GET, "/api/v1/users/jane-smith")).await;
        assert_eq!(body["user"]["fullName"], "Jane Smith");
    }

    #[tokio::test]
    async fn admin_routes_need_admin_role() {
        let (app, id) = app_with_jane().await;
        let uri = format!("/api/v1/admin/users/{id}/confirm");

        let (status, _) = send(&app, Call::new(Method::POST, &uri).as_user(id)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&app, Call::new(Method::POST, &uri).as_admin()).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = send(&app, Call::new(Method::GET, &format!("/api/v1/users/{id}"))).await;
        assert_eq!(body["user"]["role"], "user");
        assert_eq!(body["user"]["isVerified"], true);
    }

    #[tokio::test]
    async fn password_rotation_rejects_reuse() {
        let (app, id) = app_with_jane().await;
        let uri = format!("/api/v1/users/{id}/password");

        let (status, body) = send(
            &app,
            Call::new(Method::PUT, &uri)
                .as_user(id)
                .json(json!({ "password": "secret123" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "this password is already used");

        let (status, _) = send(
            &app,
            Call::new(Method::PUT, &uri)
                .as_user(id)
                .json(json!({ "password": "secret456" })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(
            &app,
            Call::new(Method::PUT, &format!("/api/v1/admin/users/{id}/password"))
                .as_admin()
                .json(json!({ "password": "secret123" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_hides_user() {
        let (app, id) = app_with_jane().await;
        let uri = format!("/api/v1/users/{id}");

        let (status, _) = send(&app, Call::new(Method::DELETE, &uri).as_user(id)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(&app, Call::new(Method::GET, &uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");

        let (status, _) = send(
            &app,
            Call::new(Method::DELETE, &format!("/api/v1/admin/users/{id}")).as_admin(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn shutdown_drops_stuck_requests_after_grace() {
        use tokio::io::AsyncWriteExt;

        let started = Arc::new(Notify::new());
        let app = Router::new().route(
            "/stuck",
            get({
                let started = started.clone();
                move || async move {
                    started.notify_one();
                    std::future::pending::<()>().await
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve_until(
            listener,
            app,
            async {
                let _ = stop_rx.await;
            },
            Duration::from_millis(100),
        ));

        let mut conn = tokio::net::TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"GET /stuck HTTP/1.1\r\nhost: localhost\r\n\r\n")
            .await
            .unwrap();
        started.notified().await;
        stop_tx.send(()).unwrap();

        let served = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("serve returned after grace")
            .unwrap();
        assert!(served.is_ok());
        drop(conn);
    }
}
