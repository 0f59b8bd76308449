use anyhow::anyhow;
use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, PathRejection},
        FromRequest, FromRequestParts, Request,
    },
    http::request::Parts,
    response::{IntoResponse, Response},
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::error::AppError;

/// Header carrying the caller's user id, resolved upstream by the gateway.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the caller's role, resolved upstream by the gateway.
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// The already-authenticated caller.
pub struct Caller(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::bad_request("missing user id"))?;

        let id = raw
            .to_str()
            .map_err(|e| AppError::bad_request_hidden(anyhow!(e), "invalid user id"))?
            .trim()
            .parse::<i64>()
            .map_err(|e| AppError::bad_request_hidden(anyhow!(e), "invalid user id"))?;

        Ok(Caller(id))
    }
}

/// Gate for administrative routes.
pub struct AdminCaller;

#[async_trait]
impl<S> FromRequestParts<S> for AdminCaller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let is_admin = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|role| role.trim().eq_ignore_ascii_case("admin"));

        if !is_admin {
            return Err(AppError::forbidden("admin role required"));
        }
        Ok(AdminCaller)
    }
}

/// Local version of [`axum::Json`] that rejects with an [`AppError`] body.
pub struct Json<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for Json<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(Json(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

impl<T> IntoResponse for Json<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

fn json_rejection(rejection: JsonRejection) -> AppError {
    let message = match rejection {
        JsonRejection::JsonDataError(e) => e.body_text(),
        JsonRejection::JsonSyntaxError(e) => e.body_text(),
        JsonRejection::MissingJsonContentType(_) => "invalid content type".to_string(),
        JsonRejection::BytesRejection(e) => e.body_text(),
        other => {
            warn!("unhandled json rejection: {other:?}");
            other.body_text()
        }
    };
    AppError::bad_request(message)
}

/// Local version of [`axum::extract::Path`] that rejects with an [`AppError`] body.
pub struct Path<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for Path<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match axum::extract::Path::<T>::from_request_parts(parts, state).await {
            Ok(axum::extract::Path(value)) => Ok(Path(value)),
            Err(PathRejection::FailedToDeserializePathParams(e)) => {
                Err(AppError::bad_request(e.body_text()))
            }
            // A route without the parameter is a wiring bug, not caller input.
            Err(other) => Err(AppError::Internal(anyhow!(other.body_text()))),
        }
    }
}
