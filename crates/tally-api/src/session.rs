//! Caller extraction from the headers set by the fronting session layer.

use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, request::Parts},
};
use tally_core::access::{Caller, Role};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Present in a handler means the request carried a well-formed identity.
pub struct Session(pub Caller);

/// Read the caller from `headers`.
pub fn caller_from_headers(headers: &HeaderMap) -> Result<Caller, ApiError> {
  let header = |name: &str| {
    headers
      .get(name)
      .and_then(|v| v.to_str().ok())
      .map(str::trim)
      .filter(|v| !v.is_empty())
      .ok_or_else(|| ApiError::Unauthorized(format!("missing {name} header")))
  };

  let user_id = header(USER_ID_HEADER)?;
  let role: Role = header(USER_ROLE_HEADER)?
    .parse()
    .map_err(|e: tally_core::Error| ApiError::Unauthorized(e.to_string()))?;

  Ok(Caller::new(user_id, role))
}

impl<S> FromRequestParts<S> for Session
where
  S: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
    caller_from_headers(&parts.headers).map(Session)
  }
}

#[cfg(test)]
mod tests {
  use axum::http::Request;

  use super::*;

  async fn extract(req: Request<axum::body::Body>) -> Result<Session, ApiError> {
    let (mut parts, _) = req.into_parts();
    Session::from_request_parts(&mut parts, &()).await
  }

  #[tokio::test]
  async fn well_formed_identity() {
    let req = Request::builder()
      .header(USER_ID_HEADER, "t1")
      .header(USER_ROLE_HEADER, "teacher")
      .body(axum::body::Body::empty())
      .unwrap();
    let Session(caller) = extract(req).await.unwrap();
    assert_eq!(caller, Caller::new("t1", Role::Teacher));
  }

  #[tokio::test]
  async fn missing_role() {
    let req = Request::builder()
      .header(USER_ID_HEADER, "t1")
      .body(axum::body::Body::empty())
      .unwrap();
    assert!(matches!(extract(req).await, Err(ApiError::Unauthorized(_))));
  }

  #[tokio::test]
  async fn unknown_role() {
    let req = Request::builder()
      .header(USER_ID_HEADER, "t1")
      .header(USER_ROLE_HEADER, "principal")
      .body(axum::body::Body::empty())
      .unwrap();
    assert!(matches!(extract(req).await, Err(ApiError::Unauthorized(_))));
  }

  #[tokio::test]
  async fn blank_user_id() {
    let req = Request::builder()
      .header(USER_ID_HEADER, "  ")
      .header(USER_ROLE_HEADER, "teacher")
      .body(axum::body::Body::empty())
      .unwrap();
    assert!(matches!(extract(req).await, Err(ApiError::Unauthorized(_))));
  }
}
