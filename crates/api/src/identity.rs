//! Caller identity from request headers.
//!
//! Authentication happens upstream; the headers are trusted as verified.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::{Owner, SessionToken, UserId};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

/// The owner a request acts for.
///
/// An authenticated user wins over a session token when both are sent.
#[derive(Debug, Clone)]
pub struct Caller(pub Owner);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        owner_from_parts(parts).map(Caller)
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, ApiError> {
    match parts.headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|v| Some(v.trim()).filter(|v| !v.is_empty()))
            .map_err(|_| ApiError::BadRequest(format!("{name} is not valid ASCII"))),
    }
}

fn owner_from_parts(parts: &Parts) -> Result<Owner, ApiError> {
    if let Some(user) = header(parts, USER_ID_HEADER)? {
        let uuid = uuid::Uuid::parse_str(user)
            .map_err(|e| ApiError::BadRequest(format!("Invalid {USER_ID_HEADER}: {e}")))?;
        return Ok(Owner::User(UserId::from_uuid(uuid)));
    }
    match header(parts, SESSION_TOKEN_HEADER)? {
        Some(token) => Ok(Owner::Session(SessionToken::new(token))),
        None => Err(ApiError::Unauthenticated),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/cart");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_user_header_wins() {
        let user_id = UserId::new();
        let parts = parts(&[
            (SESSION_TOKEN_HEADER, "abc"),
            (USER_ID_HEADER, &user_id.to_string()),
        ]);
        assert_eq!(owner_from_parts(&parts).unwrap(), Owner::User(user_id));
    }

    #[test]
    fn test_session_header() {
        let parts = parts(&[(SESSION_TOKEN_HEADER, "abc")]);
        assert_eq!(
            owner_from_parts(&parts).unwrap(),
            Owner::Session(SessionToken::new("abc"))
        );
    }

    #[test]
    fn test_missing_identity() {
        assert!(matches!(
            owner_from_parts(&parts(&[])),
            Err(ApiError::Unauthenticated)
        ));
        assert!(matches!(
            owner_from_parts(&parts(&[(SESSION_TOKEN_HEADER, "  ")])),
            Err(ApiError::Unauthenticated)
        ));
    }

    #[test]
    fn test_malformed_user_id() {
        let parts = parts(&[(USER_ID_HEADER, "not-a-uuid")]);
        assert!(matches!(
            owner_from_parts(&parts),
            Err(ApiError::BadRequest(_))
        ));
    }
}
