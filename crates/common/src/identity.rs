//! Caller identity supplied by the (external) authentication layer.

use serde::{Deserialize, Serialize};

use crate::types::{SessionToken, UserId};

/// Who a cart, order or coupon usage belongs to.
///
/// Exactly one of an authenticated user or an anonymous session: the enum
/// makes "both" and "neither" unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Owner {
    User(UserId),
    Session(SessionToken),
}

impl Owner {
    /// Returns the authenticated user, if any.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Owner::User(id) => Some(*id),
            Owner::Session(_) => None,
        }
    }

    /// Returns true for anonymous session owners.
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Owner::Session(_))
    }

    /// Stable storage key, e.g. `user:<uuid>` or `session:<token>`.
    pub fn key(&self) -> String {
        match self {
            Owner::User(id) => format!("user:{id}"),
            Owner::Session(token) => format!("session:{token}"),
        }
    }
}

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

impl From<UserId> for Owner {
    fn from(id: UserId) -> Self {
        Owner::User(id)
    }
}

impl From<SessionToken> for Owner {
    fn from(token: SessionToken) -> Self {
        Owner::Session(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed_by_kind() {
        let user = UserId::new();
        assert_eq!(Owner::User(user).key(), format!("user:{user}"));
        assert_eq!(
            Owner::Session(SessionToken::new("abc")).key(),
            "session:abc"
        );
    }

    #[test]
    fn user_id_only_for_users() {
        let user = UserId::new();
        assert_eq!(Owner::User(user).user_id(), Some(user));
        let anon = Owner::Session(SessionToken::new("s1"));
        assert_eq!(anon.user_id(), None);
        assert!(anon.is_anonymous());
    }

    #[test]
    fn serialization_roundtrip() {
        let owner = Owner::Session(SessionToken::new("tok"));
        let json = serde_json::to_string(&owner).unwrap();
        let back: Owner = serde_json::from_str(&json).unwrap();
        assert_eq!(owner, back);
    }
}
