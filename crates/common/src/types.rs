use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a UUID-backed identifier newtype.
///
/// Each identifier is a distinct type so a cart id can never be passed where
/// an order id is expected.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a shopping cart.
    CartId
);

uuid_id!(
    /// Unique identifier for a line inside a cart.
    CartItemId
);

uuid_id!(
    /// Unique identifier for a coupon.
    CouponId
);

uuid_id!(
    /// Unique identifier for an order.
    OrderId
);

uuid_id!(
    /// Identifier of an authenticated user, as supplied by the identity provider.
    UserId
);

uuid_id!(
    /// Identifier of a coupon usage ledger row.
    UsageId
);

uuid_id!(
    /// Identifier of one stock hold placed on a product.
    HoldId
);

/// Product identifier (SKU).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    /// Creates a new product ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the product ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ProductId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Opaque token identifying an anonymous browsing session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Wraps a session token issued by the identity layer.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_are_unique() {
        assert_ne!(OrderId::new(), OrderId::new());
        assert_ne!(CartId::new(), CartId::new());
    }

    #[test]
    fn uuid_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = CouponId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn uuid_id_parses_from_str() {
        let id = CartItemId::new();
        let parsed: CartItemId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<CartItemId>().is_err());
    }

    #[test]
    fn product_id_orders_lexicographically() {
        let mut ids = vec![ProductId::new("SKU-B"), ProductId::new("SKU-A")];
        ids.sort();
        assert_eq!(ids[0].as_str(), "SKU-A");
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = ProductId::new("ESP-250");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"ESP-250\"");

        let order_id = OrderId::new();
        let json = serde_json::to_string(&order_id).unwrap();
        assert_eq!(json, format!("\"{order_id}\""));
    }
}
