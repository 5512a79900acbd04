//! Entity trait for records persisted through the repository.

use serde::{Serialize, de::DeserializeOwned};

/// An entity stored as one versioned record.
///
/// The record key is `(Self::KIND, self.entity_id())`; the payload is the
/// serde representation of the entity.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Record kind under which all entities of this type are stored.
    const KIND: &'static str;

    /// Returns the record id of this entity.
    fn entity_id(&self) -> String;
}
