//! Type-safe identifier wrappers for broker entities.
//!
//! Converters carry a [`ConverterId`] -- a UUID v7 (time-ordered) assigned
//! once when the adapter is created. Resources carry a [`ResourceId`], an
//! opaque integer chosen by the host; the broker only ever compares and
//! hashes it, so the numbering scheme belongs entirely to the embedder.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a converter endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConverterId(pub Uuid);

impl ConverterId {
    /// Create a new identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for ConverterId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ConverterId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ConverterId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<ConverterId> for Uuid {
    fn from(id: ConverterId) -> Self {
        id.0
    }
}

/// Opaque identifier for a resource kind.
///
/// Hosts assign these however they like (enum discriminants, registry
/// indices, hashes of resource names); the broker treats the value as a
/// pure key.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ResourceId(pub u32);

impl ResourceId {
    /// Wrap a raw host-assigned resource number.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Return the raw resource number.
    pub const fn into_inner(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ResourceId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<ResourceId> for u32 {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}
