//! Idempotency keys for operations that must not be applied twice.

use std::fmt;

use uuid::Uuid;

/// Header carrying the idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// What a call does to server state, which decides whether it needs a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// `GET` of a single resource or a list page.
    Read,
    /// Update of an identified resource. Repeating it converges on the same
    /// state, so no key is generated.
    Update,
    /// Creation of a new resource.
    Create,
    /// An action endpoint such as cancel or retry.
    Action,
}

impl OperationKind {
    pub fn requires_idempotency_key(self) -> bool {
        matches!(self, OperationKind::Create | OperationKind::Action)
    }
}

/// Opaque token that lets the server deduplicate repeated deliveries of one
/// logical operation.
///
/// A key belongs to exactly one operation: it is resolved before the first
/// attempt and replayed unchanged on every retry of that operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// A fresh random key (UUID v4).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The caller's key when one was supplied, otherwise a generated key if
    /// the operation kind needs one.
    pub fn resolve(explicit: Option<&IdempotencyKey>, kind: OperationKind) -> Option<IdempotencyKey> {
        match explicit {
            Some(key) => Some(key.clone()),
            None if kind.requires_idempotency_key() => Some(Self::generate()),
            None => None,
        }
    }
}

impl From<String> for IdempotencyKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for IdempotencyKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
