//! Basic type definitions for the chat lobby
//!
//! Provides the `SessionId` newtype used to key the registry.

/// Unique session identifier (newtype pattern)
///
/// Assigned monotonically by the registry. Ids are never reused within a
/// server lifetime, even after the session is removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl SessionId {
    /// The id that follows this one
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
