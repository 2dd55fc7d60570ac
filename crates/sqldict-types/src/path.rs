//! Dictionary path scopes.
//!
//! Paths are slash-separated strings. The first character selects the scope:
//! keys under `priv/` bind the per-operation username into queries, keys
//! under `shared/` do not.

/// Prefix of per-user private keys.
pub const PATH_PRIVATE: &str = "priv/";

/// Prefix of shared keys.
pub const PATH_SHARED: &str = "shared/";

/// Whether the path lies in the private scope.
///
/// Only the first character is inspected; the matcher takes care of the rest
/// of the prefix via the configured patterns.
pub fn is_private_path(path: &str) -> bool {
    path.as_bytes().first() == PATH_PRIVATE.as_bytes().first()
}
