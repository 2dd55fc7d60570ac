//! Per-operation settings and iteration flags.

use std::time::SystemTime;

/// Settings attached to each dictionary operation.
#[derive(Debug, Clone, Default)]
pub struct DictOpSettings {
    /// Username bound into queries for `priv/` paths.
    pub username: String,
    /// Row TTL in seconds; 0 disables the TTL write.
    pub expire_secs: u64,
    /// Explicit commit timestamp forwarded to the driver, if any.
    pub timestamp: Option<SystemTime>,
    /// Mask bound values when the driver logs expanded statements.
    pub hide_log_values: bool,
    /// Iteration row cap; 0 means unlimited.
    pub max_rows: u64,
}

impl DictOpSettings {
    /// Settings for the given user, everything else default.
    pub fn for_user(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }
}

bitflags::bitflags! {
    /// Flags controlling an iteration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IterateFlags: u32 {
        /// Descend into the full subtree instead of one level.
        const RECURSE = 0x01;
        /// Order rows by the pattern columns in declaration order.
        const SORT_BY_KEY = 0x02;
        /// Order rows by the value column.
        const SORT_BY_VALUE = 0x04;
        /// Fetch keys only; skip value columns in the projection.
        const NO_VALUE = 0x08;
        /// Treat the path as one exact key: yield at most one row, never
        /// chain into further maps.
        const EXACT_KEY = 0x10;
        /// Issue queries through the driver's async entrypoints.
        const ASYNC = 0x20;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_inert() {
        let op = DictOpSettings::default();
        assert_eq!(op.expire_secs, 0);
        assert_eq!(op.max_rows, 0);
        assert!(!op.hide_log_values);
        assert!(op.timestamp.is_none());
    }

    #[test]
    fn flags_compose() {
        let flags = IterateFlags::RECURSE | IterateFlags::SORT_BY_KEY;
        assert!(flags.contains(IterateFlags::RECURSE));
        assert!(!flags.contains(IterateFlags::EXACT_KEY));
    }
}
