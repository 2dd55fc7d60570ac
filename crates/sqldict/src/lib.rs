//! Public API facade for SQLDict.
//!
//! Re-exports the handle, the driver contract, and the configuration model so
//! hosts depend on one crate.

pub use sqldict_core::{CommitOutcome, DictEntry, SqlDict, SqlDictIter, SqlDictTransaction};
pub use sqldict_driver::{
    AffectedRows, DbHandle, SqlBackend, SqlCapabilities, SqlDbCache, SqlRows, SqlStatement,
    SqlTransaction,
};
pub use sqldict_error::{DictError, Result};
pub use sqldict_types::{
    DictMap, DictOpSettings, DictSettings, IterateFlags, PATH_PRIVATE, PATH_SHARED, RawValue,
    SqlField, SqlParam, SqlValueType, is_private_path,
};
