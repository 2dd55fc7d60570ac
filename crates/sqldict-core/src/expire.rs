//! Bulk expiry of TTL rows.

use sqldict_error::Result;
use tracing::debug;

use crate::SqlDict;
use crate::query::{expire_delete_statement, init_statement};
use crate::unix_now;

impl SqlDict {
    /// Delete all rows past their expire column, one transaction per map.
    ///
    /// Returns `true` when at least one map declares an expire column,
    /// `false` when the configuration has nothing to expire.
    pub fn expire_scan(&self) -> Result<bool> {
        let now = unix_now();
        let mut found = false;
        for map in &self.settings().maps {
            let Some((sql, params)) =
                expire_delete_statement(map, self.db().table_prefix(), now)
            else {
                continue;
            };
            found = true;
            debug!(table = %map.table, "expire scan");
            let mut tx = self.db().begin();
            tx.update(init_statement(self.db().as_ref(), sql, params));
            tx.commit_sync()?;
        }
        Ok(found)
    }
}
