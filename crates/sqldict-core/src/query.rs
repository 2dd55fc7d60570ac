//! SQL statement construction.
//!
//! Every statement is assembled here: the SELECT shapes for lookup and
//! iteration, the multi-column UPSERT a flushed set-batch becomes, the
//! arithmetic UPDATE for increments, DELETE for unset, and the expiry sweep.
//! The WHERE clause depends on the recursion mode; see [`build_where`].

use std::fmt::Write as _;

use sqldict_driver::{SqlBackend, SqlCapabilities, SqlStatement};
use sqldict_error::{DictError, Result};
use sqldict_types::settings::DictMap;
use sqldict_types::value::SqlParam;

/// How an iteration's WHERE treats unbound path segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecurseMode {
    /// Exact equality on every bound field.
    None,
    /// Enumerate direct children only.
    One,
    /// Enumerate the full subtree.
    Full,
}

/// Append the WHERE clause for `map` given the bound pattern `values`.
///
/// All bound fields before the recursion point compare with `=`. The
/// recursion point is the last bound field when the pattern is fully bound,
/// or the first unbound field otherwise:
///
/// - `One`: `col LIKE ? AND col NOT LIKE ?` binding `value + "/%"` and
///   `value + "/%/%"`; with no bound value left the literal forms
///   `LIKE '%' AND NOT LIKE '%/%'` are used.
/// - `Full`: `col LIKE ?` binding `value + "/%"`; with no bound value left
///   the subtree is unconstrained.
///
/// `username`, when present, appends `AND username_field = ?`.
pub(crate) fn build_where(
    map: &DictMap,
    values: &[String],
    username: Option<&str>,
    mode: RecurseMode,
    sql: &mut String,
    params: &mut Vec<SqlParam>,
) -> Result<()> {
    let fields = &map.pattern_fields;
    let count = fields.len();
    let count2 = values.len();
    debug_assert!(count2 <= count);

    if count2 == 0 && username.is_none() && !(mode == RecurseMode::One && count > 0) {
        // nothing bound: the caller wants everything. One-level mode still
        // needs the depth filter below, or grandchildren would leak in.
        return Ok(());
    }
    sql.push_str(" WHERE");

    let exact_count = if count2 == count && mode != RecurseMode::None {
        count2.saturating_sub(1)
    } else {
        count2
    };
    let mut have_clause = false;
    for i in 0..exact_count {
        if have_clause {
            sql.push_str(" AND");
        }
        let _ = write!(sql, " {} = ?", fields[i].name);
        params.push(
            fields[i]
                .value_type
                .encode(&fields[i].name, &values[i], "", &map.pattern)?,
        );
        have_clause = true;
    }

    match mode {
        RecurseMode::None => {}
        RecurseMode::One => {
            if exact_count < count {
                if have_clause {
                    sql.push_str(" AND");
                }
                let field = &fields[exact_count];
                if exact_count < count2 {
                    let _ = write!(sql, " {} LIKE ?", field.name);
                    params.push(field.value_type.encode(
                        &field.name,
                        &values[exact_count],
                        "/%",
                        &map.pattern,
                    )?);
                    let _ = write!(sql, " AND {} NOT LIKE ?", field.name);
                    params.push(field.value_type.encode(
                        &field.name,
                        &values[exact_count],
                        "/%/%",
                        &map.pattern,
                    )?);
                } else {
                    let _ = write!(
                        sql,
                        " {} LIKE '%' AND {} NOT LIKE '%/%'",
                        field.name, field.name
                    );
                }
                have_clause = true;
            }
        }
        RecurseMode::Full => {
            if exact_count < count2 {
                if have_clause {
                    sql.push_str(" AND");
                }
                let field = &fields[exact_count];
                let _ = write!(sql, " {} LIKE ?", field.name);
                params.push(field.value_type.encode(
                    &field.name,
                    &values[exact_count],
                    "/%",
                    &map.pattern,
                )?);
                have_clause = true;
            }
        }
    }

    if let Some(user) = username {
        let field = username_field(map)?;
        if have_clause {
            sql.push_str(" AND");
        }
        let _ = write!(sql, " {field} = ?");
        params.push(SqlParam::Text(user.to_owned()));
    }
    Ok(())
}

fn username_field(map: &DictMap) -> Result<&str> {
    map.username_field.as_deref().ok_or_else(|| {
        DictError::config(format!(
            "map {} has no username field for a private path",
            map.pattern
        ))
    })
}

/// The SELECT for a point lookup: value columns (preceded by the expire
/// column when the map declares one) with an exact WHERE.
pub(crate) fn lookup_select(
    map: &DictMap,
    values: &[String],
    username: Option<&str>,
    table_prefix: &str,
) -> Result<(String, Vec<SqlParam>)> {
    let mut sql = String::from("SELECT ");
    if let Some(expire) = &map.expire_field {
        let _ = write!(sql, "{expire},");
    }
    let _ = write!(
        sql,
        "{} FROM {}{}",
        map.value_projection(),
        table_prefix,
        map.table
    );
    let mut params = Vec::new();
    build_where(map, values, username, RecurseMode::None, &mut sql, &mut params)?;
    Ok((sql, params))
}

/// One queued `set` contributing a value column to a batched UPSERT.
pub(crate) struct SetField<'a> {
    pub map: &'a DictMap,
    pub value: &'a str,
}

/// Build the INSERT for a set-batch sharing table, scope, and bound pattern
/// values. Depending on driver capabilities the statement carries an
/// `ON DUPLICATE KEY UPDATE` or `ON CONFLICT … DO UPDATE SET` tail that
/// re-binds every value column; the pattern columns are the conflict key and
/// are never updated. With neither capability a bare INSERT is emitted.
pub(crate) fn upsert_statement(
    capabilities: SqlCapabilities,
    table_prefix: &str,
    fields: &[SetField<'_>],
    pattern_values: &[String],
    username: Option<&str>,
    expire_at: Option<i64>,
) -> Result<(String, Vec<SqlParam>)> {
    debug_assert!(!fields.is_empty());
    let first = &fields[0];
    let expire_at = first.map.expire_field.as_deref().and_then(|f| expire_at.map(|at| (f, at)));

    let mut params = Vec::new();
    let mut prefix = String::new();
    let mut suffix = String::new();
    let _ = write!(prefix, "INSERT INTO {}{} (", table_prefix, first.map.table);
    suffix.push_str(") VALUES (");
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            prefix.push(',');
            suffix.push(',');
        }
        let value_field = field.map.primary_value_field();
        prefix.push_str(&value_field.name);
        suffix.push('?');
        params.push(
            value_field
                .value_type
                .encode("value", field.value, "", &field.map.pattern)?,
        );
    }
    if let Some(user) = username {
        let _ = write!(prefix, ",{}", username_field(first.map)?);
        suffix.push_str(",?");
        params.push(SqlParam::Text(user.to_owned()));
    }
    if let Some((expire_field, at)) = expire_at {
        let _ = write!(prefix, ",{expire_field}");
        suffix.push_str(",?");
        params.push(SqlParam::Int64(at));
    }
    let pattern_fields = &first.map.pattern_fields;
    debug_assert_eq!(pattern_fields.len(), pattern_values.len());
    for (field, value) in pattern_fields.iter().zip(pattern_values) {
        let _ = write!(prefix, ",{}", field.name);
        suffix.push_str(",?");
        params.push(
            field
                .value_type
                .encode(&field.name, value, "", &first.map.pattern)?,
        );
    }
    prefix.push_str(&suffix);
    prefix.push(')');

    if capabilities.contains(SqlCapabilities::ON_DUPLICATE_KEY) {
        prefix.push_str(" ON DUPLICATE KEY UPDATE ");
    } else if capabilities.contains(SqlCapabilities::ON_CONFLICT_DO) {
        prefix.push_str(" ON CONFLICT (");
        for (i, field) in pattern_fields.iter().enumerate() {
            if i > 0 {
                prefix.push(',');
            }
            prefix.push_str(&field.name);
        }
        if username.is_some() {
            if !pattern_fields.is_empty() {
                prefix.push(',');
            }
            prefix.push_str(username_field(first.map)?);
        }
        prefix.push_str(") DO UPDATE SET ");
    } else {
        // no upsert dialect: the schema is expected to forbid duplicates
        return Ok((prefix, params));
    }

    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            prefix.push(',');
        }
        let value_field = field.map.primary_value_field();
        let _ = write!(prefix, "{}=?", value_field.name);
        params.push(
            value_field
                .value_type
                .encode("value", field.value, "", &field.map.pattern)?,
        );
    }
    if let Some((expire_field, at)) = expire_at {
        let _ = write!(prefix, ",{expire_field}=?");
        params.push(SqlParam::Int64(at));
    }
    Ok((prefix, params))
}

/// One queued `atomic_inc` contributing a column to a batched UPDATE.
pub(crate) struct IncField<'a> {
    pub map: &'a DictMap,
    pub diff: i64,
}

/// Build the `UPDATE T SET col = col + ?, …` for an inc-batch.
pub(crate) fn increment_statement(
    table_prefix: &str,
    fields: &[IncField<'_>],
    pattern_values: &[String],
    username: Option<&str>,
) -> Result<(String, Vec<SqlParam>)> {
    debug_assert!(!fields.is_empty());
    let first = &fields[0];
    let mut sql = format!("UPDATE {}{} SET ", table_prefix, first.map.table);
    let mut params = Vec::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            sql.push(',');
        }
        let name = &field.map.primary_value_field().name;
        let _ = write!(sql, "{name}={name}+?");
        params.push(SqlParam::Int64(field.diff));
    }
    build_where(
        first.map,
        pattern_values,
        username,
        RecurseMode::None,
        &mut sql,
        &mut params,
    )?;
    Ok((sql, params))
}

/// Build the DELETE for `unset`.
pub(crate) fn delete_statement(
    map: &DictMap,
    values: &[String],
    username: Option<&str>,
    table_prefix: &str,
) -> Result<(String, Vec<SqlParam>)> {
    let mut sql = format!("DELETE FROM {}{}", table_prefix, map.table);
    let mut params = Vec::new();
    build_where(map, values, username, RecurseMode::None, &mut sql, &mut params)?;
    Ok((sql, params))
}

/// Build the expiry sweep for one map, or `None` when it has no expire
/// column.
pub(crate) fn expire_delete_statement(
    map: &DictMap,
    table_prefix: &str,
    now_secs: i64,
) -> Option<(String, Vec<SqlParam>)> {
    let expire_field = map.expire_field.as_deref()?;
    let sql = format!(
        "DELETE FROM {}{} WHERE {} <= ?",
        table_prefix, map.table, expire_field
    );
    Some((sql, vec![SqlParam::Int64(now_secs)]))
}

/// Wrap query text and parameters into a statement, electing prepared
/// execution when the backend supports it.
pub(crate) fn init_statement(
    db: &dyn SqlBackend,
    sql: String,
    params: Vec<SqlParam>,
) -> SqlStatement {
    let mut stmt = if db
        .capabilities()
        .contains(SqlCapabilities::PREPARED_STATEMENTS)
    {
        SqlStatement::prepared(sql)
    } else {
        SqlStatement::new(sql)
    };
    for (idx, param) in params.into_iter().enumerate() {
        stmt.bind(idx, param);
    }
    stmt
}

#[cfg(test)]
mod tests {
    use sqldict_types::settings::SqlField;
    use sqldict_types::value::SqlValueType;

    use super::*;

    fn quota_map() -> DictMap {
        DictMap {
            pattern: "shared/q/$/lim".to_owned(),
            table: "Q".to_owned(),
            pattern_fields: vec![SqlField::string("u")],
            value_fields: vec![SqlField::typed("v", SqlValueType::Int)],
            username_field: None,
            expire_field: None,
        }
    }

    fn two_field_map() -> DictMap {
        DictMap {
            pattern: "priv/acl/$/$".to_owned(),
            table: "acl".to_owned(),
            pattern_fields: vec![SqlField::string("folder"), SqlField::string("entry")],
            value_fields: vec![SqlField::string("rights")],
            username_field: Some("username".to_owned()),
            expire_field: None,
        }
    }

    fn text(s: &str) -> SqlParam {
        SqlParam::Text(s.to_owned())
    }

    #[test]
    fn lookup_select_exact() {
        let map = quota_map();
        let (sql, params) =
            lookup_select(&map, &["alice".to_owned()], None, "").expect("lookup select");
        assert_eq!(sql, "SELECT v FROM Q WHERE u = ?");
        assert_eq!(params, vec![text("alice")]);
    }

    #[test]
    fn lookup_select_with_expire_and_prefix() {
        let mut map = quota_map();
        map.expire_field = Some("expires".to_owned());
        let (sql, _) =
            lookup_select(&map, &["alice".to_owned()], None, "dict_").expect("lookup select");
        assert_eq!(sql, "SELECT expires,v FROM dict_Q WHERE u = ?");
    }

    #[test]
    fn where_one_level_with_final_field_bound() {
        let map = quota_map();
        let mut sql = String::new();
        let mut params = Vec::new();
        build_where(
            &map,
            &["alice".to_owned()],
            None,
            RecurseMode::One,
            &mut sql,
            &mut params,
        )
        .expect("where");
        assert_eq!(sql, " WHERE u LIKE ? AND u NOT LIKE ?");
        assert_eq!(params, vec![text("alice/%"), text("alice/%/%")]);
    }

    #[test]
    fn where_one_level_with_unbound_final_field() {
        let map = two_field_map();
        let mut sql = String::new();
        let mut params = Vec::new();
        build_where(
            &map,
            &["inbox".to_owned()],
            Some("bob"),
            RecurseMode::One,
            &mut sql,
            &mut params,
        )
        .expect("where");
        assert_eq!(
            sql,
            " WHERE folder = ? AND entry LIKE '%' AND entry NOT LIKE '%/%' AND username = ?"
        );
        assert_eq!(params, vec![text("inbox"), text("bob")]);
    }

    #[test]
    fn where_one_level_without_bound_values_still_filters_depth() {
        let map = quota_map();
        let mut sql = String::new();
        let mut params = Vec::new();
        build_where(&map, &[], None, RecurseMode::One, &mut sql, &mut params).expect("where");
        assert_eq!(sql, " WHERE u LIKE '%' AND u NOT LIKE '%/%'");
        assert!(params.is_empty());
    }

    #[test]
    fn where_full_recursion_binds_subtree_prefix() {
        let map = quota_map();
        let mut sql = String::new();
        let mut params = Vec::new();
        build_where(
            &map,
            &["alice".to_owned()],
            None,
            RecurseMode::Full,
            &mut sql,
            &mut params,
        )
        .expect("where");
        assert_eq!(sql, " WHERE u LIKE ?");
        assert_eq!(params, vec![text("alice/%")]);
    }

    #[test]
    fn where_full_recursion_unconstrained_without_bound_values() {
        let map = quota_map();
        let mut sql = String::new();
        let mut params = Vec::new();
        build_where(&map, &[], None, RecurseMode::Full, &mut sql, &mut params).expect("where");
        assert_eq!(sql, "");
        assert!(params.is_empty());
    }

    #[test]
    fn where_type_error_propagates() {
        let mut map = quota_map();
        map.pattern_fields[0].value_type = SqlValueType::Int;
        let mut sql = String::new();
        let mut params = Vec::new();
        let err = build_where(
            &map,
            &["alice".to_owned()],
            None,
            RecurseMode::None,
            &mut sql,
            &mut params,
        )
        .expect_err("non-numeric segment must fail");
        assert!(matches!(err, DictError::ValueType { .. }));
    }

    #[test]
    fn private_path_without_username_field_is_config_error() {
        let map = quota_map();
        let mut sql = String::new();
        let mut params = Vec::new();
        let err = build_where(
            &map,
            &["alice".to_owned()],
            Some("bob"),
            RecurseMode::None,
            &mut sql,
            &mut params,
        )
        .expect_err("missing username field");
        assert!(matches!(err, DictError::Config(_)));
    }

    #[test]
    fn upsert_mysql_dialect() {
        let map = quota_map();
        let fields = [SetField {
            map: &map,
            value: "5",
        }];
        let (sql, params) = upsert_statement(
            SqlCapabilities::ON_DUPLICATE_KEY,
            "",
            &fields,
            &["alice".to_owned()],
            None,
            None,
        )
        .expect("upsert");
        assert_eq!(
            sql,
            "INSERT INTO Q (v,u) VALUES (?,?) ON DUPLICATE KEY UPDATE v=?"
        );
        // the update arm re-binds the value
        assert_eq!(
            params,
            vec![SqlParam::Int64(5), text("alice"), SqlParam::Int64(5)]
        );
    }

    #[test]
    fn upsert_conflict_dialect_lists_key_columns() {
        let map = two_field_map();
        let fields = [SetField {
            map: &map,
            value: "rw",
        }];
        let (sql, params) = upsert_statement(
            SqlCapabilities::ON_CONFLICT_DO,
            "",
            &fields,
            &["inbox".to_owned(), "owner".to_owned()],
            Some("bob"),
            None,
        )
        .expect("upsert");
        assert_eq!(
            sql,
            "INSERT INTO acl (rights,username,folder,entry) VALUES (?,?,?,?) \
             ON CONFLICT (folder,entry,username) DO UPDATE SET rights=?"
        );
        assert_eq!(
            params,
            vec![
                text("rw"),
                text("bob"),
                text("inbox"),
                text("owner"),
                text("rw")
            ]
        );
    }

    #[test]
    fn upsert_without_dialect_is_bare_insert() {
        let map = quota_map();
        let fields = [SetField {
            map: &map,
            value: "5",
        }];
        let (sql, params) = upsert_statement(
            SqlCapabilities::empty(),
            "",
            &fields,
            &["alice".to_owned()],
            None,
            None,
        )
        .expect("insert");
        assert_eq!(sql, "INSERT INTO Q (v,u) VALUES (?,?)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn upsert_writes_expire_column() {
        let mut map = quota_map();
        map.expire_field = Some("expires".to_owned());
        let fields = [SetField {
            map: &map,
            value: "5",
        }];
        let (sql, params) = upsert_statement(
            SqlCapabilities::ON_DUPLICATE_KEY,
            "",
            &fields,
            &["alice".to_owned()],
            None,
            Some(1_700_000_100),
        )
        .expect("upsert");
        assert_eq!(
            sql,
            "INSERT INTO Q (v,expires,u) VALUES (?,?,?) \
             ON DUPLICATE KEY UPDATE v=?,expires=?"
        );
        assert_eq!(params[1], SqlParam::Int64(1_700_000_100));
        assert_eq!(params[4], SqlParam::Int64(1_700_000_100));
    }

    #[test]
    fn batched_upsert_lists_each_value_column_in_queue_order() {
        let map_a = quota_map();
        let mut map_b = quota_map();
        map_b.pattern = "shared/q/$/used".to_owned();
        map_b.value_fields = vec![SqlField::typed("used", SqlValueType::Int)];
        let fields = [
            SetField {
                map: &map_a,
                value: "5",
            },
            SetField {
                map: &map_b,
                value: "2",
            },
        ];
        let (sql, _) = upsert_statement(
            SqlCapabilities::ON_DUPLICATE_KEY,
            "",
            &fields,
            &["alice".to_owned()],
            None,
            None,
        )
        .expect("upsert");
        assert_eq!(
            sql,
            "INSERT INTO Q (v,used,u) VALUES (?,?,?) ON DUPLICATE KEY UPDATE v=?,used=?"
        );
    }

    #[test]
    fn increment_update_shape() {
        let map = quota_map();
        let fields = [IncField { map: &map, diff: 3 }];
        let (sql, params) =
            increment_statement("", &fields, &["alice".to_owned()], None).expect("increment");
        assert_eq!(sql, "UPDATE Q SET v=v+? WHERE u = ?");
        assert_eq!(params, vec![SqlParam::Int64(3), text("alice")]);
    }

    #[test]
    fn delete_shape() {
        let map = quota_map();
        let (sql, params) =
            delete_statement(&map, &["alice".to_owned()], None, "").expect("delete");
        assert_eq!(sql, "DELETE FROM Q WHERE u = ?");
        assert_eq!(params, vec![text("alice")]);
    }

    #[test]
    fn expire_delete_only_for_maps_with_expire_column() {
        let map = quota_map();
        assert!(expire_delete_statement(&map, "", 1_700_000_000).is_none());
        let mut map = map;
        map.expire_field = Some("expires".to_owned());
        let (sql, params) = expire_delete_statement(&map, "", 1_700_000_000).expect("expiry");
        assert_eq!(sql, "DELETE FROM Q WHERE expires <= ?");
        assert_eq!(params, vec![SqlParam::Int64(1_700_000_000)]);
    }
}
