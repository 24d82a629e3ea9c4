//! SQL text synthesis for replicated changes.
//!
//! Turns an action plus a field map into the statement text a target node
//! replays. Field names are upper-cased; values are rendered as literals.
//! Schema, table, key and field names must be plain identifiers
//! (`[A-Za-z_][A-Za-z0-9_]*`); anything else is rejected.

use rollcall_common::{Action, FieldMap, FieldValue, RollcallError, RollcallResult};

/// Pattern used for timestamp literals
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Where a change applies
#[derive(Debug, Clone, Copy)]
pub struct SqlTarget<'a> {
    /// Schema; empty for the search path
    pub schema: &'a str,
    pub table: &'a str,
    /// Column holding the transaction identifier
    pub key_column: &'a str,
}

impl SqlTarget<'_> {
    fn qualified(&self) -> String {
        if self.schema.is_empty() {
            self.table.to_string()
        } else {
            format!("{}.{}", self.schema, self.table)
        }
    }

    fn key(&self) -> String {
        self.key_column.to_uppercase()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_identifier(what: &str, name: &str) -> RollcallResult<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(RollcallError::InvalidInput(format!("{what} {name:?} is not a plain identifier")))
    }
}

fn check_names(target: &SqlTarget<'_>, fields: &FieldMap) -> RollcallResult<()> {
    if !target.schema.is_empty() {
        check_identifier("schema", target.schema)?;
    }
    check_identifier("table", target.table)?;
    check_identifier("key column", target.key_column)?;
    fields.keys().try_for_each(|name| check_identifier("field", name))
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Render one value as a SQL literal
pub fn render_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Null => "NULL".to_string(),
        FieldValue::Bool(b) => b.to_string(),
        FieldValue::Int(i) => i.to_string(),
        FieldValue::UInt(u) => u.to_string(),
        FieldValue::Float(f) if f.is_finite() => f.to_string(),
        FieldValue::Float(f) => quote(&f.to_string()),
        FieldValue::Text(s) => quote(s),
        FieldValue::Timestamp(ts) => quote(&ts.format(TIMESTAMP_FORMAT).to_string()),
        FieldValue::Json(v) => quote(&v.to_string()),
    }
}

/// `(NAME, RENDERED)` pairs in field-map order
pub fn rendered_pairs(fields: &FieldMap) -> Vec<(String, String)> {
    fields
        .iter()
        .map(|(name, value)| (name.to_uppercase(), render_value(value)))
        .collect()
}

/// Parenthesized column list: `(A, B, C)`
pub fn columns(fields: &FieldMap) -> String {
    let names: Vec<_> = fields.keys().map(|k| k.to_uppercase()).collect();
    format!("({})", names.join(", "))
}

/// Parenthesized value tuple, in the same order as [`columns`]
pub fn values(fields: &FieldMap) -> String {
    let rendered: Vec<_> = fields.values().map(render_value).collect();
    format!("({})", rendered.join(", "))
}

fn key_value<'f>(target: &SqlTarget<'_>, fields: &'f FieldMap) -> RollcallResult<&'f FieldValue> {
    fields
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(target.key_column))
        .map(|(_, value)| value)
        .ok_or_else(|| {
            RollcallError::InvalidInput(format!(
                "change for {} has no {} field",
                target.qualified(),
                target.key()
            ))
        })
}

/// Resolve a change into replayable SQL text.
///
/// - `Insert` yields the value tuple only; combine it with [`columns`]
///   (or use [`statement`]).
/// - `Update` yields an upsert. Its `SET` clause assigns the key column
///   to itself, so an existing row keeps its key.
/// - `Delete` yields a delete by key.
pub fn resolve(action: Action, target: SqlTarget<'_>, fields: &FieldMap) -> RollcallResult<String> {
    check_names(&target, fields)?;
    if fields.is_empty() {
        return Err(RollcallError::InvalidInput(format!(
            "{action} on {} carries no fields",
            target.qualified()
        )));
    }

    match action {
        Action::Insert => Ok(values(fields)),
        Action::Update => {
            key_value(&target, fields)?;
            let key = target.key();
            let assignments: Vec<_> = rendered_pairs(fields)
                .into_iter()
                .map(|(name, value)| {
                    if name == key {
                        format!("{name} = {}.{name}", target.table)
                    } else {
                        format!("{name} = {value}")
                    }
                })
                .collect();
            Ok(format!(
                "INSERT INTO {} {} VALUES {} ON CONFLICT ({key}) DO UPDATE SET {}",
                target.qualified(),
                columns(fields),
                values(fields),
                assignments.join(", ")
            ))
        }
        Action::Delete => {
            let value = key_value(&target, fields)?;
            Ok(format!(
                "DELETE FROM {} WHERE {} = {}",
                target.qualified(),
                target.key(),
                render_value(value)
            ))
        }
    }
}

/// Like [`resolve`], but an insert comes back as a complete statement
pub fn statement(action: Action, target: SqlTarget<'_>, fields: &FieldMap) -> RollcallResult<String> {
    let resolved = resolve(action, target, fields)?;
    match action {
        Action::Insert => Ok(format!(
            "INSERT INTO {} {} VALUES {}",
            target.qualified(),
            columns(fields),
            resolved
        )),
        Action::Update | Action::Delete => Ok(resolved),
    }
}
