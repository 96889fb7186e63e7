//! Statement text derived from an entity descriptor.
//!
//! These functions look only at the descriptor, never at entity values.
//! Every value placeholder is `@<field name>`; the drivers rewrite named
//! placeholders into their positional form.

use crate::error::{DataError, Result};
use crate::metadata::EntityMetadata;

/// `SELECT <cols|*> FROM <table>`.
pub fn select_all(meta: &EntityMetadata, projection: &[String]) -> Result<String> {
    Ok(format!(
        "SELECT {} FROM {}",
        select_list(meta, projection)?,
        meta.table_name()
    ))
}

/// `SELECT ... WHERE k1 = @k1 AND k2 = @k2`, keys in declaration order.
pub fn select_by_key(meta: &EntityMetadata, projection: &[String]) -> Result<String> {
    Ok(format!(
        "{} WHERE {}",
        select_all(meta, projection)?,
        key_predicate(meta, "select by key")?
    ))
}

/// Every mapped field except identity and computed ones.
pub fn insert(meta: &EntityMetadata) -> Result<String> {
    let fields: Vec<_> = meta
        .fields()
        .iter()
        .filter(|f| !f.is_store_generated())
        .collect();
    if fields.is_empty() {
        return Ok(format!("INSERT INTO {} DEFAULT VALUES", meta.table_name()));
    }
    let columns: Vec<&str> = fields.iter().map(|f| f.column.as_str()).collect();
    let values: Vec<String> = fields.iter().map(|f| format!("@{}", f.name)).collect();
    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        meta.table_name(),
        columns.join(", "),
        values.join(", ")
    ))
}

/// `UPDATE <table> SET <fields> WHERE <keys>`.
///
/// `fields` must be non-empty, resolve against the descriptor and exclude
/// identity and computed fields. Duplicates collapse into one assignment.
pub fn update(meta: &EntityMetadata, fields: &[String]) -> Result<String> {
    if fields.is_empty() {
        return Err(DataError::Argument(
            "update requires at least one field selector".to_string(),
        ));
    }
    let predicate = key_predicate(meta, "update")?;

    let mut assignments: Vec<String> = Vec::with_capacity(fields.len());
    let mut seen: Vec<&str> = Vec::with_capacity(fields.len());
    for name in fields {
        let field = meta.resolve(name)?;
        if field.is_store_generated() {
            return Err(DataError::Argument(format!(
                "field '{}' is generated by the store and cannot be updated",
                field.name
            )));
        }
        if seen.contains(&field.name.as_str()) {
            continue;
        }
        seen.push(&field.name);
        assignments.push(format!("{} = @{}", field.column, field.name));
    }

    Ok(format!(
        "UPDATE {} SET {} WHERE {}",
        meta.table_name(),
        assignments.join(", "),
        predicate
    ))
}

/// `DELETE FROM <table> WHERE <keys>`.
pub fn delete(meta: &EntityMetadata) -> Result<String> {
    Ok(format!(
        "DELETE FROM {} WHERE {}",
        meta.table_name(),
        key_predicate(meta, "delete")?
    ))
}

fn select_list(meta: &EntityMetadata, projection: &[String]) -> Result<String> {
    if projection.is_empty() {
        return Ok("*".to_string());
    }
    let columns = projection
        .iter()
        .map(|name| meta.resolve(name).map(|f| f.column.as_str()))
        .collect::<Result<Vec<_>>>()?;
    Ok(columns.join(", "))
}

fn key_predicate(meta: &EntityMetadata, operation: &str) -> Result<String> {
    if !meta.has_keys() {
        return Err(DataError::State(format!(
            "{} on '{}' requires key fields but none are declared",
            operation,
            meta.table_name()
        )));
    }
    let conjuncts: Vec<String> = meta
        .key_fields()
        .map(|k| format!("{} = @{}", k.column, k.name))
        .collect();
    Ok(conjuncts.join(" AND "))
}
