use std::ops::Range;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};

use crate::metadata::EntityMetadata;
use crate::query::{Params, SqlParam};

/// A driver-neutral result row: column names shared across the result set
/// plus one value per column.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlParam>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<SqlParam>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn from_pairs<S, I>(pairs: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, SqlParam)>,
    {
        let (columns, values): (Vec<String>, Vec<SqlParam>) =
            pairs.into_iter().map(|(c, v)| (c.into(), v)).unzip();
        Self::new(columns.into(), values)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlParam] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Exact match first, then case-insensitive.
    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c == column)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(column)))
    }

    pub fn get_raw(&self, column: &str) -> Option<&SqlParam> {
        self.index_of(column).map(|i| &self.values[i])
    }

    pub fn get<T: FromParam>(&self, column: &str) -> anyhow::Result<T> {
        let value = self
            .get_raw(column)
            .ok_or_else(|| anyhow!("column '{}' not present in result", column))?;
        T::from_param(value).with_context(|| format!("reading column '{}'", column))
    }

    /// Absent columns yield `T::default()`; present ones must convert.
    pub fn get_or_default<T: FromParam + Default>(&self, column: &str) -> anyhow::Result<T> {
        match self.get_raw(column) {
            Some(value) => {
                T::from_param(value).with_context(|| format!("reading column '{}'", column))
            }
            None => Ok(T::default()),
        }
    }

    /// Sub-row over a contiguous column range, used by multi-mapping.
    pub fn slice(&self, range: Range<usize>) -> Row {
        Row {
            columns: self.columns[range.clone()].to_vec().into(),
            values: self.values[range].to_vec(),
        }
    }
}

pub trait FromParam: Sized {
    fn from_param(value: &SqlParam) -> anyhow::Result<Self>;
}

fn mismatch<T>(expected: &str, value: &SqlParam) -> anyhow::Result<T> {
    if value.is_null() {
        bail!("unexpected NULL where {} was expected", expected)
    }
    bail!("cannot convert {:?} into {}", value, expected)
}

impl FromParam for i32 {
    fn from_param(value: &SqlParam) -> anyhow::Result<Self> {
        match value {
            SqlParam::I32(v) => Ok(*v),
            SqlParam::I64(v) => i32::try_from(*v).context("integer out of range for i32"),
            other => mismatch("i32", other),
        }
    }
}

impl FromParam for i64 {
    fn from_param(value: &SqlParam) -> anyhow::Result<Self> {
        match value {
            SqlParam::I32(v) => Ok(i64::from(*v)),
            SqlParam::I64(v) => Ok(*v),
            other => mismatch("i64", other),
        }
    }
}

impl FromParam for f64 {
    fn from_param(value: &SqlParam) -> anyhow::Result<Self> {
        use rust_decimal::prelude::ToPrimitive;
        match value {
            SqlParam::F64(v) => Ok(*v),
            SqlParam::I32(v) => Ok(f64::from(*v)),
            SqlParam::Decimal(d) => d.to_f64().context("decimal out of range for f64"),
            other => mismatch("f64", other),
        }
    }
}

impl FromParam for bool {
    fn from_param(value: &SqlParam) -> anyhow::Result<Self> {
        match value {
            SqlParam::Bool(v) => Ok(*v),
            SqlParam::I32(v) => Ok(*v != 0),
            other => mismatch("bool", other),
        }
    }
}

impl FromParam for String {
    fn from_param(value: &SqlParam) -> anyhow::Result<Self> {
        match value {
            SqlParam::Text(v) => Ok(v.clone()),
            other => mismatch("text", other),
        }
    }
}

impl FromParam for uuid::Uuid {
    fn from_param(value: &SqlParam) -> anyhow::Result<Self> {
        match value {
            SqlParam::Uuid(v) => Ok(*v),
            SqlParam::Text(v) => uuid::Uuid::parse_str(v).context("invalid uuid text"),
            other => mismatch("uuid", other),
        }
    }
}

impl FromParam for rust_decimal::Decimal {
    fn from_param(value: &SqlParam) -> anyhow::Result<Self> {
        match value {
            SqlParam::Decimal(v) => Ok(*v),
            SqlParam::I32(v) => Ok((*v).into()),
            SqlParam::I64(v) => Ok((*v).into()),
            SqlParam::F64(v) => {
                rust_decimal::Decimal::try_from(*v).context("float not representable as decimal")
            }
            other => mismatch("decimal", other),
        }
    }
}

impl FromParam for chrono::NaiveDateTime {
    fn from_param(value: &SqlParam) -> anyhow::Result<Self> {
        match value {
            SqlParam::DateTime(v) => Ok(*v),
            other => mismatch("datetime", other),
        }
    }
}

impl FromParam for Vec<u8> {
    fn from_param(value: &SqlParam) -> anyhow::Result<Self> {
        match value {
            SqlParam::Bytes(v) => Ok(v.clone()),
            other => mismatch("bytes", other),
        }
    }
}

impl FromParam for SqlParam {
    fn from_param(value: &SqlParam) -> anyhow::Result<Self> {
        Ok(value.clone())
    }
}

impl<T: FromParam> FromParam for Option<T> {
    fn from_param(value: &SqlParam) -> anyhow::Result<Self> {
        match value {
            SqlParam::Null => Ok(None),
            other => T::from_param(other).map(Some),
        }
    }
}

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> anyhow::Result<Self>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> anyhow::Result<Self> {
        Ok(row.clone())
    }
}

/// A type mapped to exactly one table.
///
/// Usually implemented with `#[derive(Entity)]`; hand-written impls declare
/// their schema through [`EntityMetadata::builder`].
pub trait Entity: FromRow + Send + Sync + 'static {
    /// Builds the schema descriptor. Called once per type by the
    /// [`MetadataRegistry`](crate::metadata::MetadataRegistry).
    fn describe() -> EntityMetadata;

    /// Current field values keyed by field name.
    fn to_params(&self) -> Params;
}
