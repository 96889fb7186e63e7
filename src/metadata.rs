//! Schema descriptors and the process-wide registry that memoizes them.
//!
//! A descriptor is built once per entity type from its static declaration
//! (`#[derive(Entity)]` or a hand-written [`Entity::describe`]) and is
//! immutable afterwards. The [`MetadataRegistry`] is constructed explicitly
//! and shared by reference; it is the only mutable state shared between
//! units of work.

use std::any::{type_name, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{DataError, Result};
use crate::mapping::Entity;
use crate::query::{Params, SqlParam, SqlType};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub column: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub key: bool,
    pub identity: bool,
    pub required: bool,
    pub computed: bool,
}

impl FieldDescriptor {
    /// A plain mapped field whose column shares the field's name.
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            sql_type,
            nullable: false,
            key: false,
            identity: false,
            required: false,
            computed: false,
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    pub fn identity(mut self) -> Self {
        self.identity = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    /// Identity and computed values are assigned by the store.
    pub fn is_store_generated(&self) -> bool {
        self.identity || self.computed
    }
}

#[derive(Debug)]
pub struct EntityMetadataBuilder {
    table: String,
    schema: Option<String>,
    fields: Vec<FieldDescriptor>,
    not_mapped: Vec<String>,
}

impl EntityMetadataBuilder {
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn not_mapped(mut self, name: impl Into<String>) -> Self {
        self.not_mapped.push(name.into());
        self
    }

    pub fn build(self) -> EntityMetadata {
        let table_name = match self.schema {
            Some(schema) => format!("{}.{}", schema, self.table),
            None => self.table,
        };

        let mut fields: Vec<FieldDescriptor> = Vec::with_capacity(self.fields.len());
        let mut index = HashMap::with_capacity(self.fields.len());
        for field in self.fields {
            if index.contains_key(&field.name) {
                warn!(table = %table_name, field = %field.name, "duplicate field declaration ignored");
                continue;
            }
            index.insert(field.name.clone(), fields.len());
            fields.push(field);
        }

        let positions = |pred: fn(&FieldDescriptor) -> bool| -> Vec<usize> {
            fields
                .iter()
                .enumerate()
                .filter(|(_, f)| pred(f))
                .map(|(i, _)| i)
                .collect()
        };
        let keys = positions(|f| f.key);
        let identities = positions(|f| f.identity);
        let required = positions(|f| f.required);

        EntityMetadata {
            table_name,
            keys,
            identities,
            required,
            index,
            not_mapped: self.not_mapped.into_iter().collect(),
            fields,
        }
    }
}

/// Schema descriptor of one entity type.
#[derive(Debug)]
pub struct EntityMetadata {
    table_name: String,
    fields: Vec<FieldDescriptor>,
    index: HashMap<String, usize>,
    keys: Vec<usize>,
    identities: Vec<usize>,
    required: Vec<usize>,
    not_mapped: HashSet<String>,
}

impl EntityMetadata {
    pub fn builder(table: impl Into<String>) -> EntityMetadataBuilder {
        EntityMetadataBuilder {
            table: table.into(),
            schema: None,
            fields: Vec::new(),
            not_mapped: Vec::new(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Mapped fields in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    /// Key fields in declaration order.
    pub fn key_fields(&self) -> impl Iterator<Item = &FieldDescriptor> + '_ {
        self.keys.iter().map(move |&i| &self.fields[i])
    }

    pub fn identity_fields(&self) -> impl Iterator<Item = &FieldDescriptor> + '_ {
        self.identities.iter().map(move |&i| &self.fields[i])
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDescriptor> + '_ {
        self.required.iter().map(move |&i| &self.fields[i])
    }

    pub fn has_keys(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Field name to column name pairs in declaration order.
    pub fn column_mappings(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.fields
            .iter()
            .map(|f| (f.name.as_str(), f.column.as_str()))
    }

    pub fn column_name(&self, field: &str) -> Option<&str> {
        self.field(field).map(|f| f.column.as_str())
    }

    pub fn is_key(&self, field: &str) -> bool {
        self.field(field).map_or(false, |f| f.key)
    }

    pub fn is_identity(&self, field: &str) -> bool {
        self.field(field).map_or(false, |f| f.identity)
    }

    pub fn is_required(&self, field: &str) -> bool {
        self.field(field).map_or(false, |f| f.required)
    }

    pub fn is_not_mapped(&self, field: &str) -> bool {
        self.not_mapped.contains(field)
    }

    /// Looks a field up, failing with [`DataError::Mapping`].
    pub fn resolve(&self, field: &str) -> Result<&FieldDescriptor> {
        self.field(field).ok_or_else(|| {
            let reason = if self.is_not_mapped(field) {
                "is not mapped"
            } else {
                "does not exist"
            };
            DataError::Mapping(format!(
                "field '{}' {} on '{}'",
                field, reason, self.table_name
            ))
        })
    }

    /// Messages for required fields that are NULL or empty text.
    pub fn validate_required(&self, values: &Params) -> Vec<String> {
        let mut errors = Vec::new();
        for field in self.required_fields() {
            match values.value(&field.name) {
                None | Some(SqlParam::Null) => errors.push(format!("{} is required", field.name)),
                Some(SqlParam::Text(s)) if s.is_empty() => {
                    errors.push(format!("{} cannot be empty", field.name))
                }
                Some(_) => {}
            }
        }
        errors
    }
}

type Slot = Arc<OnceCell<Arc<EntityMetadata>>>;

/// Memoizes one [`EntityMetadata`] per entity type.
///
/// Entries are populated lazily on first request and never change or get
/// evicted. Concurrent first requests for the same type share a single
/// `OnceCell`, so exactly one descriptor is built and every caller observes
/// the same `Arc`.
#[derive(Default)]
pub struct MetadataRegistry {
    entries: RwLock<HashMap<TypeId, Slot>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata<T: Entity>(&self) -> Arc<EntityMetadata> {
        let slot = self.slot(TypeId::of::<T>());
        slot.get_or_init(|| {
            debug!(entity = type_name::<T>(), "building entity metadata");
            Arc::new(T::describe())
        })
        .clone()
    }

    fn slot(&self, id: TypeId) -> Slot {
        if let Some(slot) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
        {
            return slot.clone();
        }
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .clone()
    }

    /// Number of entity types with a published descriptor.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn table_name<T: Entity>(&self) -> String {
        self.metadata::<T>().table_name().to_string()
    }

    /// Column for `field`, falling back to the field name when unmapped.
    pub fn column_name<T: Entity>(&self, field: &str) -> String {
        self.metadata::<T>()
            .column_name(field)
            .unwrap_or(field)
            .to_string()
    }

    pub fn is_key<T: Entity>(&self, field: &str) -> bool {
        self.metadata::<T>().is_key(field)
    }

    pub fn is_identity<T: Entity>(&self, field: &str) -> bool {
        self.metadata::<T>().is_identity(field)
    }

    pub fn is_required<T: Entity>(&self, field: &str) -> bool {
        self.metadata::<T>().is_required(field)
    }

    pub fn is_not_mapped<T: Entity>(&self, field: &str) -> bool {
        self.metadata::<T>().is_not_mapped(field)
    }

    /// Field names referenced by a selector expression.
    ///
    /// Accepts a single field (`Name`) or a projection of several fields
    /// (`(Name, Email)` or `{ Name, Email }`). Anything else is an
    /// [`DataError::Argument`].
    pub fn properties_from_expression(expr: &str) -> Result<Vec<String>> {
        let trimmed = expr.trim();
        let unsupported = || {
            DataError::Argument(format!(
                "unsupported selector '{}': use Field or (Field1, Field2)",
                expr
            ))
        };

        let inner = trimmed
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .or_else(|| trimmed.strip_prefix('{').and_then(|s| s.strip_suffix('}')));

        match inner {
            Some(list) => {
                let names: Vec<String> = list.split(',').map(|s| s.trim().to_string()).collect();
                if names.iter().all(|n| is_identifier(n)) {
                    Ok(names)
                } else {
                    Err(unsupported())
                }
            }
            None if is_identifier(trimmed) => Ok(vec![trimmed.to_string()]),
            None => Err(unsupported()),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => chars.all(|c| c.is_alphanumeric() || c == '_'),
        _ => false,
    }
}
