use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::change_tracking::EntityEntry;
use crate::error::{DataError, Result};
use crate::infrastructure::sql_builder;
use crate::mapping::{Entity, FromRow};
use crate::metadata::{EntityMetadata, MetadataRegistry};
use crate::query::{Params, SqlParam};
use crate::repository::{Crud, ProcedureExecutor, QueryExecutor, Repository};
use crate::sql_executor::{CommandOptions, SqlExecutor};

/// CRUD for one entity type, built from its descriptor.
///
/// A repository is bound to the connection and transaction of the executor
/// it was created with and keeps that binding for its whole life.
///
/// By-key operations bind every key field from the entity. With a composite
/// key, leaving some key fields at their default values is undefined: the
/// statement still runs with those defaults and usually matches nothing.
pub struct GenericRepository<T: Entity> {
    sql: SqlExecutor,
    meta: Arc<EntityMetadata>,
    _t: PhantomData<fn() -> T>,
}

impl<T: Entity> GenericRepository<T> {
    pub fn new(sql: SqlExecutor, registry: &MetadataRegistry) -> Self {
        Self::with_metadata(sql, registry.metadata::<T>())
    }

    pub fn with_metadata(sql: SqlExecutor, meta: Arc<EntityMetadata>) -> Self {
        Self {
            sql,
            meta,
            _t: PhantomData,
        }
    }

    pub fn metadata(&self) -> &EntityMetadata {
        &self.meta
    }

    pub fn executor(&self) -> &SqlExecutor {
        &self.sql
    }

    /// Copy of this repository whose calls use `options`.
    pub fn with_options(&self, options: CommandOptions) -> Self {
        Self::with_metadata(self.sql.with_options(options), self.meta.clone())
    }

    fn projection(selector: Option<&str>) -> Result<Vec<String>> {
        match selector {
            Some(expr) => MetadataRegistry::properties_from_expression(expr),
            None => Ok(Vec::new()),
        }
    }

    /// Values of `fields` taken from the entity, NULL when it has none.
    fn bind<'a>(values: &Params, fields: impl IntoIterator<Item = &'a str>) -> Params {
        let mut params = Params::new();
        for name in fields {
            params.push(name, values.value(name).cloned().unwrap_or(SqlParam::Null));
        }
        params
    }

    fn key_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.meta.key_fields().map(|k| k.name.as_str())
    }

    /// Runs a procedure mapping its first result set to any row type.
    pub async fn execute_stored_procedure_as<R: FromRow>(
        &self,
        name: &str,
        params: Params,
    ) -> Result<Vec<R>> {
        self.sql.query_procedure(name, params).await
    }

    /// Updates the fields `entry` recorded as modified, skipping key and
    /// store-generated fields. Returns 0 without a round trip when nothing
    /// is left to update.
    pub async fn update_tracked(&self, entity: &T, entry: &EntityEntry<T>) -> Result<u64> {
        let fields: Vec<String> = entry
            .modified()
            .into_iter()
            .filter(|name| {
                self.meta
                    .field(name)
                    .map_or(true, |f| !f.key && !f.is_store_generated())
            })
            .collect();
        if fields.is_empty() {
            debug!(table = %self.meta.table_name(), "no tracked changes to update");
            return Ok(0);
        }
        self.update_fields(entity, &fields).await
    }

    async fn update_fields(&self, entity: &T, fields: &[String]) -> Result<u64> {
        let sql = sql_builder::update(&self.meta, fields)?;
        let values = entity.to_params();
        let params = Self::bind(
            &values,
            fields.iter().map(String::as_str).chain(self.key_names()),
        );
        self.sql.execute(&sql, params).await
    }
}

impl<T: Entity> Clone for GenericRepository<T> {
    fn clone(&self) -> Self {
        Self::with_metadata(self.sql.clone(), self.meta.clone())
    }
}

#[async_trait]
impl<T: Entity> QueryExecutor<T> for GenericRepository<T> {
    async fn get_all(&self, projection: Option<&str>) -> Result<Vec<T>> {
        let sql = sql_builder::select_all(&self.meta, &Self::projection(projection)?)?;
        self.sql.from_sql(&sql, Params::new()).await
    }

    async fn get_by_id(&self, entity: &T, projection: Option<&str>) -> Result<Option<T>> {
        let sql = sql_builder::select_by_key(&self.meta, &Self::projection(projection)?)?;
        let params = Self::bind(&entity.to_params(), self.key_names());
        self.sql.from_sql_first(&sql, params).await
    }
}

#[async_trait]
impl<T: Entity> Crud<T> for GenericRepository<T> {
    /// Validates required fields, then inserts every mapped field that the
    /// store does not generate.
    async fn insert(&self, entity: &T) -> Result<u64> {
        let values = entity.to_params();
        let errors = self.meta.validate_required(&values);
        if !errors.is_empty() {
            return Err(DataError::Validation(errors));
        }
        let sql = sql_builder::insert(&self.meta)?;
        let params = Self::bind(
            &values,
            self.meta
                .fields()
                .iter()
                .filter(|f| !f.is_store_generated())
                .map(|f| f.name.as_str()),
        );
        self.sql.execute(&sql, params).await
    }

    async fn update(&self, entity: &T, selectors: &[&str]) -> Result<u64> {
        if selectors.is_empty() {
            return Err(DataError::Argument(
                "update requires at least one field selector".to_string(),
            ));
        }
        let mut fields = Vec::new();
        for selector in selectors {
            fields.extend(MetadataRegistry::properties_from_expression(selector)?);
        }
        self.update_fields(entity, &fields).await
    }

    async fn delete(&self, entity: &T) -> Result<u64> {
        let sql = sql_builder::delete(&self.meta)?;
        let params = Self::bind(&entity.to_params(), self.key_names());
        self.sql.execute(&sql, params).await
    }
}

#[async_trait]
impl<T: Entity> ProcedureExecutor<T> for GenericRepository<T> {
    async fn execute_stored_procedure(&self, name: &str, params: Params) -> Result<Vec<T>> {
        self.sql.query_procedure(name, params).await
    }
}

impl<T: Entity> Repository<T> for GenericRepository<T> {}
