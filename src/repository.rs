use async_trait::async_trait;

use crate::error::Result;
use crate::mapping::Entity;
use crate::query::Params;

/// Reads by descriptor. `projection` is a selector expression such as
/// `"Name"` or `"(Name, Price)"`; `None` selects every column.
#[async_trait]
pub trait QueryExecutor<T: Entity> {
    async fn get_all(&self, projection: Option<&str>) -> Result<Vec<T>>;

    /// Looks a row up by the entity's key fields. Zero rows is `Ok(None)`.
    async fn get_by_id(&self, entity: &T, projection: Option<&str>) -> Result<Option<T>>;
}

#[async_trait]
pub trait Crud<T: Entity> {
    async fn insert(&self, entity: &T) -> Result<u64>;

    /// Updates only the fields named by `selectors`; each selector may be a
    /// single field or a projection of several.
    async fn update(&self, entity: &T, selectors: &[&str]) -> Result<u64>;

    async fn delete(&self, entity: &T) -> Result<u64>;
}

#[async_trait]
pub trait ProcedureExecutor<T: Entity> {
    async fn execute_stored_procedure(&self, name: &str, params: Params) -> Result<Vec<T>>;
}

pub trait Repository<T: Entity>: QueryExecutor<T> + Crud<T> + ProcedureExecutor<T> {}
