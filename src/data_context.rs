//! Single entry point for services: raw SQL, procedures, repositories and
//! transactions over one [`UnitOfWork`].

use std::sync::Arc;

use crate::db::{Connection, ConnectionFactory};
use crate::error::Result;
use crate::fluent::FluentQuery;
use crate::infrastructure::generic_repository::GenericRepository;
use crate::mapping::Entity;
use crate::metadata::MetadataRegistry;
use crate::sql_executor::SqlExecutor;
use crate::stored_procedures::StoredProcedureExecutor;
use crate::unit_of_work::UnitOfWork;

pub struct DataContext {
    uow: UnitOfWork,
}

impl DataContext {
    /// Opens a context on the factory's default alias.
    pub fn new(factory: &dyn ConnectionFactory, registry: Arc<MetadataRegistry>) -> Result<Self> {
        UnitOfWork::with_default_alias(factory, registry).map(Self::from_unit_of_work)
    }

    pub fn for_alias(
        factory: &dyn ConnectionFactory,
        alias: &str,
        registry: Arc<MetadataRegistry>,
    ) -> Result<Self> {
        UnitOfWork::new(factory, alias, registry).map(Self::from_unit_of_work)
    }

    pub fn from_connection(conn: Arc<dyn Connection>, registry: Arc<MetadataRegistry>) -> Self {
        Self::from_unit_of_work(UnitOfWork::from_connection(conn, registry))
    }

    pub fn from_unit_of_work(uow: UnitOfWork) -> Self {
        Self { uow }
    }

    pub fn sql(&self) -> Result<&SqlExecutor> {
        self.uow.sql()
    }

    pub fn stored_procedures(&self) -> Result<&StoredProcedureExecutor> {
        self.uow.stored_procedures()
    }

    pub fn query(&self) -> Result<FluentQuery> {
        self.uow.fluent()
    }

    /// Repository for `T`, enlisted in the pending transaction if any.
    pub fn repository<T: Entity>(&mut self) -> Result<GenericRepository<T>> {
        self.uow.get_repository::<T>()
    }

    pub async fn begin_transaction(&mut self) -> Result<()> {
        self.uow.begin_transaction().await
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.uow.commit().await
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.uow.rollback().await
    }

    pub fn in_transaction(&self) -> bool {
        self.uow.in_transaction()
    }

    /// Rolls back a pending transaction and releases the connection.
    pub async fn close(&mut self) -> Result<()> {
        self.uow.close().await
    }

    pub fn unit_of_work(&mut self) -> &mut UnitOfWork {
        &mut self.uow
    }

    pub fn into_unit_of_work(self) -> UnitOfWork {
        self.uow
    }
}
