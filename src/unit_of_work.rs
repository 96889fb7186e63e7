//! One connection, at most one transaction, and the repositories bound to
//! them.
//!
//! ```text
//! Idle --begin_transaction--> InTransaction --commit|rollback--> Idle
//! ```
//!
//! Repositories are cached per entity type and bound to the transaction that
//! was current when they were created. Every transition clears the cache,
//! so a repository obtained before `begin_transaction` does not join the
//! transaction: fetch it again with [`UnitOfWork::get_repository`]. A stale
//! repository used while a transaction is pending is rejected by the
//! connection with an execution error.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::db::{Connection, ConnectionFactory, Transaction};
use crate::error::{DataError, Result};
use crate::fluent::FluentQuery;
use crate::infrastructure::generic_repository::GenericRepository;
use crate::mapping::Entity;
use crate::metadata::MetadataRegistry;
use crate::sql_executor::SqlExecutor;
use crate::stored_procedures::StoredProcedureExecutor;

pub struct UnitOfWork {
    conn: Arc<dyn Connection>,
    registry: Arc<MetadataRegistry>,
    default_timeout: Option<Duration>,
    tx: Option<Transaction>,
    sql: SqlExecutor,
    procedures: StoredProcedureExecutor,
    repositories: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    closed: bool,
}

impl UnitOfWork {
    /// Creates the connection for `alias` and picks up the alias' default
    /// command timeout.
    pub fn new(
        factory: &dyn ConnectionFactory,
        alias: &str,
        registry: Arc<MetadataRegistry>,
    ) -> Result<Self> {
        let conn = factory.create_connection(alias)?;
        debug!(alias, "unit of work created");
        let timeout = factory.command_timeout(alias);
        Ok(Self::from_connection(conn, registry).with_default_timeout(timeout))
    }

    /// Uses the factory's default alias.
    pub fn with_default_alias(
        factory: &dyn ConnectionFactory,
        registry: Arc<MetadataRegistry>,
    ) -> Result<Self> {
        let alias = factory
            .default_alias()
            .ok_or_else(|| {
                DataError::Configuration("no default connection alias configured".to_string())
            })?
            .to_string();
        Self::new(factory, &alias, registry)
    }

    pub fn from_connection(conn: Arc<dyn Connection>, registry: Arc<MetadataRegistry>) -> Self {
        let sql = SqlExecutor::new(conn.clone(), None);
        Self {
            procedures: StoredProcedureExecutor::new(sql.clone()),
            sql,
            conn,
            registry,
            default_timeout: None,
            tx: None,
            repositories: HashMap::new(),
            closed: false,
        }
    }

    /// Timeout applied to every command issued through this unit of work.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self.rebind();
        self
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.registry
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(DataError::State("unit of work is closed".to_string()));
        }
        Ok(())
    }

    /// Rebuilds the executors for the current transaction and drops every
    /// cached repository.
    fn rebind(&mut self) {
        self.sql = SqlExecutor::new(self.conn.clone(), self.tx)
            .with_default_timeout(self.default_timeout);
        self.procedures = StoredProcedureExecutor::new(self.sql.clone());
        self.repositories.clear();
    }

    pub fn sql(&self) -> Result<&SqlExecutor> {
        self.ensure_open()?;
        Ok(&self.sql)
    }

    pub fn stored_procedures(&self) -> Result<&StoredProcedureExecutor> {
        self.ensure_open()?;
        Ok(&self.procedures)
    }

    pub fn fluent(&self) -> Result<FluentQuery> {
        self.ensure_open()?;
        Ok(FluentQuery::new(self.sql.clone()))
    }

    /// Repository for `T` bound to the current connection and transaction.
    pub fn get_repository<T: Entity>(&mut self) -> Result<GenericRepository<T>> {
        self.ensure_open()?;
        let sql = &self.sql;
        let registry = &self.registry;
        let cached = self
            .repositories
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(GenericRepository::<T>::new(sql.clone(), registry)));
        cached
            .downcast_ref::<GenericRepository<T>>()
            .cloned()
            .ok_or_else(|| DataError::State("repository cache holds a foreign type".to_string()))
    }

    /// Opens the connection if needed and starts a transaction.
    pub async fn begin_transaction(&mut self) -> Result<()> {
        self.ensure_open()?;
        if let Some(tx) = self.tx {
            return Err(DataError::State(format!(
                "transaction {} is already pending",
                tx.id()
            )));
        }
        let conn = self.conn.clone();
        let tx = self
            .sql
            .execute_safe_async("BEGIN TRANSACTION", async move {
                if !conn.is_open() {
                    conn.open().await?;
                }
                conn.begin().await
            })
            .await?;
        debug!(transaction = tx.id(), "transaction started");
        self.tx = Some(tx);
        self.rebind();
        Ok(())
    }

    /// Commits and returns to idle. When the commit fails the transaction
    /// is rolled back before the error is returned.
    pub async fn commit(&mut self) -> Result<()> {
        let tx = self.take_transaction("commit")?;
        let conn = self.conn.clone();
        let res = self
            .sql
            .execute_safe_async("COMMIT TRANSACTION", async move { conn.commit(&tx).await })
            .await;
        if res.is_err() {
            if let Err(e) = self.conn.rollback(&tx).await {
                warn!(
                    transaction = tx.id(),
                    error = %format!("{:#}", e),
                    "rollback after failed commit failed"
                );
            }
        } else {
            debug!(transaction = tx.id(), "transaction committed");
        }
        self.rebind();
        res
    }

    pub async fn rollback(&mut self) -> Result<()> {
        let tx = self.take_transaction("rollback")?;
        let conn = self.conn.clone();
        let res = self
            .sql
            .execute_safe_async("ROLLBACK TRANSACTION", async move { conn.rollback(&tx).await })
            .await;
        if res.is_ok() {
            debug!(transaction = tx.id(), "transaction rolled back");
        }
        self.rebind();
        res
    }

    fn take_transaction(&mut self, operation: &str) -> Result<Transaction> {
        self.ensure_open()?;
        self.tx.take().ok_or_else(|| {
            DataError::State(format!("{} requires a pending transaction", operation))
        })
    }

    /// Rolls back a pending transaction and closes the connection. Calling it
    /// again is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let rollback = match self.tx {
            Some(_) => self.rollback().await,
            None => Ok(()),
        };
        self.closed = true;
        self.repositories.clear();
        let conn = self.conn.clone();
        self.sql
            .execute_safe_async("CLOSE CONNECTION", async move { conn.close().await })
            .await?;
        debug!("unit of work closed");
        rollback
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.closed {
            if let Some(tx) = self.tx {
                warn!(
                    transaction = tx.id(),
                    "unit of work dropped with a pending transaction; call close() to roll it back"
                );
            }
        }
    }
}
