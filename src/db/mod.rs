//! Connection abstraction shared by the executor, repositories and unit of
//! work, plus the alias-based factory and the concrete drivers.

mod mssql;
mod postgres;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;

use crate::config::{DatabaseProvider, ToolkitOptions};
use crate::error::{DataError, Result};
use crate::mapping::Row;
use crate::query::{Params, SqlParam};

pub use mssql::{connect_mssql, MssqlConnection};
pub use postgres::{connect_postgres, PostgresConnection};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbKind {
    Mssql,
    Postgres,
}

/// Handle of a pending transaction on one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transaction {
    id: u64,
}

impl Transaction {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Tracks the single pending transaction of a connection and checks that
/// commands are enlisted in it.
#[derive(Debug, Default)]
pub struct TransactionSlot {
    active: Mutex<Option<Transaction>>,
    next_id: AtomicU64,
}

impl TransactionSlot {
    pub fn current(&self) -> Option<Transaction> {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn begin(&self) -> anyhow::Result<Transaction> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = *active {
            bail!("transaction {} is already pending on this connection", tx.id);
        }
        let tx = Transaction::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        *active = Some(tx);
        Ok(tx)
    }

    pub fn complete(&self, tx: &Transaction) -> anyhow::Result<()> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match *active {
            Some(current) if current == *tx => {
                *active = None;
                Ok(())
            }
            _ => bail!("transaction {} is not pending on this connection", tx.id),
        }
    }

    /// Drops the pending transaction without a round trip; used when the
    /// connection itself goes away.
    pub fn clear(&self) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn check_enlisted(&self, requested: Option<&Transaction>) -> anyhow::Result<()> {
        match (self.current(), requested) {
            (None, None) => Ok(()),
            (Some(active), Some(tx)) if active == *tx => Ok(()),
            (Some(active), None) => bail!(
                "command is not enlisted in pending transaction {}; obtain a new repository or executor after begin_transaction",
                active.id
            ),
            (_, Some(tx)) => bail!("transaction {} has already completed", tx.id),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    Text,
    StoredProcedure,
}

/// One statement or procedure call with its named parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    pub text: String,
    pub params: Params,
    pub kind: CommandKind,
    pub transaction: Option<Transaction>,
}

impl Command {
    pub fn text(sql: impl Into<String>, params: Params) -> Self {
        Self {
            text: sql.into(),
            params,
            kind: CommandKind::Text,
            transaction: None,
        }
    }

    pub fn procedure(name: impl Into<String>, params: Params) -> Self {
        Self {
            kind: CommandKind::StoredProcedure,
            ..Self::text(name, params)
        }
    }

    pub fn with_kind(mut self, kind: CommandKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn in_transaction(mut self, transaction: Option<Transaction>) -> Self {
        self.transaction = transaction;
        self
    }
}

/// The generic connection/transaction capability the toolkit runs on.
///
/// A connection is a single session: at most one transaction is pending and
/// commands are issued one at a time. Implementations connect lazily on the
/// first command when [`Connection::open`] has not been called.
#[async_trait]
pub trait Connection: Send + Sync {
    fn kind(&self) -> DbKind;

    fn is_open(&self) -> bool;

    async fn open(&self) -> anyhow::Result<()>;

    async fn begin(&self) -> anyhow::Result<Transaction>;

    async fn commit(&self, tx: &Transaction) -> anyhow::Result<()>;

    async fn rollback(&self, tx: &Transaction) -> anyhow::Result<()>;

    /// Every result set produced by the command, in order.
    async fn query(&self, command: &Command) -> anyhow::Result<Vec<Vec<Row>>>;

    /// Affected row count.
    async fn execute(&self, command: &Command) -> anyhow::Result<u64>;

    /// Affected row count plus the final value of every parameter. The count
    /// matches what [`execute`](Connection::execute) reports for the same
    /// procedure.
    async fn execute_with_output(
        &self,
        command: &Command,
    ) -> anyhow::Result<(u64, HashMap<String, SqlParam>)>;

    async fn close(&self) -> anyhow::Result<()>;
}

pub trait ConnectionFactory: Send + Sync {
    fn create_connection(&self, alias: &str) -> Result<Arc<dyn Connection>>;

    fn default_alias(&self) -> Option<&str> {
        None
    }

    /// Default command timeout configured for `alias`.
    fn command_timeout(&self, _alias: &str) -> Option<Duration> {
        None
    }
}

/// Creates driver connections for named aliases, each bound to its own
/// provider.
#[derive(Clone, Debug)]
pub struct MultiDbConnectionFactory {
    options: ToolkitOptions,
}

impl MultiDbConnectionFactory {
    pub fn new(options: ToolkitOptions) -> Result<Self> {
        if options.connections.is_empty() {
            return Err(DataError::Configuration(
                "at least one connection must be configured".to_string(),
            ));
        }
        Ok(Self { options })
    }

    pub fn options(&self) -> &ToolkitOptions {
        &self.options
    }
}

impl ConnectionFactory for MultiDbConnectionFactory {
    fn create_connection(&self, alias: &str) -> Result<Arc<dyn Connection>> {
        let (_, config) = self.options.connection(alias).ok_or_else(|| {
            DataError::Configuration(format!("no connection configured for alias '{}'", alias))
        })?;
        let invalid = |e: anyhow::Error| {
            DataError::Configuration(format!("invalid connection string for '{}': {:#}", alias, e))
        };
        Ok(match config.provider {
            DatabaseProvider::SqlServer => Arc::new(
                MssqlConnection::from_connection_string(&config.connection_string)
                    .map_err(invalid)?,
            ),
            DatabaseProvider::Postgres => Arc::new(
                PostgresConnection::from_connection_string(&config.connection_string)
                    .map_err(invalid)?,
            ),
        })
    }

    fn default_alias(&self) -> Option<&str> {
        self.options.default_alias()
    }

    fn command_timeout(&self, alias: &str) -> Option<Duration> {
        self.options
            .connection(alias)
            .and_then(|(_, c)| c.command_timeout_secs)
            .map(Duration::from_secs)
    }
}
