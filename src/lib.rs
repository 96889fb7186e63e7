//! Metadata-driven data access: SQL derived from declared entity schemas,
//! raw execution through a single choke point, and a unit of work that
//! coordinates repositories over one connection and transaction.

pub mod change_tracking;
pub mod config;
pub mod data_context;
pub mod db;
pub mod error;
pub mod fluent;
pub mod infrastructure;
pub mod mapping;
pub mod metadata;
pub mod query;
pub mod repository;
pub mod sql_executor;
pub mod stored_procedures;
pub mod unit_of_work;

pub use change_tracking::EntityEntry;
pub use config::{ConnectionConfig, DatabaseProvider, ToolkitOptions};
pub use data_context::DataContext;
pub use db::{
    connect_mssql, connect_postgres, Command, CommandKind, Connection, ConnectionFactory, DbKind,
    MultiDbConnectionFactory, Transaction,
};
pub use error::{CancelReason, DataError, Result};
pub use fluent::{FluentQuery, JoinType};
pub use infrastructure::generic_repository::GenericRepository;
pub use mapping::{Entity, FromParam, FromRow, Row};
pub use metadata::{EntityMetadata, FieldDescriptor, MetadataRegistry};
pub use query::{InterpolatedSql, Params, PlaceholderStyle, SqlParam, SqlType, ToParam};
pub use repository::{Crud, ProcedureExecutor, QueryExecutor, Repository};
pub use sql_executor::{CommandOptions, MultiMap, MultiMapRequest, SqlExecutor};
pub use stored_procedures::StoredProcedureExecutor;
pub use unit_of_work::UnitOfWork;

pub use rquery_toolkit_macros::Entity; // derive macro

#[doc(hidden)]
pub use anyhow;
pub use tokio_util::sync::CancellationToken;
