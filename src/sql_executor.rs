//! Raw SQL access for services that need more than CRUD.
//!
//! Every round trip goes through [`SqlExecutor::execute_safe_async`] and every
//! row mapping through [`SqlExecutor::execute_safe`]. Those two functions are
//! the only places that produce [`DataError::Execution`]; each failure is
//! logged there exactly once with the statement text.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, trace, warn, Level};

use crate::db::{Command, CommandKind, Connection, Transaction};
use crate::error::{CancelReason, DataError, Result};
use crate::mapping::{FromRow, Row};
use crate::query::{InterpolatedSql, Params, SqlParam};

/// Per-call deadline and cancellation signal.
#[derive(Clone, Debug, Default)]
pub struct CommandOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl CommandOptions {
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: None,
        }
    }

    pub fn cancel(token: CancellationToken) -> Self {
        Self {
            timeout: None,
            cancel: Some(token),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Query whose rows hold the columns of several types side by side.
///
/// `split_on` names the column that starts each type after the first. A
/// single name applies to every boundary; a comma separated list gives one
/// name per boundary.
#[derive(Clone, Debug, PartialEq)]
pub struct MultiMapRequest {
    pub sql: String,
    pub params: Params,
    pub split_on: String,
}

impl MultiMapRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Params::new(),
            split_on: "Id".to_string(),
        }
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn split_on(mut self, split_on: impl Into<String>) -> Self {
        self.split_on = split_on.into();
        self
    }

    fn boundary_names(&self, boundaries: usize) -> Result<Vec<String>> {
        let names: Vec<String> = self
            .split_on
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        match names.len() {
            1 => Ok(vec![names[0].clone(); boundaries]),
            n if n == boundaries => Ok(names),
            n => Err(DataError::Argument(format!(
                "split_on '{}' names {} column(s) but {} boundaries are needed",
                self.split_on, n, boundaries
            ))),
        }
    }

    /// Column index where each type after the first starts. Each boundary is
    /// searched left to right after the previous one.
    fn split_points(columns: &[String], names: &[String]) -> anyhow::Result<Vec<usize>> {
        let mut points = Vec::with_capacity(names.len());
        let mut from = 1;
        for name in names {
            let found = columns
                .iter()
                .enumerate()
                .skip(from)
                .find(|(_, c)| c.eq_ignore_ascii_case(name))
                .map(|(i, _)| i)
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "split column '{}' not found after position {} in the result",
                        name,
                        from
                    )
                })?;
            points.push(found);
            from = found + 1;
        }
        Ok(points)
    }
}

/// A tuple of row types rebuilt from one flattened row.
pub trait MultiMap: Sized {
    /// Number of types in the tuple.
    const ARITY: usize;

    /// `bounds` has `ARITY + 1` entries: the start of each segment plus the
    /// row length.
    fn from_segments(row: &Row, bounds: &[usize]) -> anyhow::Result<Self>;
}

macro_rules! impl_multi_map {
    ($n:expr; $($t:ident => $i:tt),+) => {
        impl<$($t: FromRow),+> MultiMap for ($($t,)+) {
            const ARITY: usize = $n;

            fn from_segments(row: &Row, bounds: &[usize]) -> anyhow::Result<Self> {
                Ok(($($t::from_row(&row.slice(bounds[$i]..bounds[$i + 1]))?,)+))
            }
        }
    };
}

impl_multi_map!(2; A => 0, B => 1);
impl_multi_map!(3; A => 0, B => 1, C => 2);
impl_multi_map!(4; A => 0, B => 1, C => 2, D => 3);

/// Executes raw statements and procedures on one connection, enlisted in the
/// transaction it was created with.
#[derive(Clone)]
pub struct SqlExecutor {
    conn: Arc<dyn Connection>,
    tx: Option<Transaction>,
    options: CommandOptions,
}

impl SqlExecutor {
    pub fn new(conn: Arc<dyn Connection>, tx: Option<Transaction>) -> Self {
        Self {
            conn,
            tx,
            options: CommandOptions::default(),
        }
    }

    /// Timeout applied when a call supplies none.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options.timeout = timeout;
        self
    }

    /// Copy of this executor using `options` for its calls. Unset fields
    /// keep the executor defaults.
    pub fn with_options(&self, options: CommandOptions) -> Self {
        let mut executor = self.clone();
        if options.timeout.is_some() {
            executor.options.timeout = options.timeout;
        }
        if options.cancel.is_some() {
            executor.options.cancel = options.cancel;
        }
        executor
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    pub fn transaction(&self) -> Option<Transaction> {
        self.tx
    }

    pub fn options(&self) -> &CommandOptions {
        &self.options
    }

    fn command(&self, text: &str, params: Params, kind: CommandKind) -> Command {
        Command::text(text, params)
            .with_kind(kind)
            .in_transaction(self.tx)
    }

    /// Runs one driver round trip under the executor's deadline and
    /// cancellation token. Driver failures become [`DataError::Execution`],
    /// an elapsed deadline or fired token becomes [`DataError::Cancelled`].
    pub async fn execute_safe_async<R, F>(&self, sql: &str, fut: F) -> Result<R>
    where
        F: Future<Output = anyhow::Result<R>> + Send,
    {
        let deadline = self.options.timeout;
        let bounded = async move {
            match deadline {
                Some(d) => tokio::time::timeout(d, fut)
                    .await
                    .map_err(|_| CancelReason::Deadline(d)),
                None => Ok(fut.await),
            }
        };
        let outcome = match &self.options.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(CancelReason::Token),
                res = bounded => res,
            },
            None => bounded.await,
        };
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(execution_error(sql, e)),
            Err(reason) => {
                warn!(sql = %sql, %reason, "sql command cancelled");
                Err(DataError::Cancelled {
                    sql: sql.to_string(),
                    reason,
                })
            }
        }
    }

    /// Synchronous counterpart used for row mapping.
    pub fn execute_safe<R>(sql: &str, op: impl FnOnce() -> anyhow::Result<R>) -> Result<R> {
        op().map_err(|e| execution_error(sql, e))
    }

    fn trace_statement(sql: &str, params: &Params) {
        if tracing::enabled!(Level::TRACE) {
            trace!(sql = %params.render_inline(sql), "executing");
        }
    }

    async fn result_sets(
        &self,
        sql: &str,
        params: Params,
        kind: CommandKind,
    ) -> Result<Vec<Vec<Row>>> {
        Self::trace_statement(sql, &params);
        let command = self.command(sql, params, kind);
        self.execute_safe_async(sql, self.conn.query(&command)).await
    }

    /// First result set of `sql`, mapped to `T`.
    pub async fn from_sql<T: FromRow>(&self, sql: &str, params: Params) -> Result<Vec<T>> {
        let sets = self.result_sets(sql, params, CommandKind::Text).await?;
        map_rows(sql, sets.into_iter().next().unwrap_or_default())
    }

    /// First row of the first result set, if any.
    pub async fn from_sql_first<T: FromRow>(
        &self,
        sql: &str,
        params: Params,
    ) -> Result<Option<T>> {
        let sets = self.result_sets(sql, params, CommandKind::Text).await?;
        match sets.into_iter().next().and_then(|set| set.into_iter().next()) {
            Some(row) => Self::execute_safe(sql, || T::from_row(&row)).map(Some),
            None => Ok(None),
        }
    }

    /// Runs a query built with [`sql_interpolated!`](crate::sql_interpolated).
    /// Every embedded value is sent as a bound `@pN` parameter.
    pub async fn from_sql_interpolated<T: FromRow>(
        &self,
        query: &InterpolatedSql,
    ) -> Result<Vec<T>> {
        let (sql, params) = query.build()?;
        self.from_sql(&sql, params).await
    }

    /// Rebuilds a tuple of types from each row and folds it with `map`.
    pub async fn from_sql_multi_map<M, R, F>(
        &self,
        request: &MultiMapRequest,
        mut map: F,
    ) -> Result<Vec<R>>
    where
        M: MultiMap,
        F: FnMut(M) -> R,
    {
        let names = request.boundary_names(M::ARITY - 1)?;
        let sets = self
            .result_sets(&request.sql, request.params.clone(), CommandKind::Text)
            .await?;
        let rows = sets.into_iter().next().unwrap_or_default();
        let first = match rows.first() {
            Some(row) => row,
            None => return Ok(Vec::new()),
        };

        Self::execute_safe(&request.sql, || {
            let mut bounds = vec![0];
            bounds.extend(MultiMapRequest::split_points(first.columns(), &names)?);
            bounds.push(first.len());
            rows.iter()
                .map(|row| M::from_segments(row, &bounds).map(&mut map))
                .collect()
        })
    }

    /// Every result set of a batch or procedure, in order.
    pub async fn query_multiple(
        &self,
        sql: &str,
        params: Params,
        kind: CommandKind,
    ) -> Result<Vec<Vec<Row>>> {
        self.result_sets(sql, params, kind).await
    }

    /// First result set of a stored procedure, mapped to `T`.
    pub async fn query_procedure<T: FromRow>(
        &self,
        procedure: &str,
        params: Params,
    ) -> Result<Vec<T>> {
        let sets = self
            .result_sets(procedure, params, CommandKind::StoredProcedure)
            .await?;
        map_rows(procedure, sets.into_iter().next().unwrap_or_default())
    }

    /// Runs a non-query statement and returns the affected row count.
    pub async fn execute(&self, sql: &str, params: Params) -> Result<u64> {
        Self::trace_statement(sql, &params);
        let command = self.command(sql, params, CommandKind::Text);
        self.execute_safe_async(sql, self.conn.execute(&command)).await
    }

    pub async fn execute_procedure(&self, procedure: &str, params: Params) -> Result<u64> {
        Self::trace_statement(procedure, &params);
        let command = self.command(procedure, params, CommandKind::StoredProcedure);
        self.execute_safe_async(procedure, self.conn.execute(&command)).await
    }

    /// Runs a stored procedure and returns the affected row count plus the
    /// final value of every parameter, keyed by name without `@`. Declare
    /// outputs with [`Params::add_output`] or [`Params::add_input_output`].
    ///
    /// On SQL Server the count sums every statement of the procedure, the
    /// same figure [`execute_procedure`](Self::execute_procedure) reports.
    /// PostgreSQL procedures report no count, so it is the number of rows
    /// `CALL` returned.
    pub async fn execute_with_output(
        &self,
        procedure: &str,
        params: Params,
    ) -> Result<(u64, HashMap<String, SqlParam>)> {
        Self::trace_statement(procedure, &params);
        let command = self.command(procedure, params, CommandKind::StoredProcedure);
        self.execute_safe_async(procedure, self.conn.execute_with_output(&command))
            .await
    }
}

fn map_rows<T: FromRow>(sql: &str, rows: Vec<Row>) -> Result<Vec<T>> {
    SqlExecutor::execute_safe(sql, || rows.iter().map(T::from_row).collect())
}

fn execution_error(sql: &str, source: anyhow::Error) -> DataError {
    error!(sql = %sql, error = %format!("{:#}", source), "sql execution failed");
    DataError::Execution {
        sql: sql.to_string(),
        source,
    }
}
