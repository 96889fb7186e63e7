//! Textual SQL assembly on top of [`SqlExecutor`].
//!
//! Clauses are appended in call order and never reordered or checked; the
//! caller is responsible for calling them in a valid sequence
//! (`Select`, `From`, joins, `Where`, `And`/`Or`, `GroupBy`, `OrderBy`).
//! Out-of-order calls produce SQL the database will reject.

use std::fmt::Write as _;
use std::time::Duration;

use crate::db::CommandKind;
use crate::error::Result;
use crate::mapping::{FromRow, Row};
use crate::query::Params;
use crate::sql_executor::{CommandOptions, MultiMap, MultiMapRequest, SqlExecutor};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    fn to_sql(self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL JOIN",
        }
    }
}

#[derive(Clone)]
pub struct FluentQuery {
    executor: SqlExecutor,
    sql: String,
    params: Params,
    timeout: Option<Duration>,
    has_where: bool,
}

#[allow(non_snake_case)]
impl FluentQuery {
    pub fn new(executor: SqlExecutor) -> Self {
        Self {
            executor,
            sql: String::new(),
            params: Params::new(),
            timeout: None,
            has_where: false,
        }
    }

    fn clause(mut self, keyword: &str, body: &str) -> Self {
        let _ = write!(self.sql, "{} {} ", keyword, body);
        self
    }

    pub fn Select(self, columns: &[&str]) -> Self {
        let list = columns.join(", ");
        self.clause("SELECT", &list)
    }

    pub fn From(self, table: &str) -> Self {
        self.clause("FROM", table)
    }

    pub fn Join(self, join_type: JoinType, table: &str, on: &str) -> Self {
        self.clause(join_type.to_sql(), &format!("{} ON {}", table, on))
    }

    pub fn InnerJoin(self, table: &str, on: &str) -> Self {
        self.Join(JoinType::Inner, table, on)
    }

    pub fn LeftJoin(self, table: &str, on: &str) -> Self {
        self.Join(JoinType::Left, table, on)
    }

    pub fn RightJoin(self, table: &str, on: &str) -> Self {
        self.Join(JoinType::Right, table, on)
    }

    pub fn FullJoin(self, table: &str, on: &str) -> Self {
        self.Join(JoinType::Full, table, on)
    }

    pub fn Where(mut self, condition: &str) -> Self {
        self.has_where = true;
        self.clause("WHERE", condition)
    }

    /// Emits `WHERE` instead when no condition has been added yet.
    pub fn And(mut self, condition: &str) -> Self {
        let keyword = if self.has_where { "AND" } else { "WHERE" };
        self.has_where = true;
        self.clause(keyword, condition)
    }

    pub fn Or(self, condition: &str) -> Self {
        self.clause("OR", condition)
    }

    pub fn GroupBy(self, columns: &[&str]) -> Self {
        let list = columns.join(", ");
        self.clause("GROUP BY", &list)
    }

    pub fn OrderBy(self, columns: &[&str]) -> Self {
        let list = columns.join(", ");
        self.clause("ORDER BY", &list)
    }

    /// Replaces the parameter bag.
    pub fn Params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn Timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(Duration::from_secs(seconds));
        self
    }

    pub fn to_sql(&self) -> String {
        self.sql.trim_end().to_string()
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    fn executor(&self) -> SqlExecutor {
        match self.timeout {
            Some(timeout) => self.executor.with_options(CommandOptions::timeout(timeout)),
            None => self.executor.clone(),
        }
    }

    pub async fn execute_async<T: FromRow>(&self) -> Result<Vec<T>> {
        self.executor()
            .from_sql(&self.to_sql(), self.params.clone())
            .await
    }

    /// Runs the assembled query as a multi-mapping split on `split_on`.
    pub async fn execute_multi_map_async<M, R, F>(&self, split_on: &str, map: F) -> Result<Vec<R>>
    where
        M: MultiMap,
        F: FnMut(M) -> R,
    {
        let request = MultiMapRequest::new(self.to_sql())
            .params(self.params.clone())
            .split_on(split_on);
        self.executor().from_sql_multi_map(&request, map).await
    }

    pub async fn execute_multiple_async(&self) -> Result<Vec<Vec<Row>>> {
        self.executor()
            .query_multiple(&self.to_sql(), self.params.clone(), CommandKind::Text)
            .await
    }
}
