use anyhow::anyhow;

use crate::db::CommandKind;
use crate::error::Result;
use crate::mapping::Row;
use crate::query::Params;
use crate::sql_executor::{CommandOptions, SqlExecutor};

/// Runs stored procedures and hands back their raw result sets.
#[derive(Clone)]
pub struct StoredProcedureExecutor {
    sql: SqlExecutor,
}

impl StoredProcedureExecutor {
    pub fn new(sql: SqlExecutor) -> Self {
        Self { sql }
    }

    pub fn with_options(&self, options: CommandOptions) -> Self {
        Self::new(self.sql.with_options(options))
    }

    /// Every result set the procedure produced, in order.
    pub async fn execute_data_set(&self, procedure: &str, params: Params) -> Result<Vec<Vec<Row>>> {
        self.sql
            .query_multiple(procedure, params, CommandKind::StoredProcedure)
            .await
    }

    /// The first result set; fails when the procedure returns none.
    pub async fn execute_data_table(&self, procedure: &str, params: Params) -> Result<Vec<Row>> {
        let sets = self.execute_data_set(procedure, params).await?;
        SqlExecutor::execute_safe(procedure, || {
            sets.into_iter()
                .next()
                .ok_or_else(|| anyhow!("procedure returned no result set"))
        })
    }
}
