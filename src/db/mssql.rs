use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use tiberius::{ColumnData, FromSql, QueryItem};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use super::{Command, CommandKind, Connection, DbKind, Transaction, TransactionSlot};
use crate::mapping::Row;
use crate::query::{bind_named, ParamDirection, PlaceholderStyle, SqlParam};

type Client = tiberius::Client<Compat<TcpStream>>;

const OUTPUTS_TABLE: &str = "#__rquery_outputs";

/// SQL Server session over tiberius. Connects on first use; once closed it
/// never reconnects.
pub struct MssqlConnection {
    config: tiberius::Config,
    client: Mutex<Option<Client>>,
    open: AtomicBool,
    closed: AtomicBool,
    tx: TransactionSlot,
}

impl MssqlConnection {
    pub fn new(config: tiberius::Config) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            tx: TransactionSlot::default(),
        }
    }

    pub fn from_connection_string(connection_string: &str) -> Result<Self> {
        let config = tiberius::Config::from_ado_string(connection_string)?;
        Ok(Self::new(config))
    }

    pub fn from_parts(host: &str, port: u16, db: &str, user: &str, pass: &str) -> Self {
        let mut config = tiberius::Config::new();
        config.host(host);
        config.port(port);
        config.database(db);
        config.authentication(tiberius::AuthMethod::sql_server(user, pass));
        config.trust_cert();
        Self::new(config)
    }

    async fn connect(config: &tiberius::Config) -> Result<Client> {
        let tcp = TcpStream::connect(config.get_addr()).await?;
        tcp.set_nodelay(true)?;
        let client = tiberius::Client::connect(config.clone(), tcp.compat_write()).await?;
        Ok(client)
    }

    async fn lock_client(&self) -> Result<MutexGuard<'_, Option<Client>>> {
        let mut guard = self.client.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            bail!("connection closed");
        }
        if guard.is_none() {
            *guard = Some(Self::connect(&self.config).await?);
            self.open.store(true, Ordering::SeqCst);
            debug!(addr = %self.config.get_addr(), "sql server connection opened");
        }
        Ok(guard)
    }

    async fn run_query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Vec<Row>>> {
        let mut guard = self.lock_client().await?;
        let client = guard.as_mut().context("connection closed")?;
        query_on(client, sql, params).await
    }

    async fn run_execute(&self, sql: &str, params: &[SqlParam]) -> Result<u64> {
        let mut guard = self.lock_client().await?;
        let client = guard.as_mut().context("connection closed")?;
        let counts = execute_on(client, sql, params).await?;
        Ok(counts.iter().sum())
    }
}

async fn query_on(client: &mut Client, sql: &str, params: &[SqlParam]) -> Result<Vec<Vec<Row>>> {
    let boxed = to_mssql_params(params);
    let refs: Vec<&dyn tiberius::ToSql> =
        boxed.iter().map(|b| &**b as &dyn tiberius::ToSql).collect();
    let mut stream = client.query(sql, &refs[..]).await?;

    let mut sets: Vec<Vec<Row>> = Vec::new();
    let mut columns: Arc<[String]> = Arc::from(Vec::new());
    while let Some(item) = stream.try_next().await? {
        match item {
            QueryItem::Metadata(meta) => {
                columns = meta
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect::<Vec<_>>()
                    .into();
                sets.push(Vec::new());
            }
            QueryItem::Row(row) => {
                let values = row
                    .into_iter()
                    .map(|data| convert_value(&data))
                    .collect::<Result<Vec<_>>>()?;
                if let Some(set) = sets.last_mut() {
                    set.push(Row::new(columns.clone(), values));
                }
            }
        }
    }
    Ok(sets)
}

/// Affected row count of every statement, in order.
async fn execute_on(client: &mut Client, sql: &str, params: &[SqlParam]) -> Result<Vec<u64>> {
    let boxed = to_mssql_params(params);
    let refs: Vec<&dyn tiberius::ToSql> =
        boxed.iter().map(|b| &**b as &dyn tiberius::ToSql).collect();
    let res = client.execute(sql, &refs[..]).await?;
    Ok(res.rows_affected().to_vec())
}

/// Opens a SQL Server connection immediately.
pub async fn connect_mssql(
    host: &str,
    port: u16,
    db: &str,
    user: &str,
    pass: &str,
) -> Result<Arc<MssqlConnection>> {
    let conn = MssqlConnection::from_parts(host, port, db, user, pass);
    conn.open().await?;
    Ok(Arc::new(conn))
}

/// `EXEC name @a = @P1, ...` with positional values.
fn render_procedure(command: &Command) -> (String, Vec<SqlParam>) {
    let mut values = Vec::new();
    let args: Vec<String> = command
        .params
        .iter()
        .map(|p| {
            values.push(p.value.clone());
            format!("@{} = {}", p.name, PlaceholderStyle::AtP.placeholder(values.len()))
        })
        .collect();
    if args.is_empty() {
        (format!("EXEC {}", command.text), values)
    } else {
        (format!("EXEC {} {}", command.text, args.join(", ")), values)
    }
}

fn render(command: &Command) -> (String, Vec<SqlParam>) {
    match command.kind {
        CommandKind::Text => bind_named(&command.text, &command.params, PlaceholderStyle::AtP),
        CommandKind::StoredProcedure => render_procedure(command),
    }
}

/// Declares a local variable per output parameter, passes it with `OUTPUT`
/// and copies the final values into [`OUTPUTS_TABLE`] as the last
/// statement. Without outputs this is [`render_procedure`].
fn render_with_output(command: &Command) -> (String, Vec<SqlParam>) {
    if !command.params.has_outputs() {
        return render_procedure(command);
    }
    let mut values = Vec::new();
    let mut declares = Vec::new();
    let mut args = Vec::new();
    let mut selects = Vec::new();

    for p in &command.params {
        values.push(p.value.clone());
        let placeholder = PlaceholderStyle::AtP.placeholder(values.len());
        match p.direction {
            ParamDirection::Input => args.push(format!("@{} = {}", p.name, placeholder)),
            ParamDirection::Output(ty) | ParamDirection::InputOutput(ty) => {
                let var = format!("@__out_{}", p.name);
                let init = if matches!(p.direction, ParamDirection::InputOutput(_)) {
                    placeholder
                } else {
                    "NULL".to_string()
                };
                declares.push(format!("DECLARE {} {} = {};", var, ty.sql_server_name(), init));
                args.push(format!("@{} = {} OUTPUT", p.name, var));
                selects.push(format!("{} AS [{}]", var, p.name));
            }
        }
    }

    let sql = format!(
        "IF OBJECT_ID('tempdb..{table}') IS NOT NULL DROP TABLE {table}; {} EXEC {} {}; SELECT {} INTO {table};",
        declares.join(" "),
        command.text,
        args.join(", "),
        selects.join(", "),
        table = OUTPUTS_TABLE,
    );
    (sql, values)
}

fn fetch_outputs() -> String {
    format!("SELECT * FROM {table}; DROP TABLE {table};", table = OUTPUTS_TABLE)
}

#[async_trait]
impl Connection for MssqlConnection {
    fn kind(&self) -> DbKind {
        DbKind::Mssql
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn open(&self) -> Result<()> {
        self.lock_client().await.map(|_| ())
    }

    async fn begin(&self) -> Result<Transaction> {
        let tx = self.tx.begin()?;
        if let Err(e) = self.run_execute("BEGIN TRANSACTION", &[]).await {
            self.tx.clear();
            return Err(e);
        }
        Ok(tx)
    }

    async fn commit(&self, tx: &Transaction) -> Result<()> {
        self.tx.check_enlisted(Some(tx))?;
        self.run_execute("COMMIT TRANSACTION", &[]).await?;
        self.tx.complete(tx)
    }

    async fn rollback(&self, tx: &Transaction) -> Result<()> {
        self.tx.check_enlisted(Some(tx))?;
        let res = self.run_execute("ROLLBACK TRANSACTION", &[]).await;
        self.tx.complete(tx)?;
        res.map(|_| ())
    }

    async fn query(&self, command: &Command) -> Result<Vec<Vec<Row>>> {
        self.tx.check_enlisted(command.transaction.as_ref())?;
        let (sql, params) = render(command);
        self.run_query(&sql, &params).await
    }

    async fn execute(&self, command: &Command) -> Result<u64> {
        self.tx.check_enlisted(command.transaction.as_ref())?;
        let (sql, params) = render(command);
        self.run_execute(&sql, &params).await
    }

    /// The count sums every statement of the procedure, as
    /// [`execute`](Connection::execute) does. Output values are read back in
    /// a second round trip on the same session.
    async fn execute_with_output(
        &self,
        command: &Command,
    ) -> Result<(u64, HashMap<String, SqlParam>)> {
        self.tx.check_enlisted(command.transaction.as_ref())?;
        let (sql, params) = render_with_output(command);
        let mut guard = self.lock_client().await?;
        let client = guard.as_mut().context("connection closed")?;
        let mut counts = execute_on(client, &sql, &params).await?;

        let returned = if command.params.has_outputs() {
            // last count is the copy into the outputs table
            counts.pop();
            let sets = query_on(client, &fetch_outputs(), &[]).await?;
            let row = sets
                .into_iter()
                .next()
                .and_then(|set| set.into_iter().next())
                .context("output parameters were not returned")?;
            Some(row)
        } else {
            None
        };

        let mut values = HashMap::new();
        for p in &command.params {
            let value = match (&returned, p.direction.is_output()) {
                (Some(row), true) => row.get_raw(&p.name).cloned().unwrap_or(SqlParam::Null),
                _ => p.value.clone(),
            };
            values.insert(p.name.clone(), value);
        }
        Ok((counts.iter().sum(), values))
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.client.lock().await;
        self.tx.clear();
        self.open.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        if let Some(client) = guard.take() {
            client.close().await?;
            debug!("sql server connection closed");
        }
        Ok(())
    }
}

fn to_mssql_params(params: &[SqlParam]) -> Vec<Box<dyn tiberius::ToSql + Send + Sync>> {
    params
        .iter()
        .map(|p| -> Box<dyn tiberius::ToSql + Send + Sync> {
            match p {
                SqlParam::I32(v) => Box::new(*v),
                SqlParam::I64(v) => Box::new(*v),
                SqlParam::F64(v) => Box::new(*v),
                SqlParam::Bool(v) => Box::new(*v),
                SqlParam::Text(v) => Box::new(v.clone()),
                SqlParam::Uuid(v) => Box::new(*v),
                SqlParam::Decimal(v) => Box::new(*v),
                SqlParam::DateTime(v) => Box::new(*v),
                SqlParam::Bytes(v) => Box::new(v.clone()),
                SqlParam::Null => Box::new(Option::<i32>::None),
            }
        })
        .collect()
}

fn convert_value(data: &ColumnData<'static>) -> Result<SqlParam> {
    let value = match data {
        ColumnData::U8(v) => v.map(|v| SqlParam::I32(i32::from(v))),
        ColumnData::I16(v) => v.map(|v| SqlParam::I32(i32::from(v))),
        ColumnData::I32(v) => v.map(SqlParam::I32),
        ColumnData::I64(v) => v.map(SqlParam::I64),
        ColumnData::F32(v) => v.map(|v| SqlParam::F64(f64::from(v))),
        ColumnData::F64(v) => v.map(SqlParam::F64),
        ColumnData::Bit(v) => v.map(SqlParam::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| SqlParam::Text(s.to_string())),
        ColumnData::Guid(v) => v.map(SqlParam::Uuid),
        ColumnData::Binary(v) => v.as_ref().map(|b| SqlParam::Bytes(b.to_vec())),
        ColumnData::Xml(v) => v
            .as_ref()
            .map(|x| SqlParam::Text(x.clone().into_owned().into_string())),
        ColumnData::Numeric(_) => rust_decimal::Decimal::from_sql(data)?.map(SqlParam::Decimal),
        ColumnData::Date(_) => chrono::NaiveDate::from_sql(data)?
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(SqlParam::DateTime),
        ColumnData::Time(_) => {
            chrono::NaiveTime::from_sql(data)?.map(|t| SqlParam::Text(t.to_string()))
        }
        ColumnData::DateTimeOffset(_) => chrono::DateTime::<chrono::Utc>::from_sql(data)?
            .map(|d| SqlParam::DateTime(d.naive_utc())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            chrono::NaiveDateTime::from_sql(data)?.map(SqlParam::DateTime)
        }
        #[allow(unreachable_patterns)]
        _ => None,
    };
    Ok(value.unwrap_or(SqlParam::Null))
}
