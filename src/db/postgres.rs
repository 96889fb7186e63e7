use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio::sync::Mutex;
use tokio_postgres::config::SslMode;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::NoTls;
use tracing::{debug, error};

use super::{Command, CommandKind, Connection, DbKind, Transaction, TransactionSlot};
use crate::mapping::Row;
use crate::query::{bind_named, split_statements, ParamDirection, PlaceholderStyle, SqlParam};

/// PostgreSQL session over tokio-postgres. Connects on first use, preferring
/// TLS and falling back to plain TCP when the server does not offer it.
/// Once closed it never reconnects.
pub struct PostgresConnection {
    config: tokio_postgres::Config,
    client: Mutex<Option<Arc<tokio_postgres::Client>>>,
    open: AtomicBool,
    closed: AtomicBool,
    tx: TransactionSlot,
}

impl PostgresConnection {
    pub fn new(config: tokio_postgres::Config) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            tx: TransactionSlot::default(),
        }
    }

    pub fn from_connection_string(connection_string: &str) -> Result<Self> {
        let config = connection_string.parse::<tokio_postgres::Config>()?;
        Ok(Self::new(config))
    }

    pub fn from_parts(host: &str, port: u16, db: &str, user: &str, pass: &str) -> Self {
        let mut config = tokio_postgres::Config::new();
        config
            .host(host)
            .port(port)
            .dbname(db)
            .user(user)
            .password(pass);
        Self::new(config)
    }

    async fn connect(config: &tokio_postgres::Config) -> Result<tokio_postgres::Client> {
        let builder = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?;
        let connector = MakeTlsConnector::new(builder);
        let mut tls_config = config.clone();
        tls_config.ssl_mode(SslMode::Require);

        match tls_config.connect(connector).await {
            Ok((client, connection)) => {
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!(error = %e, "postgres connection error");
                    }
                });
                Ok(client)
            }
            Err(e) if e.to_string().contains("server does not support TLS") => {
                let mut plain_config = config.clone();
                plain_config.ssl_mode(SslMode::Disable);
                let (client, connection) = plain_config.connect(NoTls).await?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!(error = %e, "postgres connection error");
                    }
                });
                Ok(client)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn client(&self) -> Result<Arc<tokio_postgres::Client>> {
        let mut guard = self.client.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            bail!("connection closed");
        }
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let client = Arc::new(Self::connect(&self.config).await?);
        *guard = Some(client.clone());
        self.open.store(true, Ordering::SeqCst);
        debug!("postgres connection opened");
        Ok(client)
    }

    /// One result set per row-returning statement of the batch.
    async fn run_batch(&self, command: &Command) -> Result<(u64, Vec<Vec<Row>>)> {
        let client = self.client().await?;
        let mut affected = 0;
        let mut sets = Vec::new();
        for statement in statements(command) {
            let (sql, values) = bind_named(&statement, &command.params, PlaceholderStyle::Dollar);
            let boxed = to_pg_params(&values);
            let refs: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|b| &**b as _).collect();
            let prepared = client.prepare(&sql).await?;
            if prepared.columns().is_empty() {
                affected += client.execute(&prepared, &refs[..]).await?;
            } else {
                let rows = client.query(&prepared, &refs[..]).await?;
                affected += rows.len() as u64;
                sets.push(convert_result_set(&rows)?);
            }
        }
        Ok((affected, sets))
    }
}

/// Opens a PostgreSQL connection immediately.
pub async fn connect_postgres(
    host: &str,
    port: u16,
    db: &str,
    user: &str,
    pass: &str,
) -> Result<Arc<PostgresConnection>> {
    let conn = PostgresConnection::from_parts(host, port, db, user, pass);
    conn.open().await?;
    Ok(Arc::new(conn))
}

fn statements(command: &Command) -> Vec<String> {
    match command.kind {
        CommandKind::Text => split_statements(&command.text, PlaceholderStyle::Dollar),
        CommandKind::StoredProcedure => {
            let args: Vec<String> = command.params.iter().map(|p| format!("@{}", p.name)).collect();
            vec![format!("SELECT * FROM {}({})", command.text, args.join(", "))]
        }
    }
}

/// `CALL name(...)` passing a typed NULL for pure output parameters; INOUT
/// and OUT values come back as the single result row.
fn call_statement(command: &Command) -> String {
    let args: Vec<String> = command
        .params
        .iter()
        .map(|p| match p.direction {
            ParamDirection::Output(ty) => format!("NULL::{}", ty.postgres_name()),
            _ => format!("@{}", p.name),
        })
        .collect();
    format!("CALL {}({})", command.text, args.join(", "))
}

#[async_trait]
impl Connection for PostgresConnection {
    fn kind(&self) -> DbKind {
        DbKind::Postgres
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn open(&self) -> Result<()> {
        self.client().await.map(|_| ())
    }

    async fn begin(&self) -> Result<Transaction> {
        let tx = self.tx.begin()?;
        let res = match self.client().await {
            Ok(client) => client.batch_execute("BEGIN").await.map_err(Into::into),
            Err(e) => Err(e),
        };
        if let Err(e) = res {
            self.tx.clear();
            return Err(e);
        }
        Ok(tx)
    }

    async fn commit(&self, tx: &Transaction) -> Result<()> {
        self.tx.check_enlisted(Some(tx))?;
        self.client().await?.batch_execute("COMMIT").await?;
        self.tx.complete(tx)
    }

    async fn rollback(&self, tx: &Transaction) -> Result<()> {
        self.tx.check_enlisted(Some(tx))?;
        let res = match self.client().await {
            Ok(client) => client.batch_execute("ROLLBACK").await.map_err(Into::into),
            Err(e) => Err(e),
        };
        self.tx.complete(tx)?;
        res
    }

    async fn query(&self, command: &Command) -> Result<Vec<Vec<Row>>> {
        self.tx.check_enlisted(command.transaction.as_ref())?;
        let (_, sets) = self.run_batch(command).await?;
        Ok(sets)
    }

    async fn execute(&self, command: &Command) -> Result<u64> {
        self.tx.check_enlisted(command.transaction.as_ref())?;
        if command.kind == CommandKind::StoredProcedure {
            let call = Command::text(call_statement(command), command.params.clone());
            let (affected, _) = self.run_batch(&call).await?;
            return Ok(affected);
        }
        let (affected, _) = self.run_batch(command).await?;
        Ok(affected)
    }

    /// PostgreSQL procedures report no affected row count; the count is the
    /// number of rows `CALL` returned.
    async fn execute_with_output(
        &self,
        command: &Command,
    ) -> Result<(u64, HashMap<String, SqlParam>)> {
        self.tx.check_enlisted(command.transaction.as_ref())?;
        let call = Command::text(call_statement(command), command.params.clone());
        let (affected, sets) = self.run_batch(&call).await?;
        let returned = sets.first().and_then(|set| set.first());

        let mut values = HashMap::new();
        for p in &command.params {
            let value = match (p.direction.is_output(), returned) {
                (true, Some(row)) => row.get_raw(&p.name).cloned().unwrap_or(SqlParam::Null),
                (true, None) => SqlParam::Null,
                (false, _) => p.value.clone(),
            };
            values.insert(p.name.clone(), value);
        }
        Ok((affected, values))
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.client.lock().await;
        self.tx.clear();
        self.open.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        if guard.take().is_some() {
            debug!("postgres connection closed");
        }
        Ok(())
    }
}

/// NULL that binds to a parameter of any type.
#[derive(Debug)]
struct PgNull;

impl ToSql for PgNull {
    fn to_sql(
        &self,
        _ty: &Type,
        _out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn StdError + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn to_pg_params(params: &[SqlParam]) -> Vec<Box<dyn ToSql + Send + Sync>> {
    params
        .iter()
        .map(|p| -> Box<dyn ToSql + Send + Sync> {
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
                SqlParam::Null => Box::new(PgNull),
            }
        })
        .collect()
}

fn convert_result_set(rows: &[tokio_postgres::Row]) -> Result<Vec<Row>> {
    let columns: Arc<[String]> = match rows.first() {
        Some(first) => first
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect::<Vec<_>>()
            .into(),
        None => return Ok(Vec::new()),
    };
    rows.iter()
        .map(|row| {
            let values = (0..row.len())
                .map(|i| convert_value(row, i))
                .collect::<Result<Vec<_>>>()?;
            Ok(Row::new(columns.clone(), values))
        })
        .collect()
}

fn convert_value(row: &tokio_postgres::Row, i: usize) -> Result<SqlParam> {
    let ty = row.columns()[i].type_();
    let name = row.columns()[i].name();
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(i)?.map(SqlParam::Bool)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(i)?.map(|v| SqlParam::I32(i32::from(v)))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(i)?.map(SqlParam::I32)
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(i)?.map(SqlParam::I64)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(i)?.map(|v| SqlParam::F64(f64::from(v)))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(i)?.map(SqlParam::F64)
    } else if *ty == Type::NUMERIC {
        row.try_get::<_, Option<rust_decimal::Decimal>>(i)?.map(SqlParam::Decimal)
    } else if *ty == Type::UUID {
        row.try_get::<_, Option<uuid::Uuid>>(i)?.map(SqlParam::Uuid)
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<chrono::NaiveDateTime>>(i)?.map(SqlParam::DateTime)
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(i)?
            .map(|d| SqlParam::DateTime(d.naive_utc()))
    } else if *ty == Type::DATE {
        row.try_get::<_, Option<chrono::NaiveDate>>(i)?
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(SqlParam::DateTime)
    } else if *ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(i)?.map(SqlParam::Bytes)
    } else {
        row.try_get::<_, Option<String>>(i)
            .with_context(|| format!("unsupported postgres type {} for column '{}'", ty, name))?
            .map(SqlParam::Text)
    };
    Ok(value.unwrap_or(SqlParam::Null))
}
