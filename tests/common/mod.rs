#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use rquery_toolkit::db::TransactionSlot;
use rquery_toolkit::{
    Command, Connection, DbKind, Entity, EntityMetadata, FieldDescriptor, FromRow, Params, Row,
    SqlParam, SqlType, Transaction,
};
use rust_decimal::Decimal;

#[derive(Default)]
struct State {
    commands: Vec<Command>,
    events: Vec<String>,
    results: VecDeque<Vec<Vec<Row>>>,
    failures: VecDeque<String>,
    fail_commit: bool,
    fail_rollback: bool,
    affected: u64,
    outputs: HashMap<String, SqlParam>,
    delay: Option<Duration>,
}

/// In-memory connection that records every command and replays scripted
/// result sets. Transaction enlistment and the no-reconnect-after-close rule
/// are enforced like the real drivers.
#[derive(Default)]
pub struct FakeConnection {
    state: Mutex<State>,
    tx: TransactionSlot,
    open: AtomicBool,
    closed: AtomicBool,
}

impl FakeConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Result sets returned by the next query.
    pub fn push_result_sets(&self, sets: Vec<Vec<Row>>) {
        self.state.lock().unwrap().results.push_back(sets);
    }

    pub fn push_rows(&self, rows: Vec<Row>) {
        self.push_result_sets(vec![rows]);
    }

    /// The next query or execute fails with `message`.
    pub fn fail_next(&self, message: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push_back(message.to_string());
    }

    pub fn fail_commit(&self) {
        self.state.lock().unwrap().fail_commit = true;
    }

    pub fn fail_rollback(&self) {
        self.state.lock().unwrap().fail_rollback = true;
    }

    pub fn set_affected(&self, rows: u64) {
        self.state.lock().unwrap().affected = rows;
    }

    pub fn set_outputs(&self, outputs: HashMap<String, SqlParam>) {
        self.state.lock().unwrap().outputs = outputs;
    }

    /// Every command sleeps this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    pub fn commands(&self) -> Vec<Command> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn sql_log(&self) -> Vec<String> {
        self.commands().into_iter().map(|c| c.text).collect()
    }

    pub fn last_command(&self) -> Command {
        self.commands().pop().expect("no command was issued")
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    fn event(&self, name: &str) {
        self.state.lock().unwrap().events.push(name.to_string());
    }

    async fn accept(&self, command: &Command) -> anyhow::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("connection closed");
        }
        self.tx.check_enlisted(command.transaction.as_ref())?;
        let (delay, failure) = {
            let mut state = self.state.lock().unwrap();
            state.commands.push(command.clone());
            (state.delay, state.failures.pop_front())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = failure {
            bail!("{}", message);
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for FakeConnection {
    fn kind(&self) -> DbKind {
        DbKind::Mssql
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn open(&self) -> anyhow::Result<()> {
        self.open.store(true, Ordering::SeqCst);
        self.event("open");
        Ok(())
    }

    async fn begin(&self) -> anyhow::Result<Transaction> {
        let tx = self.tx.begin()?;
        self.event("begin");
        Ok(tx)
    }

    async fn commit(&self, tx: &Transaction) -> anyhow::Result<()> {
        self.tx.check_enlisted(Some(tx))?;
        if self.state.lock().unwrap().fail_commit {
            bail!("commit refused");
        }
        self.tx.complete(tx)?;
        self.event("commit");
        Ok(())
    }

    async fn rollback(&self, tx: &Transaction) -> anyhow::Result<()> {
        self.tx.complete(tx)?;
        if self.state.lock().unwrap().fail_rollback {
            bail!("rollback refused");
        }
        self.event("rollback");
        Ok(())
    }

    async fn query(&self, command: &Command) -> anyhow::Result<Vec<Vec<Row>>> {
        self.accept(command).await?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .results
            .pop_front()
            .unwrap_or_default())
    }

    async fn execute(&self, command: &Command) -> anyhow::Result<u64> {
        self.accept(command).await?;
        Ok(self.state.lock().unwrap().affected)
    }

    async fn execute_with_output(
        &self,
        command: &Command,
    ) -> anyhow::Result<(u64, HashMap<String, SqlParam>)> {
        self.accept(command).await?;
        let state = self.state.lock().unwrap();
        let mut values = HashMap::new();
        for p in &command.params {
            let value = state
                .outputs
                .get(&p.name)
                .cloned()
                .unwrap_or_else(|| p.value.clone());
            values.insert(p.name.clone(), value);
        }
        Ok((state.affected, values))
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.tx.clear();
        self.open.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.event("close");
        Ok(())
    }
}

/// `Product { Id: int key identity, Name: string required, Price: decimal }`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Product {
    pub id: i32,
    pub name: String,
    pub price: Decimal,
}

impl FromRow for Product {
    fn from_row(row: &Row) -> anyhow::Result<Self> {
        Ok(Self {
            id: row.get_or_default("Id")?,
            name: row.get_or_default("Name")?,
            price: row.get_or_default("Price")?,
        })
    }
}

impl Entity for Product {
    fn describe() -> EntityMetadata {
        EntityMetadata::builder("Product")
            .field(FieldDescriptor::new("Id", SqlType::Int).key().identity())
            .field(FieldDescriptor::new("Name", SqlType::Text).required())
            .field(FieldDescriptor::new("Price", SqlType::Decimal))
            .build()
    }

    fn to_params(&self) -> Params {
        Params::new()
            .add("Id", self.id)
            .add("Name", self.name.clone())
            .add("Price", self.price)
    }
}

/// `OrderLine { OrderId: int key, LineNo: int key, Qty: int }`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderLine {
    pub order_id: i32,
    pub line_no: i32,
    pub qty: i32,
}

impl FromRow for OrderLine {
    fn from_row(row: &Row) -> anyhow::Result<Self> {
        Ok(Self {
            order_id: row.get_or_default("OrderId")?,
            line_no: row.get_or_default("LineNo")?,
            qty: row.get_or_default("Qty")?,
        })
    }
}

impl Entity for OrderLine {
    fn describe() -> EntityMetadata {
        EntityMetadata::builder("OrderLine")
            .field(FieldDescriptor::new("OrderId", SqlType::Int).key())
            .field(FieldDescriptor::new("LineNo", SqlType::Int).key())
            .field(FieldDescriptor::new("Qty", SqlType::Int))
            .build()
    }

    fn to_params(&self) -> Params {
        Params::new()
            .add("OrderId", self.order_id)
            .add("LineNo", self.line_no)
            .add("Qty", self.qty)
    }
}

/// Keyless view used to exercise state errors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditEntry {
    pub message: String,
}

impl FromRow for AuditEntry {
    fn from_row(row: &Row) -> anyhow::Result<Self> {
        Ok(Self {
            message: row.get_or_default("Message")?,
        })
    }
}

impl Entity for AuditEntry {
    fn describe() -> EntityMetadata {
        EntityMetadata::builder("AuditLog")
            .schema("ops")
            .field(FieldDescriptor::new("Message", SqlType::Text))
            .build()
    }

    fn to_params(&self) -> Params {
        Params::new().add("Message", self.message.clone())
    }
}

pub fn product_row(id: i32, name: &str, price: Decimal) -> Row {
    Row::from_pairs([
        ("Id", SqlParam::I32(id)),
        ("Name", SqlParam::Text(name.to_string())),
        ("Price", SqlParam::Decimal(price)),
    ])
}
