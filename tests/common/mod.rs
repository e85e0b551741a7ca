//! In-memory pool recording every call it receives
//!
//! Understands just enough SQL for the tests: `INSERT INTO <t>` stores the arguments as
//! a row, `SELECT ... FROM <t>` returns the rows of `<t>`, and any statement starting
//! with `FAIL` returns a database error. Writes made inside a transaction are only
//! visible to that transaction until it commits.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pgtx::{
    CommandTag, Context, Error, Identifier, Pool, Queryer, Result, Row, Transactor, TxHandle,
    TxOptions, Value,
};

#[ctor::ctor]
fn init() {
    colog::init();
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Begin(TxOptions),
    Commit,
    Rollback,
    Exec { in_tx: bool, sql: String },
    Query { in_tx: bool, sql: String },
    Copy { in_tx: bool, rows: usize },
    Ping,
    Close,
}

type Tables = HashMap<String, Vec<Vec<Value>>>;

#[derive(Default)]
struct Shared {
    committed: Mutex<Tables>,
    events: Mutex<Vec<Event>>,
    next_tx: AtomicUsize,
    fail_begin: AtomicBool,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
}

impl Shared {
    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Clone, Default)]
pub struct MemoryPool {
    shared: Arc<Shared>,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.shared.events.lock().unwrap().clone()
    }

    pub fn count(&self, wanted: fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| wanted(e)).count()
    }

    pub fn begins(&self) -> usize {
        self.count(|e| matches!(e, Event::Begin(_)))
    }

    pub fn commits(&self) -> usize {
        self.count(|e| matches!(e, Event::Commit))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|e| matches!(e, Event::Rollback))
    }

    /// Committed rows of `table`
    pub fn rows(&self, table: &str) -> Vec<Vec<Value>> {
        self.shared
            .committed
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_begin(&self) {
        self.shared.fail_begin.store(true, Ordering::SeqCst);
    }

    pub fn fail_commit(&self) {
        self.shared.fail_commit.store(true, Ordering::SeqCst);
    }

    pub fn fail_rollback(&self) {
        self.shared.fail_rollback.store(true, Ordering::SeqCst);
    }
}

enum Statement {
    Insert(String),
    Select(String),
    Fail,
    Other,
}

fn parse(sql: &str) -> Statement {
    let words: Vec<&str> = sql.split_whitespace().collect();
    let after = |kw: &str| {
        words
            .iter()
            .position(|w| w.eq_ignore_ascii_case(kw))
            .and_then(|i| words.get(i + 1))
            .map(|t| t.trim_matches('"').to_string())
    };
    match words.first().map(|w| w.to_ascii_uppercase()) {
        Some(w) if w == "FAIL" => Statement::Fail,
        Some(w) if w == "INSERT" => after("INTO").map_or(Statement::Other, Statement::Insert),
        Some(w) if w == "SELECT" => after("FROM").map_or(Statement::Other, Statement::Select),
        _ => Statement::Other,
    }
}

fn db_error(msg: &str) -> Error {
    Error::Database(sqlx::Error::Protocol(msg.to_string()))
}

fn to_rows(rows: Vec<Vec<Value>>) -> Vec<Row> {
    let width = rows.first().map_or(0, Vec::len);
    let columns: Arc<[String]> = (0..width).map(|i| format!("col{}", i)).collect();
    rows.into_iter()
        .map(|values| Row::new(columns.clone(), values))
        .collect()
}

#[async_trait]
impl Queryer for MemoryPool {
    async fn exec(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<CommandTag> {
        ctx.run(async {
            self.shared.record(Event::Exec {
                in_tx: false,
                sql: sql.to_string(),
            });
            match parse(sql) {
                Statement::Fail => Err(db_error("statement failed")),
                Statement::Insert(table) => {
                    let mut committed = self.shared.committed.lock().unwrap();
                    committed.entry(table).or_default().push(args.to_vec());
                    Ok(CommandTag::new(1))
                }
                _ => Ok(CommandTag::default()),
            }
        })
        .await
    }

    async fn query(&self, ctx: &Context, sql: &str, _args: &[Value]) -> Result<Vec<Row>> {
        ctx.run(async {
            self.shared.record(Event::Query {
                in_tx: false,
                sql: sql.to_string(),
            });
            match parse(sql) {
                Statement::Fail => Err(db_error("statement failed")),
                Statement::Select(table) => Ok(to_rows(self.rows(&table))),
                _ => Ok(Vec::new()),
            }
        })
        .await
    }

    async fn query_row(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<Row> {
        self.query(ctx, sql, args)
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NoRows)
    }

    async fn copy_from(
        &self,
        ctx: &Context,
        table: &Identifier,
        _columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<u64> {
        ctx.run(async {
            self.shared.record(Event::Copy {
                in_tx: false,
                rows: rows.len(),
            });
            let name = table.parts().last().cloned().unwrap_or_default();
            let mut committed = self.shared.committed.lock().unwrap();
            committed.entry(name).or_default().extend(rows.iter().cloned());
            Ok(rows.len() as u64)
        })
        .await
    }
}

#[async_trait]
impl Transactor for MemoryPool {
    async fn begin_tx(&self, ctx: &Context, opts: TxOptions) -> Result<Arc<dyn TxHandle>> {
        ctx.run(async {
            if self.shared.fail_begin.load(Ordering::SeqCst) {
                return Err(db_error("too many connections"));
            }
            self.shared.record(Event::Begin(opts));
            let tx: Arc<dyn TxHandle> = Arc::new(MemoryTx {
                id: self.shared.next_tx.fetch_add(1, Ordering::SeqCst),
                shared: self.shared.clone(),
                writes: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            });
            Ok(tx)
        })
        .await
    }
}

#[async_trait]
impl Pool for MemoryPool {
    async fn ping(&self, ctx: &Context) -> Result<()> {
        ctx.run(async {
            self.shared.record(Event::Ping);
            Ok(())
        })
        .await
    }

    async fn close(&self) {
        self.shared.record(Event::Close);
    }
}

pub struct MemoryTx {
    pub id: usize,
    shared: Arc<Shared>,
    writes: Mutex<Vec<(String, Vec<Value>)>>,
    closed: AtomicBool,
}

impl MemoryTx {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::TxClosed);
        }
        Ok(())
    }

    fn visible_rows(&self, table: &str) -> Vec<Vec<Value>> {
        let mut rows = self
            .shared
            .committed
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default();
        rows.extend(
            self.writes
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, _)| t == table)
                .map(|(_, row)| row.clone()),
        );
        rows
    }
}

#[async_trait]
impl Queryer for MemoryTx {
    async fn exec(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<CommandTag> {
        ctx.run(async {
            self.ensure_open()?;
            self.shared.record(Event::Exec {
                in_tx: true,
                sql: sql.to_string(),
            });
            match parse(sql) {
                Statement::Fail => Err(db_error("statement failed")),
                Statement::Insert(table) => {
                    self.writes.lock().unwrap().push((table, args.to_vec()));
                    Ok(CommandTag::new(1))
                }
                _ => Ok(CommandTag::default()),
            }
        })
        .await
    }

    async fn query(&self, ctx: &Context, sql: &str, _args: &[Value]) -> Result<Vec<Row>> {
        ctx.run(async {
            self.ensure_open()?;
            self.shared.record(Event::Query {
                in_tx: true,
                sql: sql.to_string(),
            });
            match parse(sql) {
                Statement::Fail => Err(db_error("statement failed")),
                Statement::Select(table) => Ok(to_rows(self.visible_rows(&table))),
                _ => Ok(Vec::new()),
            }
        })
        .await
    }

    async fn query_row(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<Row> {
        self.query(ctx, sql, args)
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NoRows)
    }

    async fn copy_from(
        &self,
        ctx: &Context,
        table: &Identifier,
        _columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<u64> {
        ctx.run(async {
            self.ensure_open()?;
            self.shared.record(Event::Copy {
                in_tx: true,
                rows: rows.len(),
            });
            let name = table.parts().last().cloned().unwrap_or_default();
            let mut writes = self.writes.lock().unwrap();
            writes.extend(rows.iter().map(|row| (name.clone(), row.clone())));
            Ok(rows.len() as u64)
        })
        .await
    }
}

#[async_trait]
impl TxHandle for MemoryTx {
    async fn commit(&self, ctx: &Context) -> Result<()> {
        self.ensure_open()?;
        self.closed.store(true, Ordering::SeqCst);
        ctx.run(async {
            self.shared.record(Event::Commit);
            if self.shared.fail_commit.load(Ordering::SeqCst) {
                return Err(db_error("could not serialize access"));
            }
            let writes = std::mem::take(&mut *self.writes.lock().unwrap());
            let mut committed = self.shared.committed.lock().unwrap();
            for (table, row) in writes {
                committed.entry(table).or_default().push(row);
            }
            Ok(())
        })
        .await
    }

    async fn rollback(&self, ctx: &Context) -> Result<()> {
        self.ensure_open()?;
        self.closed.store(true, Ordering::SeqCst);
        self.writes.lock().unwrap().clear();
        ctx.run(async {
            self.shared.record(Event::Rollback);
            if self.shared.fail_rollback.load(Ordering::SeqCst) {
                return Err(db_error("connection reset by peer"));
            }
            Ok(())
        })
        .await
    }
}
