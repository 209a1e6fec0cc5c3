//! Market Store
//!
//! SQLite-backed implementation of the persistence gateway. Blocking
//! database work runs on the tokio blocking pool so request tasks never
//! stall the runtime.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use market_core::{LiquidityPool, Market, MarketOption, MarketStatus, UpdateMarketRequest};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::repository::{Committed, MarketRepository, StoreError};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS markets (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'draft',
        resolution_datetime INTEGER,
        winning_option_id TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS options (
        id TEXT PRIMARY KEY,
        market_id TEXT NOT NULL REFERENCES markets(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_options_market_id ON options(market_id);

    CREATE TABLE IF NOT EXISTS liquidity_pool (
        id TEXT PRIMARY KEY,
        market_id TEXT NOT NULL REFERENCES markets(id) ON DELETE CASCADE,
        option_id TEXT NOT NULL REFERENCES options(id) ON DELETE CASCADE,
        pool_value TEXT NOT NULL DEFAULT '0',
        updated_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_liquidity_pool_market_id ON liquidity_pool(market_id);
    CREATE INDEX IF NOT EXISTS idx_liquidity_pool_option_id ON liquidity_pool(option_id);
    CREATE INDEX IF NOT EXISTS idx_markets_status ON markets(status);
    CREATE INDEX IF NOT EXISTS idx_markets_created_at ON markets(created_at);
"#;

const MARKET_COLUMNS: &str = "id, title, description, status, resolution_datetime, \
                              winning_option_id, created_at, updated_at";

/// Market storage service using SQLite
pub struct SqliteMarketStore {
    conn: Arc<Mutex<Connection>>,
    /// Last commit sequence handed out, advanced while the connection is held
    commits: Arc<AtomicU64>,
}

impl SqliteMarketStore {
    /// Open (or create) a database file and apply the schema
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Io(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory store (useful for testing)
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    /// Open a store from a connection string
    ///
    /// Accepts `sqlite::memory:`, `sqlite://<path>`, `sqlite:<path>` or a bare path.
    pub fn from_url(url: &str) -> Result<Self, StoreError> {
        if url == "sqlite::memory:" || url == ":memory:" {
            info!("Opening in-memory market store");
            return Self::new_in_memory();
        }

        let path = if let Some(path) = url.strip_prefix("sqlite://") {
            path
        } else if let Some(path) = url.strip_prefix("sqlite:") {
            path
        } else if url.contains("://") {
            return Err(StoreError::UnsupportedUrl(url.to_string()));
        } else {
            url
        };

        if path.is_empty() {
            return Err(StoreError::UnsupportedUrl(url.to_string()));
        }

        info!("Opening market store at: {}", path);
        Self::open(path)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        // Cascade deletes depend on this, SQLite defaults it to off per connection
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            commits: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Run blocking database work off the async runtime
    async fn run<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            work(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Run a write and tag its result with the next commit sequence
    ///
    /// The sequence is taken under the same lock as the write, so sequence
    /// order is commit order.
    async fn commit<T, F>(&self, work: F) -> Result<Committed<T>, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let commits = Arc::clone(&self.commits);
        self.run(move |conn| {
            let value = work(conn)?;
            let sequence = commits.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Committed { sequence, value })
        })
        .await
    }
}

#[async_trait]
impl MarketRepository for SqliteMarketStore {
    async fn init_schema(&self) -> Result<(), StoreError> {
        self.run(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
    }

    async fn create_market(&self, market: &Market) -> Result<Committed<()>, StoreError> {
        let market = market.clone();
        self.commit(move |conn| {
            let tx = conn.transaction()?;

            tx.execute(
                r#"
                INSERT INTO markets (id, title, description, status, resolution_datetime,
                                     winning_option_id, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    market.id,
                    market.title,
                    market.description,
                    market.status.as_str(),
                    market.resolution_datetime.map(to_micros),
                    market.winning_option_id,
                    to_micros(market.created_at),
                    to_micros(market.updated_at),
                ],
            )?;

            for option in &market.options {
                tx.execute(
                    "INSERT INTO options (id, market_id, title, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        option.id,
                        option.market_id,
                        option.title,
                        to_micros(option.created_at),
                    ],
                )?;
            }

            for pool in &market.liquidity_pools {
                tx.execute(
                    r#"
                    INSERT INTO liquidity_pool (id, market_id, option_id, pool_value, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    params![
                        pool.id,
                        pool.market_id,
                        pool.option_id,
                        pool.pool_value.to_string(),
                        to_micros(pool.updated_at),
                    ],
                )?;
            }

            // Dropping the transaction on any error above rolls everything back
            tx.commit()?;
            debug!(
                "Stored market {} with {} options",
                market.id,
                market.options.len()
            );
            Ok(())
        })
        .await
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<Market>, StoreError> {
        let market_id = market_id.to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;

            let row = tx
                .query_row(
                    &format!("SELECT {} FROM markets WHERE id = ?1", MARKET_COLUMNS),
                    params![market_id],
                    MarketRow::from_row,
                )
                .optional()?;

            match row {
                Some(row) => Ok(Some(hydrate_market(&tx, row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn list_markets(
        &self,
        status: Option<MarketStatus>,
    ) -> Result<Vec<Market>, StoreError> {
        self.run(move |conn| {
            let tx = conn.transaction()?;

            let rows = {
                let mut sql = format!("SELECT {} FROM markets", MARKET_COLUMNS);
                let mut args: Vec<Value> = Vec::new();
                if let Some(status) = status {
                    sql.push_str(" WHERE status = ?1");
                    args.push(Value::Text(status.as_str().to_string()));
                }
                // rowid breaks ties between markets created in the same microsecond
                sql.push_str(" ORDER BY created_at DESC, rowid DESC");

                let mut stmt = tx.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(args), MarketRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };

            rows.into_iter()
                .map(|row| hydrate_market(&tx, row))
                .collect()
        })
        .await
    }

    async fn update_market(
        &self,
        market_id: &str,
        update: &UpdateMarketRequest,
        updated_at: DateTime<Utc>,
    ) -> Result<Committed<Option<Market>>, StoreError> {
        let market_id = market_id.to_string();
        let update = update.clone();
        self.commit(move |conn| {
            let tx = conn.transaction()?;

            let mut assignments = vec!["updated_at = ?"];
            let mut args = vec![Value::Integer(to_micros(updated_at))];

            if let Some(status) = update.status {
                assignments.push("status = ?");
                args.push(Value::Text(status.as_str().to_string()));
            }
            if let Some(winning_option_id) = update.winning_option_id {
                assignments.push("winning_option_id = ?");
                args.push(Value::Text(winning_option_id));
            }
            if let Some(resolution_datetime) = update.resolution_datetime {
                assignments.push("resolution_datetime = ?");
                args.push(Value::Integer(to_micros(resolution_datetime)));
            }
            args.push(Value::Text(market_id.clone()));

            let sql = format!("UPDATE markets SET {} WHERE id = ?", assignments.join(", "));
            if tx.execute(&sql, params_from_iter(args))? == 0 {
                return Ok(None);
            }

            let row = tx.query_row(
                &format!("SELECT {} FROM markets WHERE id = ?1", MARKET_COLUMNS),
                params![market_id],
                MarketRow::from_row,
            )?;
            let market = hydrate_market(&tx, row)?;

            tx.commit()?;
            Ok(Some(market))
        })
        .await
    }

    async fn get_liquidity_pools(
        &self,
        market_id: &str,
    ) -> Result<Vec<LiquidityPool>, StoreError> {
        let market_id = market_id.to_string();
        self.run(move |conn| load_pools(conn, &market_id)).await
    }

    async fn update_liquidity_pool(
        &self,
        market_id: &str,
        pool_id: &str,
        pool_value: Decimal,
        updated_at: DateTime<Utc>,
    ) -> Result<Committed<Option<Vec<LiquidityPool>>>, StoreError> {
        let market_id = market_id.to_string();
        let pool_id = pool_id.to_string();
        self.commit(move |conn| {
            let tx = conn.transaction()?;

            let affected = tx.execute(
                r#"
                UPDATE liquidity_pool
                SET pool_value = ?1, updated_at = ?2
                WHERE id = ?3 AND market_id = ?4
                "#,
                params![
                    pool_value.to_string(),
                    to_micros(updated_at),
                    pool_id,
                    market_id
                ],
            )?;
            if affected == 0 {
                return Ok(None);
            }

            let pools = load_pools(&tx, &market_id)?;
            tx.commit()?;
            Ok(Some(pools))
        })
        .await
    }
}

/// Raw `markets` row before children are attached
struct MarketRow {
    id: String,
    title: String,
    description: String,
    status: String,
    resolution_datetime: Option<i64>,
    winning_option_id: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl MarketRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            status: row.get(3)?,
            resolution_datetime: row.get(4)?,
            winning_option_id: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

fn hydrate_market(conn: &Connection, row: MarketRow) -> Result<Market, StoreError> {
    let status = MarketStatus::from_str(&row.status)
        .map_err(|e| StoreError::corrupt("markets", e))?;
    let options = load_options(conn, &row.id)?;
    let liquidity_pools = load_pools(conn, &row.id)?;

    Ok(Market {
        status,
        resolution_datetime: row
            .resolution_datetime
            .map(|v| from_micros("markets", v))
            .transpose()?,
        winning_option_id: row.winning_option_id,
        options,
        liquidity_pools,
        created_at: from_micros("markets", row.created_at)?,
        updated_at: from_micros("markets", row.updated_at)?,
        id: row.id,
        title: row.title,
        description: row.description,
    })
}

fn load_options(conn: &Connection, market_id: &str) -> Result<Vec<MarketOption>, StoreError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, market_id, title, created_at
        FROM options
        WHERE market_id = ?1
        ORDER BY created_at ASC, rowid ASC
        "#,
    )?;

    let rows = stmt
        .query_map(params![market_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, market_id, title, created_at)| {
            Ok(MarketOption {
                id,
                market_id,
                title,
                created_at: from_micros("options", created_at)?,
            })
        })
        .collect()
}

fn load_pools(conn: &Connection, market_id: &str) -> Result<Vec<LiquidityPool>, StoreError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT p.id, p.market_id, p.option_id, p.pool_value, p.updated_at
        FROM liquidity_pool p
        JOIN options o ON o.id = p.option_id
        WHERE p.market_id = ?1
        ORDER BY o.created_at ASC, o.rowid ASC
        "#,
    )?;

    let rows = stmt
        .query_map(params![market_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, market_id, option_id, pool_value, updated_at)| {
            let pool_value = Decimal::from_str(&pool_value).map_err(|e| {
                StoreError::corrupt("liquidity_pool", format!("bad pool_value {}: {}", pool_value, e))
            })?;
            Ok(LiquidityPool {
                id,
                market_id,
                option_id,
                pool_value,
                updated_at: from_micros("liquidity_pool", updated_at)?,
            })
        })
        .collect()
}

fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(table: &'static str, micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::corrupt(table, format!("timestamp out of range: {}", micros)))
}
