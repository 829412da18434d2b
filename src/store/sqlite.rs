//! SQLite-backed store.
//!
//! Single-connection pool: SQLite serializes writes anyway, and one
//! connection keeps `sqlite::memory:` databases coherent under test.
//! Schema is created on connect; enum fields are stored as their display
//! text and parsed back on read.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;

use super::{MasterRow, Store};
use crate::error::{Error, Result};
use crate::types::{OptionKind, Position, PositionStatus, Side, UserProfile};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    owner        INTEGER PRIMARY KEY,
    name         TEXT NOT NULL,
    consumer_key TEXT NOT NULL,
    mobile       TEXT NOT NULL,
    ucc          TEXT NOT NULL,
    mpin         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS trades (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    owner        INTEGER NOT NULL,
    index_name   TEXT NOT NULL,
    symbol       TEXT NOT NULL,
    token        TEXT NOT NULL,
    kind         TEXT NOT NULL,
    side         TEXT NOT NULL,
    qty          INTEGER NOT NULL,
    entry_price  REAL NOT NULL,
    exit_price   REAL NOT NULL DEFAULT 0,
    status       TEXT NOT NULL,
    order_id     TEXT NOT NULL,
    sl_order_id  TEXT,
    sl_trigger   REAL NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trades_owner_status ON trades (owner, status);

CREATE TABLE IF NOT EXISTS master (
    index_name   TEXT NOT NULL,
    token        TEXT NOT NULL,
    symbol       TEXT NOT NULL,
    ref_key      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_master_index ON master (index_name);
"#;

/// SQLite implementation of [`Store`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and bootstrap the schema.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        info!(database_url, "Store ready");

        Ok(Self { pool })
    }

    fn row_to_position(row: &sqlx::sqlite::SqliteRow) -> Result<Position> {
        let kind: String = row.try_get("kind")?;
        let side: String = row.try_get("side")?;
        let status: String = row.try_get("status")?;
        let created_at: String = row.try_get("created_at")?;
        let sl_order_id: Option<String> = row.try_get("sl_order_id")?;

        Ok(Position {
            id: row.try_get("id")?,
            owner: row.try_get("owner")?,
            index: row.try_get("index_name")?,
            trading_symbol: row.try_get("symbol")?,
            token: row.try_get("token")?,
            kind: OptionKind::from_str(&kind)?,
            side: Side::from_str(&side)?,
            qty: row.try_get("qty")?,
            entry_price: row.try_get("entry_price")?,
            exit_price: row.try_get("exit_price")?,
            status: PositionStatus::from_str(&status)?,
            order_id: row.try_get("order_id")?,
            sl_order_id: sl_order_id.filter(|id| !id.is_empty()),
            sl_trigger: row.try_get("sl_trigger")?,
            created_at: created_at
                .parse()
                .map_err(|e| Error::Transport(format!("corrupt created_at: {e}")))?,
        })
    }

    fn rows_to_positions(rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<Position>> {
        rows.iter().map(Self::row_to_position).collect()
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_user(&self, user: &UserProfile) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (owner, name, consumer_key, mobile, ucc, mpin)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(owner) DO UPDATE SET
                 name = excluded.name,
                 consumer_key = excluded.consumer_key,
                 mobile = excluded.mobile,
                 ucc = excluded.ucc,
                 mpin = excluded.mpin",
        )
        .bind(user.owner)
        .bind(&user.name)
        .bind(&user.consumer_key)
        .bind(&user.mobile)
        .bind(&user.ucc)
        .bind(&user.mpin)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_user(&self, owner: i64) -> Result<Option<UserProfile>> {
        let row = sqlx::query("SELECT * FROM users WHERE owner = ?")
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => Some(UserProfile {
                owner: row.try_get("owner")?,
                name: row.try_get("name")?,
                consumer_key: row.try_get("consumer_key")?,
                mobile: row.try_get("mobile")?,
                ucc: row.try_get("ucc")?,
                mpin: row.try_get("mpin")?,
            }),
            None => None,
        })
    }

    async fn insert_position(&self, position: &Position) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO trades
                 (owner, index_name, symbol, token, kind, side, qty,
                  entry_price, exit_price, status, order_id, sl_order_id,
                  sl_trigger, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(position.owner)
        .bind(&position.index)
        .bind(&position.trading_symbol)
        .bind(&position.token)
        .bind(position.kind.to_string())
        .bind(position.side.to_string())
        .bind(position.qty)
        .bind(position.entry_price)
        .bind(position.exit_price)
        .bind(position.status.to_string())
        .bind(&position.order_id)
        .bind(&position.sl_order_id)
        .bind(position.sl_trigger)
        .bind(position.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn open_positions(&self, owner: i64) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            "SELECT * FROM trades WHERE owner = ? AND status = 'OPEN' ORDER BY id",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Self::rows_to_positions(rows)
    }

    async fn open_positions_with_stop_loss(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            "SELECT * FROM trades
             WHERE status = 'OPEN' AND sl_order_id IS NOT NULL AND sl_order_id != ''
             ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Self::rows_to_positions(rows)
    }

    async fn open_positions_by_side(
        &self,
        owner: i64,
        side: Side,
        index: &str,
    ) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            "SELECT * FROM trades
             WHERE owner = ? AND status = 'OPEN' AND side = ? AND index_name = ?
             ORDER BY id",
        )
        .bind(owner)
        .bind(side.to_string())
        .bind(index)
        .fetch_all(&self.pool)
        .await?;
        Self::rows_to_positions(rows)
    }

    async fn position_by_order_id(
        &self,
        owner: i64,
        order_id: &str,
    ) -> Result<Option<Position>> {
        let row = sqlx::query("SELECT * FROM trades WHERE owner = ? AND order_id = ?")
            .bind(owner)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_position).transpose()
    }

    async fn mark_closed(&self, id: i64, exit_price: f64) -> Result<()> {
        sqlx::query(
            "UPDATE trades
             SET status = 'CLOSED', exit_price = ?, sl_order_id = NULL, sl_trigger = 0
             WHERE id = ?",
        )
        .bind(exit_price)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_stop_loss(&self, id: i64, sl_order_id: &str, trigger: f64) -> Result<()> {
        sqlx::query("UPDATE trades SET sl_order_id = ?, sl_trigger = ? WHERE id = ?")
            .bind(sl_order_id)
            .bind(trigger)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_stop_loss(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE trades SET sl_order_id = NULL, sl_trigger = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_master(&self, index: &str, rows: &[MasterRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM master WHERE index_name = ?")
            .bind(index)
            .execute(&mut *tx)
            .await?;

        for row in rows {
            sqlx::query(
                "INSERT INTO master (index_name, token, symbol, ref_key) VALUES (?, ?, ?, ?)",
            )
            .bind(index)
            .bind(&row.token)
            .bind(&row.trading_symbol)
            .bind(&row.ref_key)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn master_rows(&self, index: &str) -> Result<Vec<MasterRow>> {
        let rows = sqlx::query("SELECT token, symbol, ref_key FROM master WHERE index_name = ?")
            .bind(index)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(MasterRow {
                    token: row.try_get("token")?,
                    trading_symbol: row.try_get("symbol")?,
                    ref_key: row.try_get("ref_key")?,
                })
            })
            .collect()
    }

    async fn master_count(&self, index: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM master WHERE index_name = ?")
                .bind(index)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
