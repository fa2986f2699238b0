//! Trade persistence over SQLite
//!
//! A trade is only considered opened once the insert has returned its row
//! id. Schema changes are applied as additive column migrations at open,
//! so older database files keep working.

use super::types::{Trade, TradeMode, TradeStatus};
use crate::errors::{EngineError, EngineResult};
use crate::exchange::adapter::ExitOrderRefs;
use crate::exchange::ExchangeId;
use crate::logger::{self, LogTag};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

/// Column name and type for every field the engine reads or writes.
/// Missing columns are added in place at startup.
const REQUIRED_COLUMNS: &[(&str, &str)] = &[
    ("opened_at", "TEXT"),
    ("exchange", "TEXT"),
    ("symbol", "TEXT"),
    ("entry_price", "REAL"),
    ("take_profit", "REAL"),
    ("stop_loss", "REAL"),
    ("quantity", "REAL"),
    ("entry_value_usdt", "REAL"),
    ("status", "TEXT"),
    ("exit_price", "REAL"),
    ("closed_at", "TEXT"),
    ("exit_value_usdt", "REAL"),
    ("pnl_usdt", "REAL"),
    ("trailing_active", "BOOLEAN"),
    ("highest_price", "REAL"),
    ("reason", "TEXT"),
    ("trade_mode", "TEXT DEFAULT 'virtual'"),
    ("exit_order_refs", "TEXT"),
    ("needs_intervention", "BOOLEAN DEFAULT 0"),
];

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> EngineResult<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (id INTEGER PRIMARY KEY AUTOINCREMENT)",
            [],
        )?;

        let mut existing: HashSet<String> = HashSet::new();
        {
            let mut stmt = conn.prepare("PRAGMA table_info(trades)")?;
            let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
            for name in names {
                existing.insert(name?);
            }
        }

        for (name, column_type) in REQUIRED_COLUMNS {
            if !existing.contains(*name) {
                logger::warning(
                    LogTag::Database,
                    &format!("Adding missing trades column '{}'", name),
                );
                conn.execute(
                    &format!("ALTER TABLE trades ADD COLUMN {} {}", name, column_type),
                    [],
                )?;
            }
        }
        Ok(())
    }

    /// Persist a new trade and return its row id
    pub fn insert_trade(&self, trade: &Trade) -> EngineResult<i64> {
        let refs_json = match &trade.exit_order_refs {
            Some(refs) => Some(serde_json::to_string(refs)?),
            None => None,
        };

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO trades (opened_at, exchange, symbol, entry_price, take_profit, stop_loss, \
             quantity, entry_value_usdt, status, trailing_active, highest_price, reason, trade_mode, \
             exit_order_refs, needs_intervention) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                trade.opened_at.to_rfc3339(),
                trade.exchange.as_str(),
                trade.symbol,
                trade.entry_price,
                trade.take_profit,
                trade.stop_loss,
                trade.quantity,
                trade.entry_value_usdt,
                trade.status.as_str(),
                trade.trailing_active,
                trade.highest_price,
                trade.reason,
                trade.trade_mode.as_str(),
                refs_json,
                trade.needs_intervention,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_active_trades(&self) -> EngineResult<Vec<Trade>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, opened_at, exchange, symbol, entry_price, take_profit, stop_loss, \
             quantity, entry_value_usdt, status, trailing_active, highest_price, reason, \
             trade_mode, exit_order_refs, needs_intervention \
             FROM trades WHERE status = 'active' ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_raw)?;

        let mut trades = Vec::new();
        for row in rows {
            trades.push(raw_to_trade(row?)?);
        }
        Ok(trades)
    }

    pub fn get_trade(&self, id: i64) -> EngineResult<Trade> {
        let conn = self.conn.lock().unwrap();
        let raw = conn
            .query_row(
                "SELECT id, opened_at, exchange, symbol, entry_price, take_profit, stop_loss, \
                 quantity, entry_value_usdt, status, trailing_active, highest_price, reason, \
                 trade_mode, exit_order_refs, needs_intervention \
                 FROM trades WHERE id = ?1",
                params![id],
                row_to_raw,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    EngineError::NotFound(format!("trade #{}", id))
                }
                other => EngineError::Database(other),
            })?;
        raw_to_trade(raw)
    }

    pub fn count_active_trades(&self) -> EngineResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trades WHERE status = 'active'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Whether an active trade already tracks this symbol on this exchange
    pub fn has_active_trade_for(&self, exchange: ExchangeId, symbol: &str) -> EngineResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trades WHERE status = 'active' AND exchange = ?1 AND symbol = ?2",
            params![exchange.as_str(), symbol],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Move a trade to a terminal status
    pub fn close_trade(
        &self,
        id: i64,
        status: TradeStatus,
        exit_price: f64,
        pnl_usdt: f64,
    ) -> EngineResult<()> {
        if !status.is_closed() {
            return Err(EngineError::InvariantViolation(format!(
                "trade #{}: close requires a terminal status, got {}",
                id, status
            )));
        }

        let conn = self.conn.lock().unwrap();
        let quantity: f64 = conn
            .query_row(
                "SELECT quantity FROM trades WHERE id = ?1 AND status = 'active'",
                params![id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    EngineError::NotFound(format!("active trade #{}", id))
                }
                other => EngineError::Database(other),
            })?;

        conn.execute(
            "UPDATE trades SET status = ?1, exit_price = ?2, closed_at = ?3, \
             exit_value_usdt = ?4, pnl_usdt = ?5 WHERE id = ?6",
            params![
                status.as_str(),
                exit_price,
                Utc::now().to_rfc3339(),
                exit_price * quantity,
                pnl_usdt,
                id
            ],
        )?;
        Ok(())
    }

    /// Raise the stop (and peak) after a trailing update; marks the
    /// trailing flag and optionally swaps the exit-order handle
    pub fn update_stop(
        &self,
        id: i64,
        new_stop: f64,
        highest_price: f64,
        new_refs: Option<&ExitOrderRefs>,
    ) -> EngineResult<()> {
        let conn = self.conn.lock().unwrap();
        match new_refs {
            Some(refs) => {
                let json = serde_json::to_string(refs)?;
                conn.execute(
                    "UPDATE trades SET stop_loss = ?1, highest_price = ?2, trailing_active = 1, \
                     exit_order_refs = ?3 WHERE id = ?4",
                    params![new_stop, highest_price, json, id],
                )?;
            }
            None => {
                conn.execute(
                    "UPDATE trades SET stop_loss = ?1, highest_price = ?2, trailing_active = 1 \
                     WHERE id = ?3",
                    params![new_stop, highest_price, id],
                )?;
            }
        }
        Ok(())
    }

    /// Record a new price peak without touching the stop
    pub fn update_peak_price(&self, id: i64, highest_price: f64) -> EngineResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE trades SET highest_price = ?1 WHERE id = ?2",
            params![highest_price, id],
        )?;
        Ok(())
    }

    /// Flag a trade whose exit protection was lost; automation skips it
    /// until a human clears the flag
    pub fn mark_needs_intervention(&self, id: i64) -> EngineResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE trades SET needs_intervention = 1, exit_order_refs = NULL WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }
}

/// Column values pulled out before enum parsing, which rusqlite's row
/// mapper cannot express
struct RawTrade {
    id: i64,
    opened_at: String,
    exchange: String,
    symbol: String,
    entry_price: f64,
    take_profit: f64,
    stop_loss: f64,
    quantity: f64,
    entry_value_usdt: f64,
    status: String,
    trailing_active: bool,
    highest_price: f64,
    reason: String,
    trade_mode: String,
    exit_order_refs: Option<String>,
    needs_intervention: bool,
}

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawTrade> {
    Ok(RawTrade {
        id: row.get(0)?,
        opened_at: row.get(1)?,
        exchange: row.get(2)?,
        symbol: row.get(3)?,
        entry_price: row.get(4)?,
        take_profit: row.get(5)?,
        stop_loss: row.get(6)?,
        quantity: row.get(7)?,
        entry_value_usdt: row.get(8)?,
        status: row.get(9)?,
        trailing_active: row.get(10)?,
        highest_price: row.get(11)?,
        reason: row.get(12)?,
        trade_mode: row.get(13)?,
        exit_order_refs: row.get(14)?,
        needs_intervention: row.get(15)?,
    })
}

fn raw_to_trade(raw: RawTrade) -> EngineResult<Trade> {
    let exchange = ExchangeId::parse(&raw.exchange).ok_or_else(|| {
        EngineError::InvariantViolation(format!(
            "trade #{}: unknown exchange '{}'",
            raw.id, raw.exchange
        ))
    })?;
    let status = TradeStatus::parse(&raw.status).ok_or_else(|| {
        EngineError::InvariantViolation(format!(
            "trade #{}: unknown status '{}'",
            raw.id, raw.status
        ))
    })?;
    let trade_mode = TradeMode::parse(&raw.trade_mode).ok_or_else(|| {
        EngineError::InvariantViolation(format!(
            "trade #{}: unknown trade mode '{}'",
            raw.id, raw.trade_mode
        ))
    })?;
    let opened_at = DateTime::parse_from_rfc3339(&raw.opened_at)
        .map_err(|e| {
            EngineError::InvariantViolation(format!(
                "trade #{}: bad opened_at '{}': {}",
                raw.id, raw.opened_at, e
            ))
        })?
        .with_timezone(&Utc);
    let exit_order_refs = match raw.exit_order_refs {
        Some(json) => Some(serde_json::from_str(&json)?),
        None => None,
    };

    Ok(Trade {
        id: raw.id,
        exchange,
        symbol: raw.symbol,
        entry_price: raw.entry_price,
        take_profit: raw.take_profit,
        stop_loss: raw.stop_loss,
        quantity: raw.quantity,
        entry_value_usdt: raw.entry_value_usdt,
        status,
        trade_mode,
        trailing_active: raw.trailing_active,
        highest_price: raw.highest_price,
        exit_order_refs,
        reason: raw.reason,
        opened_at,
        needs_intervention: raw.needs_intervention,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trade() -> Trade {
        Trade::open(
            ExchangeId::Binance,
            "BTC/USDT",
            100.0,
            110.0,
            95.0,
            0.5,
            TradeMode::Virtual,
            "sniper",
        )
        .unwrap()
    }

    #[test]
    fn test_insert_and_list_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_trade(&sample_trade()).unwrap();
        assert!(id > 0);

        let active = db.list_active_trades().unwrap();
        assert_eq!(active.len(), 1);
        let trade = &active[0];
        assert_eq!(trade.id, id);
        assert_eq!(trade.symbol, "BTC/USDT");
        assert_eq!(trade.exchange, ExchangeId::Binance);
        assert_eq!(trade.status, TradeStatus::Active);
        assert!(trade.exit_order_refs.is_none());
    }

    #[test]
    fn test_exit_refs_survive_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let mut trade = sample_trade();
        trade.trade_mode = TradeMode::Real;
        trade.exit_order_refs = Some(ExitOrderRefs::Dual {
            tp_id: "tp-1".to_string(),
            sl_id: "sl-1".to_string(),
        });
        let id = db.insert_trade(&trade).unwrap();

        let loaded = db.get_trade(id).unwrap();
        assert_eq!(
            loaded.exit_order_refs,
            Some(ExitOrderRefs::Dual {
                tp_id: "tp-1".to_string(),
                sl_id: "sl-1".to_string(),
            })
        );
    }

    #[test]
    fn test_close_removes_from_active() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_trade(&sample_trade()).unwrap();

        db.close_trade(id, TradeStatus::ClosedWin, 110.0, 5.0).unwrap();
        assert!(db.list_active_trades().unwrap().is_empty());
        assert_eq!(db.count_active_trades().unwrap(), 0);

        let closed = db.get_trade(id).unwrap();
        assert_eq!(closed.status, TradeStatus::ClosedWin);

        // Closing twice fails: the trade is no longer active
        assert!(matches!(
            db.close_trade(id, TradeStatus::ClosedWin, 110.0, 5.0),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_close_rejects_active_status() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_trade(&sample_trade()).unwrap();
        assert!(matches!(
            db.close_trade(id, TradeStatus::Active, 110.0, 5.0),
            Err(EngineError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_update_stop_marks_trailing() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_trade(&sample_trade()).unwrap();

        db.update_stop(id, 100.0, 102.0, None).unwrap();
        let trade = db.get_trade(id).unwrap();
        assert_eq!(trade.stop_loss, 100.0);
        assert_eq!(trade.highest_price, 102.0);
        assert!(trade.trailing_active);
    }

    #[test]
    fn test_has_active_trade_for_symbol() {
        let db = Database::open_in_memory().unwrap();
        db.insert_trade(&sample_trade()).unwrap();
        assert!(db
            .has_active_trade_for(ExchangeId::Binance, "BTC/USDT")
            .unwrap());
        assert!(!db
            .has_active_trade_for(ExchangeId::Kucoin, "BTC/USDT")
            .unwrap());
    }

    #[test]
    fn test_schema_migration_adds_columns() {
        // An old database with only a subset of columns gets upgraded
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE trades (id INTEGER PRIMARY KEY AUTOINCREMENT, symbol TEXT)",
            [],
        )
        .unwrap();
        Database::init_schema(&conn).unwrap();

        let db = Database {
            conn: Mutex::new(conn),
        };
        let id = db.insert_trade(&sample_trade()).unwrap();
        assert_eq!(db.get_trade(id).unwrap().symbol, "BTC/USDT");
    }
}
