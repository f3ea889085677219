use crate::error::StoreError;
use crate::models::{PriceObservation, Source, StoreStats, VegetableTrend};
use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use duckdb::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::{debug, info, warn};

pub type Result<T> = std::result::Result<T, StoreError>;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS prices (
    city          VARCHAR   NOT NULL,
    vegetable     VARCHAR   NOT NULL,
    market        VARCHAR   NOT NULL,
    observed_date DATE      NOT NULL,
    price         DOUBLE    NOT NULL,
    price_unit    VARCHAR   NOT NULL,
    min_price     DOUBLE,
    max_price     DOUBLE,
    variety       VARCHAR,
    currency      VARCHAR   NOT NULL DEFAULT 'INR',
    captured_at   TIMESTAMP NOT NULL,
    extraction    VARCHAR   NOT NULL DEFAULT 'table',
    -- JSON array of the original row cells
    raw_fields    VARCHAR,
    PRIMARY KEY (city, vegetable, market, observed_date)
);

CREATE SEQUENCE IF NOT EXISTS refresh_run_seq START 1;

CREATE TABLE IF NOT EXISTS refresh_runs (
    id            INTEGER PRIMARY KEY DEFAULT nextval('refresh_run_seq'),
    started_at    TIMESTAMP NOT NULL,
    finished_at   TIMESTAMP,
    status        VARCHAR NOT NULL DEFAULT 'running',
    attempted     INTEGER DEFAULT 0,
    succeeded     INTEGER DEFAULT 0,
    failed        INTEGER DEFAULT 0,
    error_msg     VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

// Captured_at is rewritten by upserts, so only immutable key columns are indexed.
const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_prices_vegetable ON prices (vegetable);
CREATE INDEX IF NOT EXISTS idx_prices_city      ON prices (city);
"#;

const SELECT_COLUMNS: &str = "city, vegetable, market, observed_date, price, price_unit, \
     min_price, max_price, variety, currency, captured_at, extraction, raw_fields";

// ── Store ─────────────────────────────────────────────────────────────────────

/// Durable price observations keyed by (city, vegetable, market, observed_date).
///
/// Writes go through one DuckDB connection behind a mutex, so there is a
/// single writer at a time. Reads run on their own cloned connection and
/// never wait on each other.
pub struct PriceStore {
    conn: Mutex<Connection>,
    /// Handle that read connections are cloned from.
    read_seed: Mutex<Connection>,
}

impl PriceStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        debug!("Opened price store at {:?}", path);
        Self::from_connection(conn)
    }

    /// DuckDB files are locked per process; back off briefly if another
    /// process (e.g. a running daemon) holds the file.
    pub async fn open_with_retry(path: &Path) -> Result<Self> {
        let strategy = ExponentialBackoff::from_millis(50)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(4);
        Retry::spawn(strategy, || async {
            PriceStore::open(path).map_err(|e| {
                warn!("Opening price store failed, retrying: {}", e);
                e
            })
        })
        .await
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let read_seed = conn.try_clone()?;
        Ok(Self { conn: Mutex::new(conn), read_seed: Mutex::new(read_seed) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Fresh connection to the same database for one read.
    fn reader(&self) -> Result<Connection> {
        let seed = self.read_seed.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(seed.try_clone()?)
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        let conn = self.conn()?;
        conn.execute_batch(DDL)?;
        conn.execute_batch(INDEXES)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Prices ────────────────────────────────────────────────────────────────

    /// Insert the row for the observation's (city, vegetable, market,
    /// observed_date), or overwrite it unless the stored row was captured
    /// later. Equal capture times overwrite.
    pub fn upsert(&self, obs: &PriceObservation) -> Result<()> {
        let raw = serde_json::to_string(&obs.raw_fields)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO prices
                   (city, vegetable, market, observed_date, price, price_unit,
                    min_price, max_price, variety, currency, captured_at, extraction, raw_fields)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (city, vegetable, market, observed_date) DO UPDATE SET
                   price       = excluded.price,
                   price_unit  = excluded.price_unit,
                   min_price   = excluded.min_price,
                   max_price   = excluded.max_price,
                   variety     = COALESCE(excluded.variety, prices.variety),
                   currency    = excluded.currency,
                   captured_at = excluded.captured_at,
                   extraction  = excluded.extraction,
                   raw_fields  = excluded.raw_fields
               WHERE excluded.captured_at >= prices.captured_at"#,
            params![
                obs.city,
                obs.vegetable,
                obs.market_name,
                obs.observed_date,
                obs.price,
                obs.price_unit.as_str(),
                obs.min_price,
                obs.max_price,
                obs.variety,
                obs.currency,
                obs.captured_at,
                obs.extraction.as_str(),
                raw,
            ],
        )?;
        debug!(
            city = %obs.city, vegetable = %obs.vegetable, market = %obs.market_name,
            "Stored ₹{} per {}", obs.price, obs.price_unit
        );
        Ok(())
    }

    /// Most recently captured row for one (city, vegetable).
    pub fn latest(&self, city: &str, vegetable: &str) -> Result<Option<PriceObservation>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM prices
             WHERE city = ? AND vegetable = ?
             ORDER BY captured_at DESC
             LIMIT 1"
        ))?;
        let mut rows = stmt.query(params![city, vegetable])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_observation(row)?)),
            None => Ok(None),
        }
    }

    /// Latest row per city for one vegetable, ordered by city.
    pub fn latest_across_cities(&self, vegetable: &str) -> Result<Vec<PriceObservation>> {
        self.latest_per_key(
            "vegetable = ?",
            vegetable,
            "PARTITION BY city",
            "city",
        )
    }

    /// Latest row per vegetable for one city, ordered by vegetable.
    pub fn latest_per_vegetable(&self, city: &str) -> Result<Vec<PriceObservation>> {
        self.latest_per_key(
            "city = ?",
            city,
            "PARTITION BY vegetable",
            "vegetable",
        )
    }

    fn latest_per_key(
        &self,
        filter: &str,
        value: &str,
        partition: &str,
        order: &str,
    ) -> Result<Vec<PriceObservation>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM prices
             WHERE {filter}
             QUALIFY ROW_NUMBER() OVER ({partition} ORDER BY captured_at DESC) = 1
             ORDER BY {order}"
        ))?;
        let mut rows = stmt.query(params![value])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_observation(row)?);
        }
        Ok(out)
    }

    /// Delete rows captured more than `days` ago; returns rows removed.
    pub fn prune(&self, days: u32) -> Result<usize> {
        let cutoff = Utc::now().naive_utc() - ChronoDuration::days(i64::from(days));
        self.prune_before(cutoff)
    }

    pub fn prune_before(&self, cutoff: NaiveDateTime) -> Result<usize> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM prices WHERE captured_at < ?", params![cutoff])?;
        info!("Pruned {} observations captured before {}", n, cutoff);
        Ok(n)
    }

    #[cfg(test)]
    pub fn count(&self) -> Result<i64> {
        let conn = self.reader()?;
        let mut s = conn.prepare("SELECT COUNT(*) FROM prices")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn all(&self) -> Result<Vec<PriceObservation>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM prices ORDER BY city, vegetable, captured_at"
        ))?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_observation(row)?);
        }
        Ok(out)
    }

    // ── Aggregates ────────────────────────────────────────────────────────────

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.reader()?;
        let mut s = conn.prepare(
            "SELECT COUNT(*), COUNT(DISTINCT city), COUNT(DISTINCT vegetable), MAX(captured_at)
             FROM prices",
        )?;
        Ok(s.query_row([], |r| {
            Ok(StoreStats {
                total_records: r.get(0)?,
                unique_cities: r.get(1)?,
                unique_vegetables: r.get(2)?,
                latest_update: r.get(3)?,
            })
        })?)
    }

    /// Per-vegetable per-kg aggregates over rows captured in the last `days`.
    pub fn vegetable_trends(&self, days: u32) -> Result<Vec<VegetableTrend>> {
        let since = Utc::now().naive_utc() - ChronoDuration::days(i64::from(days));
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "WITH per_kg AS (
                 SELECT vegetable, city,
                        CASE WHEN price_unit = 'quintal' THEN price / 100.0 ELSE price END AS kg
                 FROM prices
                 WHERE captured_at >= ?
             )
             SELECT vegetable, COUNT(*), COUNT(DISTINCT city),
                    ROUND(AVG(kg), 2), ROUND(MIN(kg), 2), ROUND(MAX(kg), 2)
             FROM per_kg
             GROUP BY vegetable
             ORDER BY vegetable",
        )?;
        let trends = stmt
            .query_map(params![since], |r| {
                Ok(VegetableTrend {
                    vegetable: r.get(0)?,
                    observations: r.get(1)?,
                    cities: r.get(2)?,
                    avg_price_per_kg: r.get(3)?,
                    min_price_per_kg: r.get(4)?,
                    max_price_per_kg: r.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(trends)
    }

    // ── Refresh run log ───────────────────────────────────────────────────────

    pub fn begin_refresh_run(&self) -> Result<i64> {
        let conn = self.conn()?;
        let id: i64 = conn.query_row(
            "INSERT INTO refresh_runs (started_at, status) VALUES (?, 'running') RETURNING id",
            params![Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_refresh_run(
        &self,
        run_id: i64,
        attempted: usize,
        succeeded: usize,
        failed: usize,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"UPDATE refresh_runs SET
               finished_at = ?, status = ?,
               attempted = ?, succeeded = ?, failed = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "partial" },
                attempted as i64,
                succeeded as i64,
                failed as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn refresh_run_count(&self) -> Result<i64> {
        let conn = self.reader()?;
        let mut s = conn.prepare("SELECT COUNT(*) FROM refresh_runs")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }
}

fn row_to_observation(row: &Row<'_>) -> Result<PriceObservation> {
    let unit: String = row.get(5)?;
    let extraction: String = row.get(11)?;
    let raw: Option<String> = row.get(12)?;
    let raw_fields = match raw {
        Some(s) => serde_json::from_str(&s).map_err(|e| StoreError::Corrupt(e.to_string()))?,
        None => Vec::new(),
    };

    Ok(PriceObservation {
        city: row.get(0)?,
        vegetable: row.get(1)?,
        market_name: row.get(2)?,
        observed_date: row.get(3)?,
        price: row.get(4)?,
        price_unit: unit.parse().map_err(StoreError::Corrupt)?,
        min_price: row.get(6)?,
        max_price: row.get(7)?,
        variety: row.get(8)?,
        currency: row.get(9)?,
        captured_at: row.get(10)?,
        source: Source::Store,
        extraction: extraction.parse().map_err(StoreError::Corrupt)?,
        raw_fields,
    })
}
