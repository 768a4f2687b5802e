use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;

use crate::{
    error::IngestError,
    models::{NormalizedTransfer, StoredTransfer},
};

pub const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode=WAL;
CREATE TABLE IF NOT EXISTS transfers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chain_id TEXT NOT NULL,
    tx_hash TEXT NOT NULL,
    event_index INTEGER NOT NULL,
    block_number INTEGER NOT NULL,
    block_ts_unix INTEGER NOT NULL,
    token TEXT NOT NULL,
    submitter TEXT NOT NULL,
    sender TEXT NOT NULL,
    recipient TEXT NOT NULL,
    amount TEXT NOT NULL, -- U256 as decimal string
    decimals INTEGER NOT NULL,
    provider TEXT NOT NULL,
    facilitator_id TEXT NOT NULL,
    UNIQUE(chain_id, tx_hash, event_index)
);

CREATE INDEX IF NOT EXISTS transfers_by_facilitator
    ON transfers (facilitator_id, block_ts_unix);

-- End of the last fully ingested window, per chain and facilitator
CREATE TABLE IF NOT EXISTS ingest_state (
    chain_id TEXT NOT NULL,
    facilitator_id TEXT NOT NULL,
    last_window_end_unix INTEGER NOT NULL,
    updated_at_unix INTEGER NOT NULL,
    PRIMARY KEY (chain_id, facilitator_id)
);
"#;

pub fn init(db_path: &str) -> Result<Connection, IngestError> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(conn)
}

pub fn init_in_memory() -> Result<Connection, IngestError> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(conn)
}

/// Upserts a window's transfers and, when `window_end` is given, moves the
/// cursor, all in one transaction.
pub fn persist_window(
    conn: &mut Connection,
    chain_id: &str,
    facilitator_id: &str,
    transfers: &[NormalizedTransfer],
    window_end: Option<u64>,
) -> Result<usize, IngestError> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO transfers (chain_id, tx_hash, event_index, block_number, block_ts_unix,
                                    token, submitter, sender, recipient, amount, decimals,
                                    provider, facilitator_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(chain_id, tx_hash, event_index) DO UPDATE SET
                block_number = excluded.block_number,
                block_ts_unix = excluded.block_ts_unix,
                token = excluded.token,
                submitter = excluded.submitter,
                sender = excluded.sender,
                recipient = excluded.recipient,
                amount = excluded.amount,
                decimals = excluded.decimals,
                provider = excluded.provider,
                facilitator_id = excluded.facilitator_id",
        )?;
        for t in transfers {
            stmt.execute(params![
                t.chain_id,
                t.tx_hash,
                t.event_index as i64,
                t.block_number as i64,
                t.block_timestamp as i64,
                t.token_address,
                t.submitter,
                t.sender,
                t.recipient,
                t.amount.to_string(),
                t.decimals,
                t.provider,
                t.facilitator_id,
            ])?;
        }
    }
    if let Some(end) = window_end {
        tx.execute(
            "INSERT INTO ingest_state (chain_id, facilitator_id, last_window_end_unix,
                                       updated_at_unix)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(chain_id, facilitator_id) DO UPDATE SET
                last_window_end_unix = excluded.last_window_end_unix,
                updated_at_unix = excluded.updated_at_unix",
            params![
                chain_id,
                facilitator_id,
                end as i64,
                OffsetDateTime::now_utc().unix_timestamp()
            ],
        )?;
    }
    tx.commit()?;
    Ok(transfers.len())
}

pub fn window_cursor(
    conn: &Connection,
    chain_id: &str,
    facilitator_id: &str,
) -> Result<Option<u64>, IngestError> {
    let end = conn
        .query_row(
            "SELECT last_window_end_unix FROM ingest_state
             WHERE chain_id = ?1 AND facilitator_id = ?2",
            params![chain_id, facilitator_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(end.map(|e| e as u64))
}

/// Newest first.
pub fn recent_transfers(
    conn: &Connection,
    facilitator_id: Option<&str>,
    limit: usize,
) -> Result<Vec<StoredTransfer>, IngestError> {
    let mut stmt = conn.prepare(
        "SELECT chain_id, tx_hash, event_index, block_number, block_ts_unix, token, submitter,
                sender, recipient, amount, decimals, provider, facilitator_id
         FROM transfers
         WHERE ?1 IS NULL OR facilitator_id = ?1
         ORDER BY block_ts_unix DESC, block_number DESC, tx_hash, event_index
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![facilitator_id, limit as i64], |row| {
        Ok(StoredTransfer {
            chain_id: row.get(0)?,
            tx_hash: row.get(1)?,
            event_index: row.get::<_, i64>(2)? as u64,
            block_number: row.get::<_, i64>(3)? as u64,
            block_timestamp: row.get::<_, i64>(4)? as u64,
            token: row.get(5)?,
            submitter: row.get(6)?,
            sender: row.get(7)?,
            recipient: row.get(8)?,
            amount: row.get(9)?,
            decimals: row.get(10)?,
            provider: row.get(11)?,
            facilitator_id: row.get(12)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
