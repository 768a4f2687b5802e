use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use eyre::Result;
use rusqlite::Connection;
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::Mutex;

use crate::{db, models::StoredTransfer};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

type Db = Arc<Mutex<Connection>>;

#[derive(Debug, Deserialize)]
pub struct TransfersQuery {
    facilitator: Option<String>,
    limit: Option<usize>,
}

async fn list_transfers(
    State(conn): State<Db>,
    Query(query): Query<TransfersQuery>,
) -> Result<Json<Vec<StoredTransfer>>, (StatusCode, String)> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let conn = conn.lock().await;
    db::recent_transfers(&conn, query.facilitator.as_deref(), limit)
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub fn router(conn: Connection) -> Router {
    Router::new()
        .route("/transfers", get(list_transfers))
        .route("/health", get(|| async { "ok" }))
        .with_state(Arc::new(Mutex::new(conn)))
}

pub async fn serve(db_path: &str, bind: &str) -> Result<()> {
    let app = router(db::init(db_path)?);

    let addr: SocketAddr = bind.parse()?;
    tracing::info!(%addr, "HTTP API listening");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NormalizedTransfer;
    use alloy_primitives::U256;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    fn seeded() -> Connection {
        let mut conn = db::init_in_memory().unwrap();
        let transfers: Vec<_> = (0..3)
            .map(|i| NormalizedTransfer {
                token_address: "0x70".into(),
                submitter: "0xaaa".into(),
                sender: "0xaaa".into(),
                recipient: "0xbbb".into(),
                amount: U256::from(100u64),
                block_number: 10 + i,
                block_timestamp: 1_000 + i,
                tx_hash: format!("0x{i}"),
                chain_id: "SN_MAIN".into(),
                provider: "rpc".into(),
                decimals: 18,
                facilitator_id: if i == 0 { "other".into() } else { "facilitator-1".into() },
                event_index: 0,
            })
            .collect();
        db::persist_window(&mut conn, "SN_MAIN", "facilitator-1", &transfers, None).unwrap();
        conn
    }

    async fn get_json(uri: &str) -> serde_json::Value {
        let response = router(seeded())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn lists_newest_transfers_first() {
        let json = get_json("/transfers?limit=2").await;
        let rows = json.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["tx_hash"], "0x2");
        assert_eq!(rows[0]["amount"], "100");
    }

    #[tokio::test]
    async fn filters_by_facilitator() {
        let json = get_json("/transfers?facilitator=other").await;
        assert_eq!(json.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn health() {
        let response = router(seeded())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
