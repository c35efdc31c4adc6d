//! Trade-sync stream protocol (`/p2p-exchange/sync/trades/1.0.0`)
//!
//! Request/reply pull of historical trades between two peers over a
//! dedicated stream: one line of JSON request, one line of JSON response.
//! The server clamps the window to its own retention before querying; the
//! client either gets the full clamped window or an error, never partial
//! data.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use store::{clamp_to_retention, Store, StoreError};
use tracing::{info, warn};
use types::trade::Trade;

/// Default row cap when the request carries none.
pub const DEFAULT_SYNC_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTradesRequest {
    /// Unix seconds, inclusive.
    pub since: i64,
    pub until: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub limit: usize,
}

fn is_zero(v: &usize) -> bool {
    *v == 0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTradesResponse {
    pub trades: Vec<Trade>,
}

/// Where the sync server reads trades from, ascending by timestamp.
#[async_trait]
pub trait TradeSource: Send + Sync {
    async fn trades_between(
        &self,
        since: i64,
        until: i64,
        limit: usize,
    ) -> Result<Vec<Trade>, StoreError>;
}

#[async_trait]
impl<T: TradeSource + ?Sized> TradeSource for Arc<T> {
    async fn trades_between(
        &self,
        since: i64,
        until: i64,
        limit: usize,
    ) -> Result<Vec<Trade>, StoreError> {
        (**self).trades_between(since, until, limit).await
    }
}

#[async_trait]
impl TradeSource for Store {
    async fn trades_between(
        &self,
        since: i64,
        until: i64,
        limit: usize,
    ) -> Result<Vec<Trade>, StoreError> {
        self.list_trades_asc(since, until, limit, None).await
    }
}

/// Server half: parses one request line and produces one response line.
pub struct SyncServer<S: TradeSource> {
    source: S,
    retention_months: i64,
}

impl<S: TradeSource> SyncServer<S> {
    pub fn new(source: S, retention_months: i64) -> Self {
        Self {
            source,
            retention_months,
        }
    }

    /// Handle one request line at wall-clock `now`.
    ///
    /// A malformed request yields `None` (logged, no response). A store
    /// failure also yields `None` — the client never sees partial data.
    pub async fn handle_line(&self, line: &str, now: i64) -> Option<String> {
        let request: SyncTradesRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "malformed sync-trades request");
                return None;
            }
        };
        let (since, until) =
            clamp_to_retention(request.since, request.until, now, self.retention_months);
        let limit = if request.limit == 0 {
            DEFAULT_SYNC_LIMIT
        } else {
            request.limit
        };
        match self.source.trades_between(since, until, limit).await {
            Ok(trades) => {
                info!(count = trades.len(), since, until, "sync-trades served");
                let response = SyncTradesResponse { trades };
                serde_json::to_string(&response).ok()
            }
            Err(e) => {
                warn!(error = %e, "sync-trades query failed");
                None
            }
        }
    }
}

/// Client half: decode one response line.
pub fn parse_response(line: &str) -> Result<Vec<Trade>, serde_json::Error> {
    serde_json::from_str::<SyncTradesResponse>(line).map(|r| r.trades)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct FixedSource {
        calls: Mutex<Vec<(i64, i64, usize)>>,
        trades: Vec<Trade>,
    }

    #[async_trait]
    impl TradeSource for FixedSource {
        async fn trades_between(
            &self,
            since: i64,
            until: i64,
            limit: usize,
        ) -> Result<Vec<Trade>, StoreError> {
            self.calls.lock().unwrap().push((since, until, limit));
            Ok(self.trades.clone())
        }
    }

    fn trade(id: &str, ts: i64) -> Trade {
        Trade {
            trade_id: id.into(),
            pair: "TKA/TKB".into(),
            taker_order_id: String::new(),
            maker_order_id: String::new(),
            maker: String::new(),
            taker: String::new(),
            token_in: String::new(),
            token_out: String::new(),
            amount_in: Decimal::ZERO,
            amount_out: Decimal::ZERO,
            price: dec!(1),
            amount: dec!(2),
            fee: Decimal::ZERO,
            timestamp: ts,
            tx_hash: String::new(),
        }
    }

    #[tokio::test]
    async fn test_request_clamped_to_retention() {
        let source = FixedSource {
            calls: Mutex::new(Vec::new()),
            trades: vec![trade("t1", 500)],
        };
        let server = SyncServer::new(source, 0);
        let now = 100 * 24 * 3600;
        let line = serde_json::to_string(&SyncTradesRequest {
            since: 0,
            until: now + 10_000,
            limit: 0,
        })
        .unwrap();

        let response = server.handle_line(&line, now).await.unwrap();
        let trades = parse_response(&response).unwrap();
        assert_eq!(trades.len(), 1);

        let calls = server.source.calls.lock().unwrap();
        let (since, until, limit) = calls[0];
        assert_eq!(since, now - store::retention_window_secs(0));
        assert_eq!(until, now);
        assert_eq!(limit, DEFAULT_SYNC_LIMIT);
    }

    #[tokio::test]
    async fn test_malformed_request_gets_no_response() {
        let source = FixedSource {
            calls: Mutex::new(Vec::new()),
            trades: vec![],
        };
        let server = SyncServer::new(source, 0);
        assert!(server.handle_line("not json", 1_000).await.is_none());
        assert!(server.source.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_yields_no_partial_data() {
        struct FailingSource;
        #[async_trait]
        impl TradeSource for FailingSource {
            async fn trades_between(
                &self,
                _: i64,
                _: i64,
                _: usize,
            ) -> Result<Vec<Trade>, StoreError> {
                Err(StoreError::TransientIo("busy".into()))
            }
        }
        let server = SyncServer::new(FailingSource, 0);
        let line = r#"{"since":0,"until":100}"#;
        assert!(server.handle_line(line, 1_000).await.is_none());
    }

    #[test]
    fn test_request_wire_shape() {
        let req = SyncTradesRequest {
            since: 1,
            until: 2,
            limit: 0,
        };
        assert_eq!(serde_json::to_string(&req).unwrap(), r#"{"since":1,"until":2}"#);
        let with_limit: SyncTradesRequest =
            serde_json::from_str(r#"{"since":1,"until":2,"limit":5}"#).unwrap();
        assert_eq!(with_limit.limit, 5);
    }
}
