//! Trade execution seam.
//!
//! The engine never talks to an exchange directly: it builds a
//! [`TradeRequest`], resolves a credential handle, and hands both to a
//! [`TradeExecutor`]. Retries are the executor's concern.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::info;

use crate::models::{MarketKind, TradeSide};

/// Opaque reference to an active API credential for a follower's market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialHandle {
    pub id: String,
    pub label: String,
}

/// One order the engine wants executed on behalf of a follower.
#[derive(Debug, Clone)]
pub struct TradeRequest {
    pub follower_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub market: MarketKind,
    pub position_size: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub leverage: Decimal,
    pub credential: CredentialHandle,
}

/// What the executor reported back.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub trade_id: Option<String>,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn success(trade_id: impl Into<String>) -> Self {
        Self {
            success: true,
            trade_id: Some(trade_id.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            trade_id: None,
            error: Some(error.into()),
        }
    }
}

/// External trade-execution collaborator.
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn execute(&self, request: &TradeRequest) -> Result<ExecutionOutcome>;
}

/// Resolves an active credential for a follower on a given market.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(
        &self,
        follower_id: &str,
        market: MarketKind,
    ) -> Result<Option<CredentialHandle>>;
}

/// Executor that records and acknowledges orders without touching an
/// exchange. Symbols listed in `failing_symbols` report a rejection, which
/// exercises the FAILED path in tests and simulations.
#[derive(Default)]
pub struct SimulatedExecutor {
    failing_symbols: Vec<String>,
    executed: Mutex<Vec<TradeRequest>>,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(symbols: Vec<String>) -> Self {
        Self {
            failing_symbols: symbols,
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Orders accepted so far.
    pub async fn executed_requests(&self) -> Vec<TradeRequest> {
        self.executed.lock().await.clone()
    }
}

#[async_trait]
impl TradeExecutor for SimulatedExecutor {
    async fn execute(&self, request: &TradeRequest) -> Result<ExecutionOutcome> {
        if self.failing_symbols.iter().any(|s| s == &request.symbol) {
            return Ok(ExecutionOutcome::failure(format!(
                "Order rejected for {}",
                request.symbol
            )));
        }

        info!(
            follower = %request.follower_id,
            symbol = %request.symbol,
            side = %request.side.as_str(),
            size = %request.position_size,
            leverage = %request.leverage,
            "[SIMULATED] Executed order"
        );

        self.executed.lock().await.push(request.clone());
        Ok(ExecutionOutcome::success(uuid::Uuid::new_v4().to_string()))
    }
}

/// Credential resolver backed by a fixed map, for tests and simulation.
#[derive(Default)]
pub struct StaticCredentials {
    handles: HashMap<String, CredentialHandle>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_follower(mut self, follower_id: impl Into<String>) -> Self {
        let follower_id = follower_id.into();
        self.handles.insert(
            follower_id.clone(),
            CredentialHandle {
                id: uuid::Uuid::new_v4().to_string(),
                label: format!("key-{follower_id}"),
            },
        );
        self
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentials {
    async fn resolve(
        &self,
        follower_id: &str,
        _market: MarketKind,
    ) -> Result<Option<CredentialHandle>> {
        Ok(self.handles.get(follower_id).cloned())
    }
}
