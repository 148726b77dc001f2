//! Order orchestrator
//!
//! Places one MARKET/IOC order per instruction against the broker, waits the
//! configured settle interval, then partitions the broker's completed-order
//! feed into completed and cancelled buckets.
//!
//! Placement is sequential in input order; the order of placement is the
//! tie-break for partial outcomes. There is no rollback: a placement failure
//! aborts the invocation but already-placed orders stand at the broker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::ExecutionConfig;
use crate::domain::{BrokerOrderStatus, OrderInstruction, OrderLeg};
use crate::engine::traits::BrokerGateway;
use crate::error::Result;

/// Partitioned result of one orchestration run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionOutcome {
    pub completed: Vec<OrderLeg>,
    pub cancelled: Vec<OrderLeg>,
    /// Placed order ids the broker's feed never resolved (absent, or carrying
    /// an unrecognized status). Kept out of both buckets; the broker may
    /// still have executed them.
    pub unresolved: Vec<String>,
    /// Sum of price * qty over the completed legs
    pub completed_notional: Decimal,
    pub orders_placed: usize,
}

impl ExecutionOutcome {
    /// A run that placed nothing — a legitimate no-op
    pub fn is_noop(&self) -> bool {
        self.orders_placed == 0
    }
}

pub struct OrderOrchestrator {
    broker: Arc<dyn BrokerGateway>,
    settle_interval: Duration,
}

impl OrderOrchestrator {
    pub fn new(broker: Arc<dyn BrokerGateway>, config: &ExecutionConfig) -> Self {
        Self {
            broker,
            settle_interval: Duration::from_secs(config.settle_interval_secs),
        }
    }

    /// Place every instruction and settle the batch against the broker's
    /// completed-order feed.
    pub async fn execute(
        &self,
        client_id: &str,
        instructions: &[OrderInstruction],
    ) -> Result<ExecutionOutcome> {
        if instructions.is_empty() {
            debug!(client_id, "no instructions; skipping placement");
            return Ok(ExecutionOutcome::default());
        }

        // order_id -> originating instruction, in placement order
        let mut placed: HashMap<String, &OrderInstruction> = HashMap::new();
        let mut placed_ids: Vec<String> = Vec::new();

        for instruction in instructions {
            match self.broker.place_order(client_id, instruction).await {
                Ok(order) => {
                    debug!(
                        client_id,
                        order_id = %order.order_id,
                        symbol = %instruction.trading_symbol,
                        qty = instruction.qty,
                        side = %instruction.side,
                        "order placed"
                    );
                    placed.insert(order.order_id.clone(), instruction);
                    placed_ids.push(order.order_id);
                }
                Err(e) => {
                    // No rollback of the orders already placed this run; the
                    // caller must treat the invocation as failed but possibly
                    // partially executed at the broker.
                    warn!(
                        client_id,
                        symbol = %instruction.trading_symbol,
                        placed = placed_ids.len(),
                        error = %e,
                        "placement failed; aborting batch without rollback"
                    );
                    return Err(e);
                }
            }
        }

        // IOC market orders are assumed terminal within the settle interval;
        // a single poll, no retries within this invocation.
        sleep(self.settle_interval).await;

        let report = self.broker.completed_orders(client_id).await?;
        let outcome = partition(&placed, &placed_ids, &report, instructions.len());

        if !outcome.unresolved.is_empty() {
            warn!(
                client_id,
                unresolved = ?outcome.unresolved,
                "placed orders missing from completed-order feed; \
                 excluded from both buckets, broker may still have executed them"
            );
        }

        info!(
            client_id,
            placed = outcome.orders_placed,
            completed = outcome.completed.len(),
            cancelled = outcome.cancelled.len(),
            unresolved = outcome.unresolved.len(),
            notional = %outcome.completed_notional,
            "batch settled"
        );

        Ok(outcome)
    }
}

fn partition(
    placed: &HashMap<String, &OrderInstruction>,
    placed_ids: &[String],
    report: &[crate::domain::BrokerCompletedOrder],
    orders_placed: usize,
) -> ExecutionOutcome {
    let mut outcome = ExecutionOutcome {
        orders_placed,
        ..ExecutionOutcome::default()
    };
    let mut resolved: Vec<&str> = Vec::new();

    for entry in report {
        let Some(instruction) = placed.get(&entry.order_id) else {
            // Not ours (or from an earlier invocation); the feed is shared.
            continue;
        };

        let leg = OrderLeg {
            instrument_token: entry.instrument_token,
            exchange: instruction.exchange.clone(),
            trading_symbol: entry.trading_symbol.clone(),
            qty: entry.qty,
            price: entry.price,
        };

        match &entry.status {
            BrokerOrderStatus::Complete => {
                outcome.completed_notional += entry.price * Decimal::from(entry.qty);
                outcome.completed.push(leg);
                resolved.push(entry.order_id.as_str());
            }
            status if status.is_cancelled() => {
                outcome.cancelled.push(leg);
                resolved.push(entry.order_id.as_str());
            }
            BrokerOrderStatus::Unknown(raw) => {
                warn!(
                    order_id = %entry.order_id,
                    status = %raw,
                    "unrecognized status in completed-order feed"
                );
            }
            _ => {}
        }
    }

    outcome.unresolved = placed_ids
        .iter()
        .filter(|id| !resolved.contains(&id.as_str()))
        .cloned()
        .collect();

    outcome
}
