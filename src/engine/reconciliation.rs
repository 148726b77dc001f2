//! Reconciliation engine
//!
//! Compares a pocket's target composition (scaled by the client's lot size)
//! against the client's actual holdings and produces the buy requirements
//! plus the action classification (none / repair / rebalance).
//!
//! Purely read/compute: no ledger writes, safe to call repeatedly.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{BuyRequirement, PocketDefinition, RequiredAction};
use crate::engine::traits::{BrokerGateway, PocketCatalog};
use crate::error::Result;

/// Outcome of one reconciliation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementsReport {
    pub pocket_id: String,
    pub action: RequiredAction,
    pub requirements: Vec<BuyRequirement>,
    /// The catalog's current definition version at the time of the run
    pub definition_version: i32,
    pub message: String,
}

pub struct ReconciliationEngine {
    catalog: Arc<dyn PocketCatalog>,
    broker: Arc<dyn BrokerGateway>,
}

impl ReconciliationEngine {
    pub fn new(catalog: Arc<dyn PocketCatalog>, broker: Arc<dyn BrokerGateway>) -> Self {
        Self { catalog, broker }
    }

    /// Compute what the client still needs to buy for `pocket_id` to match
    /// `qty_per_lot * user_lot_size` per constituent, and classify the
    /// required action against `user_version`.
    pub async fn compute_requirements(
        &self,
        client_id: &str,
        pocket_id: &str,
        user_version: i32,
        user_lot_size: i64,
    ) -> Result<RequirementsReport> {
        let definition = self.catalog.latest(pocket_id).await?;
        let actual = self.actual_holdings(client_id).await?;

        let requirements = shortfalls(&definition, &actual, user_lot_size);

        let action = if definition.version != user_version {
            RequiredAction::Rebalance
        } else if !requirements.is_empty() {
            RequiredAction::Repair
        } else {
            RequiredAction::None
        };

        let message = match action {
            RequiredAction::None => format!("pocket {} matches its composition", pocket_id),
            RequiredAction::Repair => format!(
                "pocket {} drifted from version {}: {} instrument(s) short",
                pocket_id,
                user_version,
                requirements.len()
            ),
            RequiredAction::Rebalance => format!(
                "pocket {} definition moved from version {} to {}",
                pocket_id, user_version, definition.version
            ),
        };

        debug!(
            client_id,
            pocket_id,
            action = %action,
            requirements = requirements.len(),
            "reconciliation computed"
        );

        Ok(RequirementsReport {
            pocket_id: pocket_id.to_string(),
            action,
            requirements,
            definition_version: definition.version,
            message,
        })
    }

    /// Actual holdings per instrument: net open positions (only when
    /// positive) plus demat quantities, summed when an instrument appears in
    /// both sources.
    pub(crate) async fn actual_holdings(&self, client_id: &str) -> Result<HashMap<i64, i64>> {
        let positions = self.broker.positions(client_id).await?;
        let demat = self.broker.demat_holdings(client_id).await?;

        let mut actual: HashMap<i64, i64> = HashMap::new();
        for position in &positions {
            let net = position.net_open();
            if net > 0 {
                *actual.entry(position.instrument_token).or_insert(0) += net;
            }
        }
        for holding in &demat {
            *actual.entry(holding.instrument_token).or_insert(0) += holding.qty;
        }

        Ok(actual)
    }
}

/// Per-constituent shortfall against `qty_per_lot * lot_size`.
///
/// Instruments absent from `actual` contribute their full target; partial
/// holdings contribute the remainder. Never yields a zero or negative
/// requirement.
fn shortfalls(
    definition: &PocketDefinition,
    actual: &HashMap<i64, i64>,
    lot_size: i64,
) -> Vec<BuyRequirement> {
    let mut requirements = Vec::new();
    for constituent in &definition.constituents {
        let target = constituent.target_qty(lot_size);
        let held = actual.get(&constituent.instrument_token).copied().unwrap_or(0);
        let shortfall = target - held;
        if shortfall > 0 {
            requirements.push(BuyRequirement {
                instrument_token: constituent.instrument_token,
                exchange: constituent.exchange.clone(),
                trading_symbol: constituent.trading_symbol.clone(),
                qty: shortfall,
            });
        }
    }
    requirements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PocketConstituent;
    use crate::engine::testutil::{FakeBroker, FakeCatalog};

    fn constituent(token: i64, symbol: &str, qty_per_lot: i64) -> PocketConstituent {
        PocketConstituent {
            instrument_token: token,
            exchange: "NSE".to_string(),
            trading_symbol: symbol.to_string(),
            qty_per_lot,
        }
    }

    fn definition(version: i32, constituents: Vec<PocketConstituent>) -> PocketDefinition {
        PocketDefinition {
            pocket_id: "P1".to_string(),
            version,
            constituents,
        }
    }

    fn engine(catalog: Arc<FakeCatalog>, broker: Arc<FakeBroker>) -> ReconciliationEngine {
        ReconciliationEngine::new(catalog, broker)
    }

    #[test]
    fn shortfall_is_target_minus_actual() {
        // qty_per_lot=10, lot_size=3 -> target 30; held 12 -> requirement 18
        let def = definition(1, vec![constituent(100, "INFY", 10)]);
        let actual = HashMap::from([(100, 12)]);
        let reqs = shortfalls(&def, &actual, 3);
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].qty, 18);
    }

    #[test]
    fn absent_instrument_requires_full_target() {
        let def = definition(1, vec![constituent(100, "INFY", 5)]);
        let reqs = shortfalls(&def, &HashMap::new(), 2);
        assert_eq!(reqs[0].qty, 10);
    }

    #[test]
    fn surplus_produces_no_requirement() {
        let def = definition(1, vec![constituent(100, "INFY", 5)]);
        let actual = HashMap::from([(100, 50)]);
        assert!(shortfalls(&def, &actual, 2).is_empty());
    }

    #[tokio::test]
    async fn classifies_repair_when_version_matches_and_short() {
        let catalog = Arc::new(FakeCatalog::with(definition(
            1,
            vec![constituent(100, "INFY", 10)],
        )));
        let broker = Arc::new(FakeBroker::new());
        broker.set_demat(vec![(100, "INFY", 12)]);

        let report = engine(catalog, broker)
            .compute_requirements("C1", "P1", 1, 3)
            .await
            .unwrap();

        assert_eq!(report.action, RequiredAction::Repair);
        assert_eq!(report.requirements[0].qty, 18);
    }

    #[tokio::test]
    async fn classifies_rebalance_on_version_mismatch() {
        // Client traded into version 1; catalog now carries version 2 with an
        // added constituent whose full target must be bought.
        let catalog = Arc::new(FakeCatalog::with(definition(
            2,
            vec![constituent(100, "INFY", 10), constituent(200, "TCS", 4)],
        )));
        let broker = Arc::new(FakeBroker::new());
        broker.set_demat(vec![(100, "INFY", 50)]);

        let report = engine(catalog, broker)
            .compute_requirements("C1", "P1", 1, 5)
            .await
            .unwrap();

        assert_eq!(report.action, RequiredAction::Rebalance);
        assert_eq!(report.requirements.len(), 1);
        assert_eq!(report.requirements[0].instrument_token, 200);
        assert_eq!(report.requirements[0].qty, 20);
    }

    #[tokio::test]
    async fn classifies_none_when_aligned() {
        let catalog = Arc::new(FakeCatalog::with(definition(
            3,
            vec![constituent(100, "INFY", 10)],
        )));
        let broker = Arc::new(FakeBroker::new());
        broker.set_demat(vec![(100, "INFY", 30)]);

        let report = engine(catalog, broker)
            .compute_requirements("C1", "P1", 3, 3)
            .await
            .unwrap();

        assert_eq!(report.action, RequiredAction::None);
        assert!(report.requirements.is_empty());
    }

    #[tokio::test]
    async fn sums_positions_and_demat_and_ignores_net_short() {
        let catalog = Arc::new(FakeCatalog::with(definition(
            1,
            vec![constituent(100, "INFY", 10), constituent(200, "TCS", 10)],
        )));
        let broker = Arc::new(FakeBroker::new());
        // token 100: net open 8 + demat 12 = 20; token 200: net short, ignored
        broker.set_positions(vec![(100, "INFY", 12, 4), (200, "TCS", 3, 9)]);
        broker.set_demat(vec![(100, "INFY", 12)]);

        let report = engine(catalog, broker)
            .compute_requirements("C1", "P1", 1, 3)
            .await
            .unwrap();

        let infy = report
            .requirements
            .iter()
            .find(|r| r.instrument_token == 100)
            .unwrap();
        let tcs = report
            .requirements
            .iter()
            .find(|r| r.instrument_token == 200)
            .unwrap();
        assert_eq!(infy.qty, 10); // 30 - 20
        assert_eq!(tcs.qty, 30); // full target
    }

    #[tokio::test]
    async fn repeated_calls_yield_identical_requirements() {
        let catalog = Arc::new(FakeCatalog::with(definition(
            1,
            vec![constituent(100, "INFY", 10)],
        )));
        let broker = Arc::new(FakeBroker::new());
        broker.set_demat(vec![(100, "INFY", 7)]);
        let engine = engine(catalog, broker);

        let first = engine
            .compute_requirements("C1", "P1", 1, 2)
            .await
            .unwrap();
        let second = engine
            .compute_requirements("C1", "P1", 1, 2)
            .await
            .unwrap();

        assert_eq!(first.requirements, second.requirements);
        assert_eq!(first.action, second.action);
    }
}
