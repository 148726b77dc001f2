use serde::{Deserialize, Serialize};

/// One instrument inside a pocket definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PocketConstituent {
    pub instrument_token: i64,
    pub exchange: String,
    pub trading_symbol: String,
    /// Quantity of this instrument per single lot of the pocket
    pub qty_per_lot: i64,
}

impl PocketConstituent {
    /// Target quantity for a holding of `lot_size` lots
    pub fn target_qty(&self, lot_size: i64) -> i64 {
        self.qty_per_lot * lot_size
    }
}

/// Admin-curated pocket definition, resolved from the catalog.
///
/// Immutable once read by a workflow invocation; workflows always re-read the
/// latest definition instead of caching it across calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PocketDefinition {
    pub pocket_id: String,
    /// Increases only when the admin changes the composition
    pub version: i32,
    pub constituents: Vec<PocketConstituent>,
}

/// A single pocket entry inside a client's holdings document.
///
/// `version` tracks the definition version the client last traded into, not
/// the current catalog head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeldPocket {
    pub pocket_id: String,
    pub version: i32,
    pub lot_size: i64,
}

/// Per-client holdings document with its storage revision.
///
/// The revision guards ledger writes: an upsert carries the revision it read
/// and fails on mismatch instead of overwriting a concurrent update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldingsRecord {
    pub client_id: String,
    pub pockets: Vec<HeldPocket>,
    pub revision: i64,
}

impl HoldingsRecord {
    pub fn pocket(&self, pocket_id: &str) -> Option<&HeldPocket> {
        self.pockets.iter().find(|p| p.pocket_id == pocket_id)
    }

    pub fn pocket_mut(&mut self, pocket_id: &str) -> Option<&mut HeldPocket> {
        self.pockets.iter_mut().find(|p| p.pocket_id == pocket_id)
    }

    /// Drop entries whose lot size reached zero
    pub fn prune(&mut self) {
        self.pockets.retain(|p| p.lot_size > 0);
    }
}

/// Quantity still needed to align actual holdings with the scaled target.
///
/// Always positive; computed fresh on every reconciliation call, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyRequirement {
    pub instrument_token: i64,
    pub exchange: String,
    pub trading_symbol: String,
    pub qty: i64,
}

/// Classification of what a reconciliation run asks the caller to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredAction {
    /// Holdings match the held version's intended composition
    None,
    /// Same definition version, but actual holdings drifted short
    Repair,
    /// The catalog carries a newer definition version than the holding
    Rebalance,
}

impl RequiredAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequiredAction::None => "none",
            RequiredAction::Repair => "repair",
            RequiredAction::Rebalance => "rebalance",
        }
    }
}

impl std::fmt::Display for RequiredAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_qty_scales_by_lot_size() {
        let constituent = PocketConstituent {
            instrument_token: 100,
            exchange: "NSE".to_string(),
            trading_symbol: "INFY".to_string(),
            qty_per_lot: 10,
        };
        assert_eq!(constituent.target_qty(3), 30);
    }

    #[test]
    fn prune_drops_zeroed_entries() {
        let mut record = HoldingsRecord {
            client_id: "C1".to_string(),
            pockets: vec![
                HeldPocket {
                    pocket_id: "P1".to_string(),
                    version: 1,
                    lot_size: 0,
                },
                HeldPocket {
                    pocket_id: "P2".to_string(),
                    version: 2,
                    lot_size: 4,
                },
            ],
            revision: 3,
        };
        record.prune();
        assert_eq!(record.pockets.len(), 1);
        assert_eq!(record.pockets[0].pocket_id, "P2");
    }
}
