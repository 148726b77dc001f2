use async_trait::async_trait;

use crate::domain::{
    BrokerCompletedOrder, BrokerPosition, DematHolding, HeldPocket, HoldingsRecord,
    OrderInstruction, PlacedOrder, PocketDefinition, PocketTransaction,
};
use crate::error::Result;

/// Read-only resolver for admin-curated pocket definitions
#[async_trait]
pub trait PocketCatalog: Send + Sync {
    /// Latest definition for a pocket; `PocketNotFound` when the id is unknown
    async fn latest(&self, pocket_id: &str) -> Result<PocketDefinition>;
}

/// External broker system. Placement is asynchronous: a placed order has no
/// guaranteed terminal status until it shows up in the completed-order feed.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    async fn place_order(
        &self,
        client_id: &str,
        instruction: &OrderInstruction,
    ) -> Result<PlacedOrder>;

    /// Recently completed/cancelled orders for a client. The feed has a
    /// short, not-guaranteed window of visibility.
    async fn completed_orders(&self, client_id: &str) -> Result<Vec<BrokerCompletedOrder>>;

    /// Position snapshot, historical type
    async fn positions(&self, client_id: &str) -> Result<Vec<BrokerPosition>>;

    async fn demat_holdings(&self, client_id: &str) -> Result<Vec<DematHolding>>;
}

/// Durable per-client record of owned pockets
#[async_trait]
pub trait HoldingsLedger: Send + Sync {
    async fn get(&self, client_id: &str) -> Result<Option<HoldingsRecord>>;

    /// Write the client's pockets document.
    ///
    /// `expected_revision` is the revision the caller read (`None` for a
    /// brand-new client). A mismatch fails with `LedgerConflict` instead of
    /// overwriting a concurrent update. Returns the new revision.
    async fn upsert(
        &self,
        client_id: &str,
        pockets: &[HeldPocket],
        expected_revision: Option<i64>,
    ) -> Result<i64>;
}

/// Append-only history of purchase/sale/repair/rebalance outcomes
#[async_trait]
pub trait TransactionLog: Send + Sync {
    async fn append(&self, transaction: &PocketTransaction) -> Result<()>;
}
