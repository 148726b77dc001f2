use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::OrderLeg;

/// Direction of a logged pocket transaction.
///
/// Stored as its numeric code (bought=0, sold=1) in the transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Bought,
    Sold,
}

impl TransactionStatus {
    pub fn code(&self) -> i16 {
        match self {
            TransactionStatus::Bought => 0,
            TransactionStatus::Sold => 1,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(TransactionStatus::Bought),
            1 => Some(TransactionStatus::Sold),
            _ => None,
        }
    }
}

/// Workflow that produced a ledger or transaction-log effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PocketAction {
    Buy,
    Sell,
    /// Ledger-only sell shortcut; never appears in the transaction log
    Exit,
    Repair,
    Rebalance,
}

impl PocketAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PocketAction::Buy => "buy",
            PocketAction::Sell => "sell",
            PocketAction::Exit => "exit",
            PocketAction::Repair => "repair",
            PocketAction::Rebalance => "rebalance",
        }
    }
}

impl std::fmt::Display for PocketAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PocketAction {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(PocketAction::Buy),
            "sell" => Ok(PocketAction::Sell),
            "exit" => Ok(PocketAction::Exit),
            "repair" => Ok(PocketAction::Repair),
            "rebalance" => Ok(PocketAction::Rebalance),
            _ => Err("invalid action; expected buy|sell|exit|repair|rebalance"),
        }
    }
}

/// Append-only record of one completed workflow invocation that placed at
/// least one order. Created exactly once per invocation, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PocketTransaction {
    pub pocket_transaction_id: Uuid,
    pub client_id: String,
    pub pocket_id: String,
    pub transaction_status: TransactionStatus,
    pub lot_size: i64,
    pub action: PocketAction,
    /// Sum of price * qty over the completed legs only
    pub order_completed_price: Decimal,
    pub order_completed: Vec<OrderLeg>,
    pub order_cancelled: Vec<OrderLeg>,
    pub created_at: DateTime<Utc>,
}

impl PocketTransaction {
    pub fn new(
        client_id: &str,
        pocket_id: &str,
        action: PocketAction,
        transaction_status: TransactionStatus,
        lot_size: i64,
        order_completed_price: Decimal,
        order_completed: Vec<OrderLeg>,
        order_cancelled: Vec<OrderLeg>,
    ) -> Self {
        Self {
            pocket_transaction_id: Uuid::new_v4(),
            client_id: client_id.to_string(),
            pocket_id: pocket_id.to_string(),
            transaction_status,
            lot_size,
            action,
            order_completed_price,
            order_completed,
            order_cancelled,
            created_at: Utc::now(),
        }
    }
}
