use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

/// Order validity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderValidity {
    /// Immediate Or Cancel
    IOC,
    /// Valid for the trading day
    DAY,
}

/// One per-instrument order the orchestrator wants placed.
///
/// Pocket workflows only ever place MARKET/IOC orders; type and validity are
/// fixed at placement time, the product code by the account configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderInstruction {
    pub instrument_token: i64,
    pub exchange: String,
    pub trading_symbol: String,
    pub qty: i64,
    pub side: OrderSide,
}

/// Broker acknowledgement of a placed order.
///
/// Tracked only by id for the duration of one workflow invocation; never
/// persisted before completion polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub order_id: String,
    pub instrument_token: i64,
    pub trading_symbol: String,
}

/// Terminal (or unrecognized) status reported by the broker's completed-order
/// feed. Payloads are fully typed; unrecognized strings are carried verbatim
/// instead of being coerced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerOrderStatus {
    Complete,
    CancelConfirmed,
    Rejected,
    Unknown(String),
}

impl BrokerOrderStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "COMPLETE" => BrokerOrderStatus::Complete,
            "CANCEL_CONFIRMED" | "CANCELLED" => BrokerOrderStatus::CancelConfirmed,
            "REJECTED" => BrokerOrderStatus::Rejected,
            _ => BrokerOrderStatus::Unknown(raw.trim().to_string()),
        }
    }

    /// Whether the status maps into the cancelled bucket
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            BrokerOrderStatus::CancelConfirmed | BrokerOrderStatus::Rejected
        )
    }
}

/// One entry of the broker's recently-completed-order feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerCompletedOrder {
    pub order_id: String,
    pub instrument_token: i64,
    pub trading_symbol: String,
    pub status: BrokerOrderStatus,
    pub price: Decimal,
    pub qty: i64,
}

/// Net position snapshot entry (historical type)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub instrument_token: i64,
    pub trading_symbol: String,
    pub buy_qty: i64,
    pub sell_qty: i64,
}

impl BrokerPosition {
    /// Net open quantity; negative when the client is net short
    pub fn net_open(&self) -> i64 {
        self.buy_qty - self.sell_qty
    }
}

/// Demat holding entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DematHolding {
    pub instrument_token: i64,
    pub trading_symbol: String,
    pub qty: i64,
}

/// One leg of a settled workflow, as recorded in the transaction history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLeg {
    pub instrument_token: i64,
    pub exchange: String,
    pub trading_symbol: String,
    pub qty: i64,
    pub price: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_broker_status_recognizes_terminal_states() {
        assert_eq!(
            BrokerOrderStatus::parse("COMPLETE"),
            BrokerOrderStatus::Complete
        );
        assert_eq!(
            BrokerOrderStatus::parse("cancel_confirmed"),
            BrokerOrderStatus::CancelConfirmed
        );
        assert_eq!(
            BrokerOrderStatus::parse("REJECTED"),
            BrokerOrderStatus::Rejected
        );
    }

    #[test]
    fn parse_broker_status_keeps_unrecognized_verbatim() {
        assert_eq!(
            BrokerOrderStatus::parse("OPEN_PENDING"),
            BrokerOrderStatus::Unknown("OPEN_PENDING".to_string())
        );
        assert!(!BrokerOrderStatus::parse("OPEN_PENDING").is_cancelled());
    }

    #[test]
    fn net_open_subtracts_sells() {
        let position = BrokerPosition {
            instrument_token: 100,
            trading_symbol: "INFY".to_string(),
            buy_qty: 12,
            sell_qty: 4,
        };
        assert_eq!(position.net_open(), 8);
    }
}
