//! In-memory fakes of the consumed interfaces, shared by the engine tests.
//!
//! The fake broker is scripted per instrument token: each placed order is
//! remembered, and the completed-order feed is synthesized from the scripted
//! completion plan. Tokens without a plan never show up in the feed, which is
//! exactly the unresolved-order case.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{
    BrokerCompletedOrder, BrokerOrderStatus, BrokerPosition, DematHolding, HeldPocket,
    HoldingsRecord, OrderInstruction, PlacedOrder, PocketDefinition, PocketTransaction,
};
use crate::engine::traits::{BrokerGateway, HoldingsLedger, PocketCatalog, TransactionLog};
use crate::error::{PocketError, Result};

// ==================== Catalog ====================

#[derive(Default)]
pub struct FakeCatalog {
    definitions: Mutex<HashMap<String, PocketDefinition>>,
    calls: AtomicUsize,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(definition: PocketDefinition) -> Self {
        let catalog = Self::new();
        catalog.insert(definition);
        catalog
    }

    pub fn insert(&self, definition: PocketDefinition) {
        self.definitions
            .lock()
            .unwrap()
            .insert(definition.pocket_id.clone(), definition);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PocketCatalog for FakeCatalog {
    async fn latest(&self, pocket_id: &str) -> Result<PocketDefinition> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.definitions
            .lock()
            .unwrap()
            .get(pocket_id)
            .cloned()
            .ok_or_else(|| PocketError::PocketNotFound(pocket_id.to_string()))
    }
}

// ==================== Broker ====================

#[derive(Clone)]
enum CompletionPlan {
    Complete(Decimal),
    Reject,
    Cancel,
    Status(String),
}

#[derive(Default)]
struct FakeBrokerState {
    positions: Vec<BrokerPosition>,
    demat: Vec<DematHolding>,
    placed: Vec<(String, OrderInstruction)>,
    plans: HashMap<i64, CompletionPlan>,
    foreign: Vec<BrokerCompletedOrder>,
    next_seq: usize,
    fail_place_on: Option<usize>,
}

#[derive(Default)]
pub struct FakeBroker {
    state: Mutex<FakeBrokerState>,
    place_calls: AtomicUsize,
    completed_calls: AtomicUsize,
    snapshot_calls: AtomicUsize,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_positions(&self, rows: Vec<(i64, &str, i64, i64)>) {
        self.state.lock().unwrap().positions = rows
            .into_iter()
            .map(|(token, symbol, buy_qty, sell_qty)| BrokerPosition {
                instrument_token: token,
                trading_symbol: symbol.to_string(),
                buy_qty,
                sell_qty,
            })
            .collect();
    }

    pub fn set_demat(&self, rows: Vec<(i64, &str, i64)>) {
        self.state.lock().unwrap().demat = rows
            .into_iter()
            .map(|(token, symbol, qty)| DematHolding {
                instrument_token: token,
                trading_symbol: symbol.to_string(),
                qty,
            })
            .collect();
    }

    /// Orders for this token settle COMPLETE at the given price
    pub fn complete_at(&self, token: i64, price: Decimal) {
        self.state
            .lock()
            .unwrap()
            .plans
            .insert(token, CompletionPlan::Complete(price));
    }

    pub fn reject(&self, token: i64) {
        self.state
            .lock()
            .unwrap()
            .plans
            .insert(token, CompletionPlan::Reject);
    }

    pub fn cancel(&self, token: i64) {
        self.state
            .lock()
            .unwrap()
            .plans
            .insert(token, CompletionPlan::Cancel);
    }

    /// Orders for this token show up in the feed with a raw status string
    pub fn report_status(&self, token: i64, raw: &str) {
        self.state
            .lock()
            .unwrap()
            .plans
            .insert(token, CompletionPlan::Status(raw.to_string()));
    }

    /// Fail the nth placement call (1-based) with an upstream error
    pub fn fail_place_on(&self, nth: usize) {
        self.state.lock().unwrap().fail_place_on = Some(nth);
    }

    /// Add a feed entry whose order id was never placed by this invocation
    pub fn inject_foreign_completion(&self, order_id: &str, token: i64, price: Decimal, qty: i64) {
        self.state.lock().unwrap().foreign.push(BrokerCompletedOrder {
            order_id: order_id.to_string(),
            instrument_token: token,
            trading_symbol: format!("SYM{}", token),
            status: BrokerOrderStatus::Complete,
            price,
            qty,
        });
    }

    pub fn place_calls(&self) -> usize {
        self.place_calls.load(Ordering::SeqCst)
    }

    pub fn completed_calls(&self) -> usize {
        self.completed_calls.load(Ordering::SeqCst)
    }

    pub fn snapshot_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }

    pub fn placed_count(&self) -> usize {
        self.state.lock().unwrap().placed.len()
    }

    pub fn placed_instructions(&self) -> Vec<OrderInstruction> {
        self.state
            .lock()
            .unwrap()
            .placed
            .iter()
            .map(|(_, i)| i.clone())
            .collect()
    }
}

#[async_trait]
impl BrokerGateway for FakeBroker {
    async fn place_order(
        &self,
        _client_id: &str,
        instruction: &OrderInstruction,
    ) -> Result<PlacedOrder> {
        let call = self.place_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.lock().unwrap();

        if state.fail_place_on == Some(call) {
            return Err(PocketError::Upstream("simulated placement failure".to_string()));
        }

        state.next_seq += 1;
        let order_id = format!("ORD-{:04}", state.next_seq);
        state.placed.push((order_id.clone(), instruction.clone()));

        Ok(PlacedOrder {
            order_id,
            instrument_token: instruction.instrument_token,
            trading_symbol: instruction.trading_symbol.clone(),
        })
    }

    async fn completed_orders(&self, _client_id: &str) -> Result<Vec<BrokerCompletedOrder>> {
        self.completed_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();

        let mut feed: Vec<BrokerCompletedOrder> = state.foreign.clone();
        for (order_id, instruction) in &state.placed {
            let Some(plan) = state.plans.get(&instruction.instrument_token) else {
                continue;
            };
            let (status, price) = match plan {
                CompletionPlan::Complete(price) => (BrokerOrderStatus::Complete, *price),
                CompletionPlan::Reject => (BrokerOrderStatus::Rejected, Decimal::ZERO),
                CompletionPlan::Cancel => (BrokerOrderStatus::CancelConfirmed, Decimal::ZERO),
                CompletionPlan::Status(raw) => (BrokerOrderStatus::parse(raw), Decimal::ZERO),
            };
            feed.push(BrokerCompletedOrder {
                order_id: order_id.clone(),
                instrument_token: instruction.instrument_token,
                trading_symbol: instruction.trading_symbol.clone(),
                status,
                price,
                qty: instruction.qty,
            });
        }

        Ok(feed)
    }

    async fn positions(&self, _client_id: &str) -> Result<Vec<BrokerPosition>> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().unwrap().positions.clone())
    }

    async fn demat_holdings(&self, _client_id: &str) -> Result<Vec<DematHolding>> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().unwrap().demat.clone())
    }
}

// ==================== Ledger ====================

#[derive(Default)]
pub struct FakeLedger {
    records: Mutex<HashMap<String, HoldingsRecord>>,
    fail_next_upsert: Mutex<bool>,
    conflict_next_upsert: Mutex<bool>,
    upsert_calls: AtomicUsize,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, client_id: &str, pockets: Vec<HeldPocket>) {
        self.records.lock().unwrap().insert(
            client_id.to_string(),
            HoldingsRecord {
                client_id: client_id.to_string(),
                pockets,
                revision: 1,
            },
        );
    }

    pub fn record(&self, client_id: &str) -> Option<HoldingsRecord> {
        self.records.lock().unwrap().get(client_id).cloned()
    }

    pub fn fail_next_upsert(&self) {
        *self.fail_next_upsert.lock().unwrap() = true;
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Make the next upsert fail as if a concurrent writer won the race
    pub fn conflict_next_upsert(&self) {
        *self.conflict_next_upsert.lock().unwrap() = true;
    }
}

#[async_trait]
impl HoldingsLedger for FakeLedger {
    async fn get(&self, client_id: &str) -> Result<Option<HoldingsRecord>> {
        Ok(self.records.lock().unwrap().get(client_id).cloned())
    }

    async fn upsert(
        &self,
        client_id: &str,
        pockets: &[HeldPocket],
        expected_revision: Option<i64>,
    ) -> Result<i64> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);

        let mut fail = self.fail_next_upsert.lock().unwrap();
        if *fail {
            *fail = false;
            return Err(PocketError::Internal("ledger unavailable".to_string()));
        }
        drop(fail);

        let mut conflict = self.conflict_next_upsert.lock().unwrap();
        if *conflict {
            *conflict = false;
            return Err(PocketError::LedgerConflict(client_id.to_string()));
        }
        drop(conflict);

        let mut records = self.records.lock().unwrap();
        match (records.get_mut(client_id), expected_revision) {
            (None, None) => {
                records.insert(
                    client_id.to_string(),
                    HoldingsRecord {
                        client_id: client_id.to_string(),
                        pockets: pockets.to_vec(),
                        revision: 1,
                    },
                );
                Ok(1)
            }
            (Some(record), Some(revision)) if record.revision == revision => {
                record.pockets = pockets.to_vec();
                record.revision += 1;
                Ok(record.revision)
            }
            _ => Err(PocketError::LedgerConflict(client_id.to_string())),
        }
    }
}

// ==================== Transaction log ====================

#[derive(Default)]
pub struct FakeTransactionLog {
    entries: Mutex<Vec<PocketTransaction>>,
    fail: Mutex<bool>,
}

impl FakeTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<PocketTransaction> {
        self.entries.lock().unwrap().clone()
    }

    pub fn fail_appends(&self) {
        *self.fail.lock().unwrap() = true;
    }
}

#[async_trait]
impl TransactionLog for FakeTransactionLog {
    async fn append(&self, transaction: &PocketTransaction) -> Result<()> {
        if *self.fail.lock().unwrap() {
            return Err(PocketError::Internal("transaction log unavailable".to_string()));
        }
        self.entries.lock().unwrap().push(transaction.clone());
        Ok(())
    }
}
