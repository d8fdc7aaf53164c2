//! In-memory data sources and ledger for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::{AnalyzerError, Result};
use crate::ledger::{LedgerGateway, ProcessorCall, Receipt, ReceiptStatus};
use crate::sources::{
    AccountTx, ChainExplorer, DataSources, RateSample, RateSource, RatingSource, TokenTransfer,
};
use crate::types::{OrderState, RatingSnapshot};

pub const PAYMENT_TX: &str = "0xpayment";
pub const WRITE_METHOD: &str = "writeTxData";

pub fn rating_snapshot(cfr: f64, price: f64) -> RatingSnapshot {
    RatingSnapshot {
        cfr_currency: "USD".to_string(),
        cfr,
        ico_start_date: "01 Jan 2018".to_string(),
        ico_end_date: "31 Jan 2018".to_string(),
        ico_price_cur: "USD".to_string(),
        ico_price: price,
        ico_price_adjusted: 0.0,
    }
}

pub fn transfer(from: &str, value: &str, ts: i64) -> TokenTransfer {
    TokenTransfer {
        time_stamp: ts.to_string(),
        hash: format!("0x{ts:x}"),
        from: from.to_string(),
        to: "0xbuyer".to_string(),
        value: value.to_string(),
    }
}

pub fn account_tx(from: &str, to: &str, value: &str, errored: bool) -> AccountTx {
    AccountTx {
        time_stamp: "0".to_string(),
        hash: String::new(),
        from: from.to_string(),
        to: to.to_string(),
        value: value.to_string(),
        is_error: if errored { "1" } else { "0" }.to_string(),
    }
}

pub fn sources(rating: RatingSnapshot, rates: Vec<f64>, explorer: FakeExplorer) -> DataSources {
    DataSources {
        rating: Arc::new(FakeRating(rating)),
        rates: Arc::new(FakeRates(rates)),
        explorer: Arc::new(explorer),
    }
}

pub struct FakeRating(pub RatingSnapshot);

#[async_trait]
impl RatingSource for FakeRating {
    async fn snapshot(&self, _ico_name: &str) -> Result<RatingSnapshot> {
        Ok(self.0.clone())
    }
}

pub struct FailingRating;

#[async_trait]
impl RatingSource for FailingRating {
    async fn snapshot(&self, ico_name: &str) -> Result<RatingSnapshot> {
        Err(AnalyzerError::UnknownOffering(ico_name.to_string()))
    }
}

pub struct FakeRates(pub Vec<f64>);

#[async_trait]
impl RateSource for FakeRates {
    async fn samples(&self, start: i64, _end: i64) -> Result<Vec<RateSample>> {
        Ok(self
            .0
            .iter()
            .enumerate()
            .map(|(i, rate)| RateSample {
                date: start + i as i64 * 7_200,
                weighted_average: *rate,
            })
            .collect())
    }
}

#[derive(Default)]
pub struct FakeExplorer {
    pub transfers: Vec<TokenTransfer>,
    pub external: HashMap<String, Vec<AccountTx>>,
    pub internal: HashMap<String, Vec<AccountTx>>,
    pub balances: HashMap<String, String>,
    pub fail_balance: bool,
}

fn page_of<T: Clone>(items: &[T], page: u32, page_size: u32) -> Vec<T> {
    items
        .iter()
        .skip((page as usize - 1) * page_size as usize)
        .take(page_size as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl ChainExplorer for FakeExplorer {
    async fn external_txs(&self, address: &str, page: u32, page_size: u32) -> Result<Vec<AccountTx>> {
        let txs = self.external.get(address).cloned().unwrap_or_default();
        Ok(page_of(&txs, page, page_size))
    }

    async fn internal_txs(&self, address: &str, page: u32, page_size: u32) -> Result<Vec<AccountTx>> {
        let txs = self.internal.get(address).cloned().unwrap_or_default();
        Ok(page_of(&txs, page, page_size))
    }

    async fn token_transfers(
        &self,
        _token: &str,
        holder: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<TokenTransfer>> {
        let matching: Vec<TokenTransfer> = self
            .transfers
            .iter()
            .filter(|t| holder.map_or(true, |h| t.from == h || t.to == h))
            .cloned()
            .collect();
        Ok(page_of(&matching, page, page_size))
    }

    async fn balance(&self, address: &str) -> Result<String> {
        if self.fail_balance {
            return Err(AnalyzerError::Adapter("balance lookup unavailable".to_string()));
        }
        Ok(self
            .balances
            .get(address)
            .cloned()
            .unwrap_or_else(|| "0".to_string()))
    }
}

/// A mutating call the fake ledger accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerCall {
    Processor(ProcessorCall),
    Write { passport: String, payload: Vec<u8> },
}

impl LedgerCall {
    pub fn method(&self) -> &'static str {
        match self {
            Self::Processor(call) => call.method(),
            Self::Write { .. } => WRITE_METHOD,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ReceiptPlan {
    ConfirmAfter(u64),
    Fail,
    Pending,
}

#[derive(Default)]
struct LedgerState {
    order_state: Option<OrderState>,
    calls: Vec<LedgerCall>,
    plans: HashMap<String, ReceiptPlan>,
    method_plans: HashMap<&'static str, ReceiptPlan>,
    polls: HashMap<String, u64>,
    tx_methods: HashMap<String, &'static str>,
    rejected: HashSet<&'static str>,
    cancel_on_confirm: Option<(&'static str, CancellationToken)>,
    cancel_on_poll: Option<(&'static str, CancellationToken)>,
    receipt_delay: Option<Duration>,
    order_state_delay: Option<Duration>,
}

/// Ledger that confirms everything on the first poll unless told otherwise.
#[derive(Default)]
pub struct FakeLedger {
    state: Mutex<LedgerState>,
}

impl FakeLedger {
    /// Order in `state`; the inbound payment confirms on first poll.
    pub fn with_order(state: OrderState) -> Self {
        let ledger = Self::default();
        {
            let mut s = ledger.state.lock().unwrap();
            s.order_state = Some(state);
            s.plans
                .insert(PAYMENT_TX.to_string(), ReceiptPlan::ConfirmAfter(1));
        }
        ledger
    }

    pub fn paid() -> Self {
        Self::with_order(OrderState::Paid)
    }

    /// Order-state lookups fail.
    pub fn unreachable() -> Self {
        let ledger = Self::paid();
        ledger.state.lock().unwrap().order_state = None;
        ledger
    }

    pub fn confirm_after(&self, tx_hash: &str, polls: u64) {
        self.state
            .lock()
            .unwrap()
            .plans
            .insert(tx_hash.to_string(), ReceiptPlan::ConfirmAfter(polls));
    }

    pub fn fail_tx(&self, tx_hash: &str) {
        self.state
            .lock()
            .unwrap()
            .plans
            .insert(tx_hash.to_string(), ReceiptPlan::Fail);
    }

    /// Transactions submitted through `method` revert.
    pub fn revert_method(&self, method: &'static str) {
        self.state
            .lock()
            .unwrap()
            .method_plans
            .insert(method, ReceiptPlan::Fail);
    }

    /// Submissions through `method` are rejected outright.
    pub fn reject_method(&self, method: &'static str) {
        self.state.lock().unwrap().rejected.insert(method);
    }

    /// Cancel `token` once the transaction submitted through `method` confirms.
    pub fn cancel_after_confirm(&self, method: &'static str, token: CancellationToken) {
        self.state.lock().unwrap().cancel_on_confirm = Some((method, token));
    }

    /// Leave `method`'s transaction pending and cancel `token` when it is polled.
    pub fn cancel_while_pending(&self, method: &'static str, token: CancellationToken) {
        let mut s = self.state.lock().unwrap();
        s.method_plans.insert(method, ReceiptPlan::Pending);
        s.cancel_on_poll = Some((method, token));
    }

    /// Every receipt read takes `delay` before answering.
    pub fn slow_receipts(&self, delay: Duration) {
        self.state.lock().unwrap().receipt_delay = Some(delay);
    }

    /// Order-state lookups take `delay` before answering.
    pub fn slow_order_lookup(&self, delay: Duration) {
        self.state.lock().unwrap().order_state_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls().iter().filter(|c| c.method() == method).count()
    }

    pub fn receipt_polls(&self, tx_hash: &str) -> u64 {
        self.state
            .lock()
            .unwrap()
            .polls
            .get(tx_hash)
            .copied()
            .unwrap_or(0)
    }

    fn accept(&self, call: LedgerCall) -> Result<String> {
        let mut s = self.state.lock().unwrap();
        let method = call.method();
        if s.rejected.contains(method) {
            return Err(AnalyzerError::Submission(format!("{method} rejected")));
        }
        let hash = format!("0x{:02}{method}", s.calls.len());
        let plan = s
            .method_plans
            .get(method)
            .copied()
            .unwrap_or(ReceiptPlan::ConfirmAfter(1));
        s.plans.insert(hash.clone(), plan);
        s.tx_methods.insert(hash.clone(), method);
        s.calls.push(call);
        Ok(hash)
    }
}

#[async_trait]
impl LedgerGateway for FakeLedger {
    async fn submit_call(&self, call: &ProcessorCall, _gas_limit: u64) -> Result<String> {
        self.accept(LedgerCall::Processor(call.clone()))
    }

    async fn write_record(&self, passport: &str, _key: [u8; 32], payload: &[u8]) -> Result<String> {
        self.accept(LedgerCall::Write {
            passport: passport.to_string(),
            payload: payload.to_vec(),
        })
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<Receipt>> {
        let delay = self.state.lock().unwrap().receipt_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut s = self.state.lock().unwrap();
        let polls = {
            let n = s.polls.entry(tx_hash.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        let method = s.tx_methods.get(tx_hash).copied();
        let plan = s
            .plans
            .get(tx_hash)
            .copied()
            .unwrap_or(ReceiptPlan::Pending);
        let receipt = |status| Receipt {
            tx_hash: tx_hash.to_string(),
            status,
            block_number: Some(polls),
        };
        match plan {
            ReceiptPlan::ConfirmAfter(n) if polls >= n => {
                if let Some((m, token)) = &s.cancel_on_confirm {
                    if method == Some(*m) {
                        token.cancel();
                    }
                }
                Ok(Some(receipt(ReceiptStatus::Success)))
            }
            ReceiptPlan::Fail => Ok(Some(receipt(ReceiptStatus::Failed))),
            ReceiptPlan::ConfirmAfter(_) | ReceiptPlan::Pending => {
                if let Some((m, token)) = &s.cancel_on_poll {
                    if method == Some(*m) {
                        token.cancel();
                    }
                }
                Ok(None)
            }
        }
    }

    async fn order_state(&self, order_id: i64) -> Result<OrderState> {
        let delay = self.state.lock().unwrap().order_state_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state
            .lock()
            .unwrap()
            .order_state
            .ok_or_else(|| AnalyzerError::Adapter(format!("order {order_id} lookup failed")))
    }
}
