//! Reconciliation engine: cross-checks the claimed raise of an offering
//! against the token supply it distributed and the inflow its wallet saw.
//!
//! A check fails only on an apparent shortfall larger than the tolerance
//! band; surpluses always pass.

use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::errors::{AnalyzerError, Result};
use crate::sources::{
    parse_f64, parse_i64, AccountTx, DataSources, RateSample, TokenTransfer, MAX_PAGE_SIZE,
    VOTE_PAGE_SIZE,
};
use crate::types::{
    date_to_unix, format_date, unix_to_date, DistributionMetrics, IcoMetadata, MarketSnapshot,
    PriorCalculation, RatingSnapshot, ReconciliationResult, TokenCheck, Verdict, WalletCheck,
};

/// Tolerance floor for analyses no human has verified yet.
pub const FRESH_RUN_CONFIDENCE: f64 = 0.1;

const WEI_PER_ETH: f64 = 1e18;

/// Caller-supplied figures for a re-verification run.
#[derive(Debug, Clone)]
pub struct Prior {
    pub rating: RatingSnapshot,
    pub calculated: PriorCalculation,
}

/// Tokens distributed by the issuer and the window they went out in.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenDistribution {
    pub issuer: String,
    pub tokens: f64,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Copy)]
enum TxKind {
    External,
    Internal,
}

pub struct Reconciler {
    sources: DataSources,
    page_size: u32,
}

impl Reconciler {
    pub fn new(sources: DataSources) -> Self {
        Self {
            sources,
            page_size: MAX_PAGE_SIZE,
        }
    }

    #[cfg(test)]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Run the full reconciliation for `metadata`, filling in the fields it
    /// derives. Any failure aborts the run; there is no partial result.
    pub async fn reconcile(
        &self,
        metadata: &mut IcoMetadata,
        prior: Option<Prior>,
    ) -> Result<(ReconciliationResult, RatingSnapshot)> {
        let (mut rating, tokens_issued, window) = if metadata.is_reverification() {
            let prior = prior.ok_or_else(|| {
                AnalyzerError::InvalidInput(
                    "re-verification requires the prior ico_info snapshot".to_string(),
                )
            })?;
            debug!(ico = %metadata.ico_name, "Re-verifying caller-supplied figures");
            let window = (
                prior.calculated.metrics.distribution_start_from_ico_start,
                prior.calculated.metrics.distribution_end_from_ico_end,
            );
            (prior.rating, prior.calculated.tokens_issued, window)
        } else {
            let rating = self.sources.rating.snapshot(&metadata.ico_name).await?;
            let distribution = self
                .token_distribution(
                    &metadata.token_contract_address.to_lowercase(),
                    metadata.decimals,
                    rating.end_date()?,
                )
                .await?;
            metadata.token_issuer_address = distribution.issuer;
            metadata.confidence = FRESH_RUN_CONFIDENCE;
            metadata.eth_nominated = true;
            metadata.token_tx_input_adjustment = false;
            (
                rating,
                distribution.tokens as i64,
                (distribution.start, distribution.end),
            )
        };

        let ico_start = rating.start_date()?;
        let ico_end = rating.end_date()?;
        if rating.cfr == 0.0 {
            return Err(AnalyzerError::InvalidNumber {
                field: "cfr",
                value: rating.cfr.to_string(),
            });
        }

        let market = self.market_snapshot(ico_start, ico_end).await?;
        rating.ico_price_adjusted = adjusted_price(rating.ico_price, &market);
        let band = tolerance_band(&market, metadata.confidence);
        let token_check = token_check(tokens_issued, &rating, band);

        let (declared, owner_is_wallet) = declared_fund_address(metadata);
        if declared.is_empty() {
            return Err(AnalyzerError::InvalidInput(
                "neither owner nor crowdsale address supplied".to_string(),
            ));
        }
        metadata.owner_is_ico_wallet = owner_is_wallet;
        let declared = declared.to_lowercase();

        let (inflow, tx_count) = self.account_inflow(&declared).await?;
        let (fund_address, fund_balance) = self.resolve_fund(&declared).await?;
        metadata.fund_address = fund_address;

        let best_rate = market.rate_end.max(market.rate_start);
        let efr_ico_tx = inflow * best_rate;
        let wallet_diff = relative_diff(efr_ico_tx, rating.cfr);

        let result = ReconciliationResult {
            tokens_issued,
            efr_token: tokens_issued as f64 * rating.ico_price,
            eth_rate_start: market.rate_start,
            eth_rate_end: market.rate_end,
            efr_token_adjusted: tokens_issued as f64 * rating.ico_price_adjusted,
            token_check_result: token_check,
            ico_eth_in: inflow,
            ico_eth_out: 0,
            ico_eth_total: tx_count,
            efr_ico_tx,
            efr_owner_tx_currency: rating.cfr_currency.clone(),
            ico_wallet_check_result: WalletCheck {
                funds_raised_diff: wallet_diff,
                funds_raised_check: judge(wallet_diff, band),
            },
            metrics: DistributionMetrics {
                distribution_days: (ico_end - ico_start).num_seconds() as f64 / 86_400.0,
                distribution_start_from_ico_start: window.0,
                distribution_end_from_ico_end: window.1,
                funds_balance_eth: fund_balance,
            },
        };

        info!(
            ico = %metadata.ico_name,
            tokens = result.tokens_issued,
            band,
            token_check = ?result.token_check_result.funds_raised_check,
            wallet_check = ?result.ico_wallet_check_result.funds_raised_check,
            fund = %metadata.fund_address,
            "Reconciliation complete"
        );
        Ok((result, rating))
    }

    /// Find the issuer (most frequent sender among the token's first
    /// transfers) and walk its full transfer history.
    pub async fn token_distribution(
        &self,
        token: &str,
        decimals: u32,
        ico_end: NaiveDate,
    ) -> Result<TokenDistribution> {
        let first_page = self
            .sources
            .explorer
            .token_transfers(token, None, 1, VOTE_PAGE_SIZE)
            .await?;
        let issuer = majority_vote(first_page.iter().map(|t| t.from.as_str()))
            .map(str::to_string)
            .ok_or_else(|| AnalyzerError::Adapter(format!("token {token} has no transfers")))?;
        debug!(%token, %issuer, "Resolved token issuer");

        let mut walk = DistributionWalk::new(date_to_unix(ico_end), decimals);
        let mut page = 1;
        loop {
            let transfers = self
                .sources
                .explorer
                .token_transfers(token, Some(&issuer), page, self.page_size)
                .await?;
            for transfer in &transfers {
                walk.observe(transfer)?;
            }
            if transfers.len() < self.page_size as usize {
                break;
            }
            page += 1;
        }

        let (tokens, start, end) = walk.finish()?;
        Ok(TokenDistribution {
            issuer,
            tokens,
            start,
            end,
        })
    }

    async fn market_snapshot(&self, start: NaiveDate, end: NaiveDate) -> Result<MarketSnapshot> {
        let samples = self
            .sources
            .rates
            .samples(date_to_unix(start), date_to_unix(end))
            .await?;
        market_from_samples(&samples)
    }

    /// External plus internal inflow to `address`, in whole units, and the
    /// number of transactions that carried it.
    async fn account_inflow(&self, address: &str) -> Result<(f64, i64)> {
        let (ext, ext_count) = self.sum_inflow(TxKind::External, address).await?;
        let (int, int_count) = self.sum_inflow(TxKind::Internal, address).await?;
        Ok((ext + int, ext_count + int_count))
    }

    async fn sum_inflow(&self, kind: TxKind, address: &str) -> Result<(f64, i64)> {
        let mut total = 0.0;
        let mut count = 0;
        let mut page = 1;
        loop {
            let txs = self.account_page(kind, address, page, self.page_size).await?;
            let (sum, n) = inflow_of(&txs, address)?;
            total += sum;
            count += n;
            if txs.len() < self.page_size as usize {
                break;
            }
            page += 1;
        }
        Ok((total, count))
    }

    async fn account_page(
        &self,
        kind: TxKind,
        address: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<AccountTx>> {
        match kind {
            TxKind::External => {
                self.sources
                    .explorer
                    .external_txs(address, page, page_size)
                    .await
            }
            TxKind::Internal => {
                self.sources
                    .explorer
                    .internal_txs(address, page, page_size)
                    .await
            }
        }
    }

    /// The address most often receiving internal transfers from `address`
    /// (or `address` itself) and its current balance.
    async fn resolve_fund(&self, address: &str) -> Result<(String, f64)> {
        let txs = self
            .account_page(TxKind::Internal, address, 1, VOTE_PAGE_SIZE)
            .await?;
        let fund = match majority_vote(txs.iter().map(|t| t.to.as_str())) {
            Some(winner) if !winner.is_empty() => winner.to_string(),
            _ => address.to_string(),
        };
        let raw = self.sources.explorer.balance(&fund).await?;
        let balance = parse_f64("balance", &raw)? / WEI_PER_ETH;
        Ok((fund, balance))
    }
}

/// Accumulates token totals and the distribution window over a transfer walk.
struct DistributionWalk {
    ico_end: i64,
    scale: f64,
    tokens: f64,
    start: Option<i64>,
    end: Option<i64>,
    // Timestamp of the latest transfer that did not open the window.
    previous: Option<i64>,
}

impl DistributionWalk {
    fn new(ico_end: i64, decimals: u32) -> Self {
        Self {
            ico_end,
            scale: 10f64.powi(decimals as i32),
            tokens: 0.0,
            start: None,
            end: None,
            previous: None,
        }
    }

    fn observe(&mut self, transfer: &TokenTransfer) -> Result<()> {
        let value = parse_f64("value", &transfer.value)?;
        let ts = parse_i64("timeStamp", &transfer.time_stamp)?;
        if self.start.is_none() && value != 0.0 {
            self.start = Some(ts);
        } else {
            if ts > self.ico_end && self.end.is_none() {
                self.end = Some(self.previous.unwrap_or(self.ico_end));
            }
            self.previous = Some(ts);
        }
        self.tokens += value / self.scale;
        Ok(())
    }

    fn finish(self) -> Result<(f64, String, String)> {
        let start = match self.start {
            Some(ts) => format_date(unix_to_date(ts)?),
            None => String::new(),
        };
        let end = format_date(unix_to_date(self.end.unwrap_or(self.ico_end))?);
        Ok((self.tokens, start, end))
    }
}

/// Most frequent candidate. On equal counts the candidate that most recently
/// reached the leading count wins.
pub fn majority_vote<'a, I>(candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: HashMap<&str, u64> = HashMap::new();
    let mut best = 0;
    let mut winner = None;
    for candidate in candidates {
        let count = counts.entry(candidate).or_insert(0);
        *count += 1;
        if *count >= best {
            best = *count;
            winner = Some(candidate);
        }
    }
    winner
}

/// The declared wallet: a distinct crowdsale address if there is one, else
/// the owner. The flag says whether the owner is that wallet.
pub fn declared_fund_address(metadata: &IcoMetadata) -> (String, bool) {
    if !metadata.crowdsale_address.is_empty()
        && metadata.crowdsale_address != metadata.owner_address
    {
        (metadata.crowdsale_address.clone(), false)
    } else {
        (metadata.owner_address.clone(), true)
    }
}

pub fn market_from_samples(samples: &[RateSample]) -> Result<MarketSnapshot> {
    let (first, last) = match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(AnalyzerError::Adapter("empty exchange-rate series".to_string())),
    };
    if first.weighted_average == 0.0 {
        return Err(AnalyzerError::InvalidNumber {
            field: "weightedAverage",
            value: first.weighted_average.to_string(),
        });
    }
    Ok(MarketSnapshot {
        rate_start: first.weighted_average,
        rate_end: last.weighted_average,
    })
}

pub fn adjusted_price(price: f64, market: &MarketSnapshot) -> f64 {
    price * (market.rate_end / market.rate_start)
}

/// `max(|rateEnd - rateStart| / rateStart, confidence)`
pub fn tolerance_band(market: &MarketSnapshot, confidence: f64) -> f64 {
    let fluctuation = ((market.rate_end - market.rate_start) / market.rate_start).abs();
    fluctuation.max(confidence)
}

pub fn relative_diff(expected: f64, claimed: f64) -> f64 {
    (expected - claimed) / claimed
}

pub fn judge(diff: f64, band: f64) -> Verdict {
    if diff < 0.0 && diff.abs() > band {
        Verdict::Failed
    } else {
        Verdict::Passed
    }
}

/// The token check judges the unadjusted difference; the adjusted one is
/// reported alongside.
pub fn token_check(tokens_issued: i64, rating: &RatingSnapshot, band: f64) -> TokenCheck {
    let efr = tokens_issued as f64 * rating.ico_price;
    let efr_adjusted = tokens_issued as f64 * rating.ico_price_adjusted;
    let diff = relative_diff(efr, rating.cfr);
    TokenCheck {
        funds_raised_diff: diff,
        funds_raised_adjusted_diff: relative_diff(efr_adjusted, rating.cfr),
        funds_raised_check: judge(diff, band),
    }
}

fn inflow_of(txs: &[AccountTx], address: &str) -> Result<(f64, i64)> {
    let mut sum = 0.0;
    let mut count = 0;
    for tx in txs {
        if !tx.errored() && tx.to.eq_ignore_ascii_case(address) {
            sum += parse_f64("value", &tx.value)? / WEI_PER_ETH;
            count += 1;
        }
    }
    Ok((sum, count))
}
