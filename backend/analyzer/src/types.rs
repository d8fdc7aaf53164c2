//! Order, offering and passport data model.
//!
//! Field names on the serialized types follow the passport payload layout
//! that earlier analyses were written with, so records produced here can be
//! compared field-for-field with historical ones.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{AnalyzerError, Result};

/// `DD Mon YYYY`, e.g. `05 Mar 2018`.
pub const DATE_LAYOUT: &str = "%d %b %Y";

/// Label the passport slot key is derived from.
pub const PASSPORT_FACT_LABEL: &[u8] = b"ICO Data";

/// Lifecycle state of an order as reported by the payment processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Null,
    Created,
    Paid,
    Processed,
    Refunded,
    RefundWithdrawn,
}

impl OrderState {
    /// Map the processor's numeric state code.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Null),
            1 => Ok(Self::Created),
            2 => Ok(Self::Paid),
            3 => Ok(Self::Processed),
            4 => Ok(Self::Refunded),
            5 => Ok(Self::RefundWithdrawn),
            other => Err(AnalyzerError::Adapter(format!(
                "unknown order state code {other}"
            ))),
        }
    }
}

/// Offering description plus the order it is being analysed for.
///
/// The reconciliation engine fills in the derived fields (issuer, fund
/// address, wallet flag, confidence) as it discovers them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcoMetadata {
    pub version: i32,
    #[serde(rename = "icoName")]
    pub ico_name: String,
    pub decimals: u32,
    #[serde(rename = "tokenContractAddress")]
    pub token_contract_address: String,
    #[serde(rename = "crowdsaleAddress")]
    pub crowdsale_address: String,
    #[serde(rename = "ownerAddress")]
    pub owner_address: String,
    #[serde(rename = "tokenIssuerAddress")]
    pub token_issuer_address: String,
    #[serde(rename = "fundAddress")]
    pub fund_address: String,
    #[serde(rename = "ethNominated")]
    pub eth_nominated: bool,
    pub token_tx_input_adjustment: bool,
    pub owner_is_ico_wallet: bool,
    pub confidence: f64,
    #[serde(rename = "passportAddress")]
    pub passport_address: String,
    #[serde(rename = "txHash")]
    pub tx_hash: String,
    #[serde(rename = "orderId")]
    pub order_id: i64,
    #[serde(rename = "accountAddress")]
    pub account_address: String,
}

impl IcoMetadata {
    /// A non-zero version means the caller supplied a prior snapshot to re-verify.
    pub fn is_reverification(&self) -> bool {
        self.version != 0
    }
}

/// Claimed figures scraped from the rating site.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingSnapshot {
    pub cfr_currency: String,
    pub cfr: f64,
    pub ico_start_date: String,
    pub ico_end_date: String,
    pub ico_price_cur: String,
    pub ico_price: f64,
    pub ico_price_adjusted: f64,
}

impl RatingSnapshot {
    pub fn start_date(&self) -> Result<NaiveDate> {
        parse_date(&self.ico_start_date)
    }

    pub fn end_date(&self) -> Result<NaiveDate> {
        parse_date(&self.ico_end_date)
    }
}

/// Settlement-asset rate sampled at the offering's start and end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketSnapshot {
    pub rate_start: f64,
    pub rate_end: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenCheck {
    pub funds_raised_diff: f64,
    pub funds_raised_adjusted_diff: f64,
    pub funds_raised_check: Verdict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletCheck {
    pub funds_raised_diff: f64,
    pub funds_raised_check: Verdict,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionMetrics {
    pub distribution_days: f64,
    pub distribution_start_from_ico_start: String,
    pub distribution_end_from_ico_end: String,
    pub funds_balance_eth: f64,
}

/// Output of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub tokens_issued: i64,
    pub efr_token: f64,
    pub eth_rate_start: f64,
    pub eth_rate_end: f64,
    pub efr_token_adjusted: f64,
    pub token_check_result: TokenCheck,
    pub ico_eth_in: f64,
    pub ico_eth_out: i64,
    pub ico_eth_total: i64,
    pub efr_ico_tx: f64,
    pub efr_owner_tx_currency: String,
    pub ico_wallet_check_result: WalletCheck,
    pub metrics: DistributionMetrics,
}

impl ReconciliationResult {
    /// Both checks must pass for the order to be captured.
    pub fn passed(&self) -> bool {
        self.token_check_result.funds_raised_check == Verdict::Passed
            && self.ico_wallet_check_result.funds_raised_check == Verdict::Passed
    }
}

/// Figures a re-verification request carries over from an earlier analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorCalculation {
    pub tokens_issued: i64,
    pub metrics: DistributionMetrics,
}

/// Body of an analysis request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisRequest {
    pub metadata: IcoMetadata,
    pub ico_info: Option<RatingSnapshot>,
    pub calculated_data: Option<PriorCalculation>,
}

/// Bundle written to the passport slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassportRecord {
    pub metadata: IcoMetadata,
    pub ico_info: RatingSnapshot,
    pub calculated_data: ReconciliationResult,
}

impl PassportRecord {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// The fixed 32-byte slot key: the label bytes, zero-padded.
pub fn passport_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..PASSPORT_FACT_LABEL.len()].copy_from_slice(PASSPORT_FACT_LABEL);
    key
}

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_LAYOUT).map_err(|_| AnalyzerError::InvalidDate {
        value: s.to_string(),
    })
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_LAYOUT).to_string()
}

/// Midnight UTC of `date` as a unix timestamp.
pub fn date_to_unix(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

/// Calendar date (UTC) of a unix timestamp.
pub fn unix_to_date(ts: i64) -> Result<NaiveDate> {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| AnalyzerError::InvalidNumber {
            field: "timestamp",
            value: ts.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> PassportRecord {
        PassportRecord {
            metadata: IcoMetadata {
                version: 1,
                ico_name: "sample-token".to_string(),
                decimals: 18,
                token_contract_address: "0xtoken".to_string(),
                owner_address: "0xowner".to_string(),
                fund_address: "0xfund".to_string(),
                confidence: 0.1,
                order_id: 42,
                ..Default::default()
            },
            ico_info: RatingSnapshot {
                cfr_currency: "USD".to_string(),
                cfr: 12_500_000.0,
                ico_start_date: "01 Mar 2018".to_string(),
                ico_end_date: "31 Mar 2018".to_string(),
                ico_price_cur: "USD".to_string(),
                ico_price: 0.1,
                ico_price_adjusted: 0.081_234_567_890_123_45,
            },
            calculated_data: ReconciliationResult {
                tokens_issued: 118_000_000,
                efr_token: 11_800_000.000_000_002,
                eth_rate_start: 862.135_791_3,
                eth_rate_end: 700.333_333_333_333_3,
                efr_token_adjusted: 9_585_678.997,
                token_check_result: TokenCheck {
                    funds_raised_diff: -0.056,
                    funds_raised_adjusted_diff: -0.233_145_680_24,
                    funds_raised_check: Verdict::Passed,
                },
                ico_eth_in: 14_321.987_654_321,
                ico_eth_out: 0,
                ico_eth_total: 3_411,
                efr_ico_tx: 12_347_612.4,
                efr_owner_tx_currency: "USD".to_string(),
                ico_wallet_check_result: WalletCheck {
                    funds_raised_diff: -0.012_191,
                    funds_raised_check: Verdict::Passed,
                },
                metrics: DistributionMetrics {
                    distribution_days: 30.0,
                    distribution_start_from_ico_start: "02 Mar 2018".to_string(),
                    distribution_end_from_ico_end: "30 Mar 2018".to_string(),
                    funds_balance_eth: 0.000_000_001,
                },
            },
        }
    }

    #[test]
    fn passport_record_survives_json_round_trip() {
        let record = sample_record();
        let bytes = record.to_bytes().unwrap();
        let decoded = PassportRecord::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(
            decoded.calculated_data.eth_rate_end.to_bits(),
            record.calculated_data.eth_rate_end.to_bits()
        );
    }

    #[test]
    fn passport_payload_uses_historical_field_names() {
        let json: serde_json::Value = serde_json::from_slice(&sample_record().to_bytes().unwrap()).unwrap();
        assert_eq!(json["metadata"]["icoName"], "sample-token");
        assert_eq!(json["metadata"]["orderId"], 42);
        assert_eq!(json["ico_info"]["cfr"], 12_500_000.0);
        assert_eq!(
            json["calculated_data"]["token_check_result"]["funds_raised_check"],
            "Passed"
        );
    }

    #[test]
    fn passport_key_is_zero_padded_label() {
        let key = passport_key();
        assert_eq!(&key[..8], b"ICO Data");
        assert!(key[8..].iter().all(|b| *b == 0));
    }

    #[test]
    fn parse_and_format_dates() {
        let d = parse_date("05 Mar 2018").unwrap();
        assert_eq!(format_date(d), "05 Mar 2018");
        assert_eq!(date_to_unix(d), 1_520_208_000);
        assert_eq!(unix_to_date(1_520_208_000 + 3_600).unwrap(), d);
    }

    #[test]
    fn malformed_date_is_rejected() {
        assert!(matches!(
            parse_date("2018-03-05"),
            Err(AnalyzerError::InvalidDate { .. })
        ));
    }

    #[test]
    fn order_state_codes() {
        assert_eq!(OrderState::from_code(0).unwrap(), OrderState::Null);
        assert_eq!(OrderState::from_code(2).unwrap(), OrderState::Paid);
        assert!(OrderState::from_code(9).is_err());
    }

    #[test]
    fn reverification_request_ignores_unknown_calculated_fields() {
        let body = r#"{
            "metadata": {"version": 1, "icoName": "x", "orderId": 7, "confidence": 0.05},
            "ico_info": {"cfr": 100.0, "ico_price": 1.0, "ico_start_date": "01 Jan 2018", "ico_end_date": "31 Jan 2018"},
            "calculated_data": {"tokens_issued": 90, "efr_token": "", "metrics": {"distribution_start_from_ico_start": "02 Jan 2018"}}
        }"#;
        let req: AnalysisRequest = serde_json::from_str(body).unwrap();
        assert!(req.metadata.is_reverification());
        let prior = req.calculated_data.unwrap();
        assert_eq!(prior.tokens_issued, 90);
        assert_eq!(prior.metrics.distribution_start_from_ico_start, "02 Jan 2018");
    }
}
