//! Rating-site client: scrapes the offering's claimed figures from its
//! public page.
//!
//! The figures live in the first table whose class contains
//! [`INFO_TABLE_CLASS`]. Each row is read as text, one line per cell; its
//! first line is the label and its last line the value.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::errors::{AnalyzerError, Result};
use crate::sources::RatingSource;
use crate::types::{format_date, parse_date, RatingSnapshot};

const INFO_TABLE_CLASS: &str = "c-info-table--va-top";

pub struct RatingSiteClient {
    client: Client,
    base_url: String,
}

impl RatingSiteClient {
    pub fn new(client: Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl RatingSource for RatingSiteClient {
    async fn snapshot(&self, ico_name: &str) -> Result<RatingSnapshot> {
        let url = format!("{}/{ico_name}/", self.base_url.trim_end_matches('/'));
        debug!("Fetching rating page {url}");
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(AnalyzerError::UnknownOffering(ico_name.to_string()));
        }
        let html = response.error_for_status()?.text().await?;
        parse_rating_page(ico_name, &html)
    }
}

/// Extract the claimed figures from a rating page.
pub fn parse_rating_page(ico_name: &str, html: &str) -> Result<RatingSnapshot> {
    let document = Html::parse_document(html);
    let table_selector = selector(&format!("table[class*=\"{INFO_TABLE_CLASS}\"]"))?;
    let table = document
        .select(&table_selector)
        .next()
        .ok_or_else(|| AnalyzerError::UnknownOffering(ico_name.to_string()))?;
    let fields = table_fields(table)?;
    let field = |label: &'static str| -> Result<&str> {
        fields
            .get(label)
            .map(String::as_str)
            .ok_or_else(|| AnalyzerError::Adapter(format!("rating page has no {label:?} row")))
    };

    let (raised, cfr_currency) = amount_and_currency("Raised", field("Raised")?)?;
    let cfr = raised
        .replace(',', "")
        .parse::<i64>()
        .map_err(|_| AnalyzerError::InvalidNumber {
            field: "Raised",
            value: raised.to_string(),
        })? as f64;

    let price_field = field("Price")?;
    let (price, ico_price_cur) =
        amount_and_currency("Price", price_field.strip_prefix("= ").unwrap_or(price_field))?;
    let ico_price = price
        .parse::<f64>()
        .map_err(|_| AnalyzerError::InvalidNumber {
            field: "Price",
            value: price.to_string(),
        })?;

    Ok(RatingSnapshot {
        cfr_currency: cfr_currency.to_string(),
        cfr,
        ico_start_date: format_date(parse_date(field("ICO start date")?)?),
        ico_end_date: format_date(parse_date(field("ICO end date")?)?),
        ico_price_cur: ico_price_cur.to_string(),
        ico_price,
        ico_price_adjusted: 0.0,
    })
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| AnalyzerError::Adapter(format!("selector {css:?}: {e:?}")))
}

/// "12,000,000 USD" -> ("12,000,000", "USD")
fn amount_and_currency<'a>(label: &'static str, value: &'a str) -> Result<(&'a str, &'a str)> {
    let mut parts = value.split(' ');
    match (parts.next(), parts.next()) {
        (Some(amount), Some(currency)) => Ok((amount, currency)),
        _ => Err(AnalyzerError::InvalidNumber {
            field: label,
            value: value.to_string(),
        }),
    }
}

/// Label -> value for every row. Later rows win on duplicate labels.
fn table_fields(table: ElementRef<'_>) -> Result<HashMap<String, String>> {
    let row_selector = selector("tr")?;
    let cell_selector = selector("td, th")?;
    let mut fields = HashMap::new();
    for row in table.select(&row_selector) {
        let text = row_text(row, &cell_selector);
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if let (Some(label), Some(value)) = (lines.first(), lines.last()) {
            fields.insert(label.to_string(), value.to_string());
        }
    }
    Ok(fields)
}

/// Row text with one line break between cells. Non-breaking spaces read as
/// plain spaces.
fn row_text(row: ElementRef<'_>, cells: &Selector) -> String {
    let mut text = String::new();
    for cell in row.select(cells) {
        text.extend(cell.text());
        text.push('\n');
    }
    if text.is_empty() {
        text.extend(row.text());
    }
    text.replace('\u{a0}', " ")
}
