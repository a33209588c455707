//! Tick Record Types
//!
//! The canonical unit flowing through the ingestion pipeline. A tick is
//! created once per incoming data frame (or per synthetic tick), enriched
//! with reference data and handed off as its JSON payload.
//!
//! # Wire Format (JSON payload)
//!
//! ```json
//! {
//!   "id": 1, "name": "Samsung Electronics", "symbol": "005930",
//!   "date": "2024-05-02 09:44:34",
//!   "open": "69800", "close": "70000", "high": "70100", "low": "69700",
//!   "rate_price": "200", "rate": "0.29", "volume": "1200",
//!   "trading_value": 84000000.0
//! }
//! ```

use chrono::NaiveDateTime;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A ticker symbol (KRX short code such as `005930`).
pub type Symbol = String;

/// Reference data resolved for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRef {
    /// Reference identifier.
    pub id: i64,
    /// Display name.
    pub name: String,
}

impl CompanyRef {
    /// Create a new reference entry.
    #[must_use]
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// One normalized market-data observation for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickRecord {
    /// Reference identifier (null when unresolved).
    pub id: Option<i64>,
    /// Display name (null when unresolved).
    pub name: Option<String>,
    /// Subscription key.
    pub symbol: Symbol,
    /// Local date plus intraday time, second precision.
    #[serde(rename = "date", with = "date_format")]
    pub timestamp: NaiveDateTime,
    /// Opening price, source precision.
    pub open: String,
    /// Current (contract) price, source precision.
    pub close: String,
    /// Session high.
    pub high: String,
    /// Session low.
    pub low: String,
    /// Signed change versus the previous close.
    pub rate_price: String,
    /// Signed change rate in percent.
    pub rate: String,
    /// Accumulated volume.
    pub volume: String,
    /// `close × volume`, computed when the record is built.
    #[serde(with = "rust_decimal::serde::float")]
    pub trading_value: Decimal,
}

impl TickRecord {
    /// Check whether reference data has been resolved.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.id.is_some() && self.name.is_some()
    }

    /// Serialize into the JSON payload published to the bus and queue.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Format as a server-push event (`data: <json>\n\n`).
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_server_push_event(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", self.to_payload()?))
    }
}

/// Compute `close × volume`.
///
/// Returns `None` on decimal overflow.
#[must_use]
pub fn trading_value(close: Decimal, volume: i64) -> Option<Decimal> {
    close.checked_mul(Decimal::from(volume))
}

// =============================================================================
// Synthetic Ticks
// =============================================================================

/// Build a randomized tick with plausible price and volume fields.
///
/// Prices are drawn in whole cents from fixed bands (open/close
/// 50,000–55,000, high 55,000–60,000, low 50,000–51,000), the change
/// fields from ±5 and ±2, volume from 1,000–5,000. `trading_value` is
/// always `close × volume`.
pub fn random_tick<R: Rng>(
    rng: &mut R,
    symbol: &str,
    company: Option<CompanyRef>,
    timestamp: NaiveDateTime,
) -> TickRecord {
    let open = cents(rng, 5_000_000, 5_500_000);
    let close = cents(rng, 5_000_000, 5_500_000);
    let high = cents(rng, 5_500_000, 6_000_000);
    let low = cents(rng, 5_000_000, 5_100_000);
    let rate_price = cents(rng, -500, 500);
    let rate = cents(rng, -200, 200);
    let volume: i64 = rng.random_range(1_000..=5_000);

    let (id, name) = company.map_or((None, None), |c| (Some(c.id), Some(c.name)));

    TickRecord {
        id,
        name,
        symbol: symbol.to_string(),
        timestamp,
        open: open.to_string(),
        close: close.to_string(),
        high: high.to_string(),
        low: low.to_string(),
        rate_price: rate_price.to_string(),
        rate: rate.to_string(),
        volume: volume.to_string(),
        trading_value: close * Decimal::from(volume),
    }
}

fn cents<R: Rng>(rng: &mut R, low: i64, high: i64) -> Decimal {
    Decimal::new(rng.random_range(low..high), 2)
}

mod date_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&ts.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::NaiveDate;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn sample_timestamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 2)
            .unwrap()
            .and_hms_opt(9, 44, 34)
            .unwrap()
    }

    fn sample_record() -> TickRecord {
        TickRecord {
            id: Some(1),
            name: Some("Samsung Electronics".to_string()),
            symbol: "005930".to_string(),
            timestamp: sample_timestamp(),
            open: "69800".to_string(),
            close: "70000".to_string(),
            high: "70100".to_string(),
            low: "69700".to_string(),
            rate_price: "200".to_string(),
            rate: "0.29".to_string(),
            volume: "1200".to_string(),
            trading_value: Decimal::from(84_000_000),
        }
    }

    #[test]
    fn payload_uses_date_key_and_second_precision() {
        let payload = sample_record().to_payload().unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(value["date"], "2024-05-02 09:44:34");
        assert_eq!(value["symbol"], "005930");
        assert_eq!(value["volume"], "1200");
        assert_eq!(value["trading_value"].as_f64(), Some(84_000_000.0));
        assert!(value.get("timestamp").is_none());
    }

    #[test]
    fn payload_deserializes_back() {
        let record = sample_record();
        let decoded: TickRecord = serde_json::from_str(&record.to_payload().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn unresolved_record_serializes_nulls() {
        let mut record = sample_record();
        record.id = None;
        record.name = None;
        assert!(!record.is_resolved());

        let value: serde_json::Value =
            serde_json::from_str(&record.to_payload().unwrap()).unwrap();
        assert!(value["id"].is_null());
        assert!(value["name"].is_null());
    }

    #[test]
    fn server_push_event_framing() {
        let event = sample_record().to_server_push_event().unwrap();
        assert!(event.starts_with("data: {"));
        assert!(event.ends_with("}\n\n"));
    }

    #[test]
    fn trading_value_is_exact() {
        let close = Decimal::from_str("70000.5").unwrap();
        assert_eq!(
            trading_value(close, 1200),
            Some(Decimal::from_str("84000600").unwrap())
        );
    }

    #[test]
    fn trading_value_overflow_is_none() {
        assert_eq!(trading_value(Decimal::MAX, 2), None);
    }

    #[test]
    fn random_tick_respects_bands() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let tick = random_tick(&mut rng, "005930", None, sample_timestamp());
            let close = Decimal::from_str(&tick.close).unwrap();
            let low = Decimal::from_str(&tick.low).unwrap();
            let volume: i64 = tick.volume.parse().unwrap();

            assert!(close >= Decimal::from(50_000) && close < Decimal::from(55_000));
            assert!(low >= Decimal::from(50_000) && low < Decimal::from(51_000));
            assert!((1_000..=5_000).contains(&volume));
            assert_eq!(tick.trading_value, close * Decimal::from(volume));
            assert!(tick.trading_value > Decimal::ZERO);
        }
    }

    #[test]
    fn random_tick_carries_reference_data() {
        let mut rng = StdRng::seed_from_u64(1);
        let tick = random_tick(
            &mut rng,
            "000660",
            Some(CompanyRef::new(2, "SK hynix")),
            sample_timestamp(),
        );
        assert_eq!(tick.id, Some(2));
        assert_eq!(tick.name.as_deref(), Some("SK hynix"));
        assert!(tick.is_resolved());
    }
}
