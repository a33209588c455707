//! KIS Frame Codec
//!
//! Turns raw text frames from the streaming connection into tick records.
//!
//! # Frame Shapes
//!
//! - **Control** frames are JSON objects (subscription acknowledgments,
//!   keepalives, errors). They never produce a record.
//! - **Data** frames are pipe-delimited:
//!
//! ```text
//! 0|H0STCNT0|001|005930^094434^70000^2^200^0.29^69950.12^69800^70100^69700^...^1200^...
//! ^ ^        ^   ^
//! | |        |   caret-delimited payload
//! | |        record count
//! | transaction id
//! encryption flag
//! ```
//!
//! # Payload Fields (0-indexed)
//!
//! | Index | Field |
//! |-------|-------|
//! | 0 | symbol |
//! | 1 | contract time `HHMMSS` |
//! | 2 | close (current price) |
//! | 4 | change versus previous close |
//! | 5 | change rate |
//! | 7 | open |
//! | 8 | high |
//! | 9 | low |
//! | 12 | contract volume |
//!
//! Every failure is local to its frame: [`FrameDecoder::decode`] logs it
//! once, counts it and returns `None`.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta};
use rust_decimal::Decimal;

use super::messages::ControlFrame;
use crate::application::ports::ReferenceLookup;
use crate::domain::tick::{self, TickRecord};
use crate::infrastructure::metrics::{self, FrameErrorKind};

/// Minimum number of `|` segments in a data frame.
pub const MIN_SEGMENTS: usize = 4;

/// Minimum number of `^` fields in a data payload.
pub const MIN_FIELDS: usize = 13;

const TIME_FORMAT: &str = "%H%M%S";

mod field {
    pub const SYMBOL: usize = 0;
    pub const TIME: usize = 1;
    pub const CLOSE: usize = 2;
    pub const RATE_PRICE: usize = 4;
    pub const RATE: usize = 5;
    pub const OPEN: usize = 7;
    pub const HIGH: usize = 8;
    pub const LOW: usize = 9;
    pub const VOLUME: usize = 12;
}

// =============================================================================
// Errors
// =============================================================================

/// Why a frame produced no tick record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// JSON control frame could not be parsed.
    #[error("malformed control frame: {0}")]
    MalformedControl(String),

    /// Too few `|` segments.
    #[error("data frame has {found} segments, need at least {MIN_SEGMENTS}")]
    TooFewSegments {
        /// Segments present
        found: usize,
    },

    /// Too few `^` fields in the payload.
    #[error("data payload has {found} fields, need at least {MIN_FIELDS}")]
    TooFewFields {
        /// Fields present
        found: usize,
    },

    /// Payload carries no symbol.
    #[error("data payload has an empty symbol")]
    EmptySymbol,

    /// A numeric field failed to parse.
    #[error("invalid {field} value {value:?}")]
    InvalidNumber {
        /// Field name
        field: &'static str,
        /// Raw value
        value: String,
    },

    /// The contract time failed to parse.
    #[error("invalid contract time {0:?}")]
    InvalidTime(String),

    /// `close × volume` does not fit a decimal.
    #[error("trading value overflow for close {close} and volume {volume}")]
    TradingValueOverflow {
        /// Close price
        close: Decimal,
        /// Volume
        volume: i64,
    },

    /// Symbol has no reference data.
    #[error("no reference data for symbol {0}")]
    LookupMiss(String),
}

impl FrameError {
    /// Error category used for metrics.
    #[must_use]
    pub const fn kind(&self) -> FrameErrorKind {
        match self {
            Self::MalformedControl(_)
            | Self::TooFewSegments { .. }
            | Self::TooFewFields { .. }
            | Self::EmptySymbol => FrameErrorKind::Protocol,
            Self::InvalidNumber { .. }
            | Self::InvalidTime(_)
            | Self::TradingValueOverflow { .. } => FrameErrorKind::Decode,
            Self::LookupMiss(_) => FrameErrorKind::LookupMiss,
        }
    }
}

// =============================================================================
// Frames
// =============================================================================

/// A successfully parsed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A data frame decoded into a tick.
    Tick(TickRecord),
    /// Acknowledgment of a contract-price subscription.
    SubscriptionAck(ControlFrame),
    /// Any other control frame.
    Control(ControlFrame),
}

// =============================================================================
// Decoder
// =============================================================================

/// Decodes raw frames, enriching ticks through a reference lookup.
#[derive(Clone)]
pub struct FrameDecoder {
    lookup: Arc<dyn ReferenceLookup>,
}

impl std::fmt::Debug for FrameDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDecoder").finish_non_exhaustive()
    }
}

impl FrameDecoder {
    /// Create a decoder backed by `lookup`.
    #[must_use]
    pub fn new(lookup: Arc<dyn ReferenceLookup>) -> Self {
        Self { lookup }
    }

    /// Decode a frame using the local wall clock.
    ///
    /// Returns a record only for a well-formed data frame with resolvable
    /// reference data.
    pub fn decode(&self, raw: &str) -> Option<TickRecord> {
        self.decode_at(raw, Local::now().naive_local())
    }

    /// Decode a frame against an explicit wall-clock reading.
    pub fn decode_at(&self, raw: &str, now: NaiveDateTime) -> Option<TickRecord> {
        let span = tracing::debug_span!(
            "decode_frame",
            encrypt = tracing::field::Empty,
            tr_id = tracing::field::Empty,
        );
        let _guard = span.enter();

        match self.parse(raw, now) {
            Ok(Frame::Tick(record)) => Some(record),
            Ok(Frame::SubscriptionAck(frame)) => {
                metrics::record_control_frame(true);
                tracing::info!(
                    symbol = frame.header.tr_key.as_deref().unwrap_or_default(),
                    msg = frame.message().unwrap_or_default(),
                    "Subscription acknowledged"
                );
                None
            }
            Ok(Frame::Control(frame)) => {
                metrics::record_control_frame(false);
                tracing::debug!(
                    tr_id = %frame.header.tr_id,
                    rt_cd = frame.result_code().unwrap_or_default(),
                    msg = frame.message().unwrap_or_default(),
                    "Control frame"
                );
                None
            }
            Err(e) => {
                metrics::record_frame_error(e.kind());
                tracing::warn!(error = %e, frame = truncate(raw, 120), "Dropping frame");
                None
            }
        }
    }

    /// Classify and decode a frame without logging.
    ///
    /// # Errors
    ///
    /// Returns a `FrameError` describing why no record was produced.
    pub fn parse(&self, raw: &str, now: NaiveDateTime) -> Result<Frame, FrameError> {
        if raw.trim_start().starts_with('{') {
            let frame =
                ControlFrame::parse(raw).map_err(|e| FrameError::MalformedControl(e.to_string()))?;
            return Ok(if frame.is_subscription_ack() {
                Frame::SubscriptionAck(frame)
            } else {
                Frame::Control(frame)
            });
        }

        self.parse_data(raw, now).map(Frame::Tick)
    }

    fn parse_data(&self, raw: &str, now: NaiveDateTime) -> Result<TickRecord, FrameError> {
        let segments: Vec<&str> = raw.split('|').collect();
        if segments.len() < MIN_SEGMENTS {
            return Err(FrameError::TooFewSegments {
                found: segments.len(),
            });
        }
        tracing::Span::current()
            .record("encrypt", segments[0])
            .record("tr_id", segments[1]);

        let fields: Vec<&str> = segments[3].split('^').collect();
        if fields.len() < MIN_FIELDS {
            return Err(FrameError::TooFewFields {
                found: fields.len(),
            });
        }

        let symbol = fields[field::SYMBOL].trim();
        if symbol.is_empty() {
            return Err(FrameError::EmptySymbol);
        }

        let time_raw = fields[field::TIME].trim();
        let time = NaiveTime::parse_from_str(time_raw, TIME_FORMAT)
            .map_err(|_| FrameError::InvalidTime(time_raw.to_string()))?;

        let close = parse_decimal("close", fields[field::CLOSE])?;
        for (name, index) in [
            ("rate_price", field::RATE_PRICE),
            ("rate", field::RATE),
            ("open", field::OPEN),
            ("high", field::HIGH),
            ("low", field::LOW),
        ] {
            parse_decimal(name, fields[index])?;
        }
        let volume_raw = fields[field::VOLUME].trim();
        let volume: i64 = volume_raw
            .parse()
            .map_err(|_| FrameError::InvalidNumber {
                field: "volume",
                value: volume_raw.to_string(),
            })?;

        let trading_value = tick::trading_value(close, volume)
            .ok_or(FrameError::TradingValueOverflow { close, volume })?;

        let company = self
            .lookup
            .lookup(symbol)
            .ok_or_else(|| FrameError::LookupMiss(symbol.to_string()))?;

        Ok(TickRecord {
            id: Some(company.id),
            name: Some(company.name),
            symbol: symbol.to_string(),
            timestamp: frame_timestamp(now, time),
            open: fields[field::OPEN].trim().to_string(),
            close: fields[field::CLOSE].trim().to_string(),
            high: fields[field::HIGH].trim().to_string(),
            low: fields[field::LOW].trim().to_string(),
            rate_price: fields[field::RATE_PRICE].trim().to_string(),
            rate: fields[field::RATE].trim().to_string(),
            volume: volume_raw.to_string(),
            trading_value,
        })
    }
}

fn parse_decimal(field: &'static str, raw: &str) -> Result<Decimal, FrameError> {
    let raw = raw.trim();
    Decimal::from_str(raw).map_err(|_| FrameError::InvalidNumber {
        field,
        value: raw.to_string(),
    })
}

/// Combine the wall-clock date with the frame's contract time.
///
/// A contract time more than twelve hours ahead of `now` belongs to the
/// previous day (a 23:59:58 frame decoded at 00:00:01).
#[must_use]
pub fn frame_timestamp(now: NaiveDateTime, time: NaiveTime) -> NaiveDateTime {
    let candidate = now.date().and_time(time);
    if candidate - now > TimeDelta::hours(12) {
        candidate
            .checked_sub_signed(TimeDelta::days(1))
            .unwrap_or(candidate)
    } else {
        candidate
    }
}

fn truncate(raw: &str, max_chars: usize) -> &str {
    raw.char_indices()
        .nth(max_chars)
        .map_or(raw, |(idx, _)| &raw[..idx])
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;
    use crate::application::ports::MockReferenceLookup;
    use crate::domain::tick::CompanyRef;

    const SAMSUNG: &str = "0|H0STCNT0|001|005930^094434^70000^2^200^0.29^69950.12^69800^70100^69700^70100^70000^1200^1500000^104965000000";

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 2)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn known_symbols() -> MockReferenceLookup {
        let mut lookup = MockReferenceLookup::new();
        lookup.expect_lookup().returning(|symbol| match symbol {
            "005930" => Some(CompanyRef::new(1, "Samsung Electronics")),
            "000660" => Some(CompanyRef::new(2, "SK hynix")),
            _ => None,
        });
        lookup
    }

    fn decoder() -> FrameDecoder {
        FrameDecoder::new(Arc::new(known_symbols()))
    }

    fn frame_with(close: &str, volume: &str) -> String {
        format!(
            "0|H0STCNT0|001|005930^094434^{close}^2^200^0.29^69950^69800^70100^69700^70100^70000^{volume}^1500000"
        )
    }

    #[test]
    fn decodes_contract_price_frame() {
        let record = decoder().decode_at(SAMSUNG, now()).unwrap();

        assert_eq!(record.id, Some(1));
        assert_eq!(record.name.as_deref(), Some("Samsung Electronics"));
        assert_eq!(record.symbol, "005930");
        assert_eq!(record.close, "70000");
        assert_eq!(record.rate_price, "200");
        assert_eq!(record.rate, "0.29");
        assert_eq!(record.open, "69800");
        assert_eq!(record.high, "70100");
        assert_eq!(record.low, "69700");
        assert_eq!(record.volume, "1200");
        assert_eq!(record.trading_value, Decimal::from(84_000_000));
        assert_eq!(
            record.timestamp,
            now().date().and_hms_opt(9, 44, 34).unwrap()
        );
    }

    #[test]
    fn payload_date_is_today_plus_frame_time() {
        let record = decoder().decode_at(SAMSUNG, now()).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&record.to_payload().unwrap()).unwrap();
        assert_eq!(value["date"], "2024-05-02 09:44:34");
    }

    #[test]
    fn decoding_twice_is_identical() {
        let decoder = decoder();
        assert_eq!(
            decoder.decode_at(SAMSUNG, now()),
            decoder.decode_at(SAMSUNG, now())
        );
    }

    #[test]
    fn exactly_thirteen_fields_is_enough() {
        let raw = "0|H0STCNT0|001|000660^131500^181000.5^5^-500^-0.27^0^181500^182000^180500^0^0^37";
        let record = decoder().decode_at(raw, now()).unwrap();
        assert_eq!(record.symbol, "000660");
        assert_eq!(record.rate_price, "-500");
        assert_eq!(record.trading_value, Decimal::from_str("6697018.5").unwrap());
    }

    #[test_case("", FrameErrorKind::Protocol ; "empty frame")]
    #[test_case("0|H0STCNT0|001", FrameErrorKind::Protocol ; "three pipe segments")]
    #[test_case("0|H0STCNT0|001|005930^094434^70000", FrameErrorKind::Protocol ; "three caret fields")]
    #[test_case("0|H0STCNT0|001|^094434^70000^2^200^0.29^0^69800^70100^69700^0^0^1200", FrameErrorKind::Protocol ; "empty symbol")]
    #[test_case("{\"header\":", FrameErrorKind::Protocol ; "truncated json")]
    #[test_case("0|H0STCNT0|001|005930^0944^70000^2^200^0.29^0^69800^70100^69700^0^0^1200", FrameErrorKind::Decode ; "short time")]
    #[test_case("0|H0STCNT0|001|005930^256100^70000^2^200^0.29^0^69800^70100^69700^0^0^1200", FrameErrorKind::Decode ; "hour out of range")]
    #[test_case("0|H0STCNT0|001|005930^094434^seventy^2^200^0.29^0^69800^70100^69700^0^0^1200", FrameErrorKind::Decode ; "non numeric close")]
    #[test_case("0|H0STCNT0|001|005930^094434^70000^2^200^0.29^0^69800^70100^^0^0^1200", FrameErrorKind::Decode ; "empty low")]
    #[test_case("0|H0STCNT0|001|005930^094434^70000^2^200^0.29^0^69800^70100^69700^0^0^12.5", FrameErrorKind::Decode ; "fractional volume")]
    #[test_case("0|H0STCNT0|001|999999^094434^70000^2^200^0.29^0^69800^70100^69700^0^0^1200", FrameErrorKind::LookupMiss ; "unknown symbol")]
    fn rejects_frame(raw: &str, expected: FrameErrorKind) {
        let decoder = decoder();
        let err = decoder.parse(raw, now()).unwrap_err();
        assert_eq!(err.kind(), expected, "{err}");
        assert!(decoder.decode_at(raw, now()).is_none());
    }

    /// Records the level of every event emitted while installed.
    #[derive(Clone, Default)]
    struct EventLevels(Arc<parking_lot::Mutex<Vec<tracing::Level>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventLevels {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            self.0.lock().push(*event.metadata().level());
        }
    }

    fn decode_logged(raw: &str) -> (Option<TickRecord>, Vec<tracing::Level>) {
        use tracing_subscriber::layer::SubscriberExt;

        let levels = EventLevels::default();
        let subscriber = tracing_subscriber::registry().with(levels.clone());
        let record =
            tracing::subscriber::with_default(subscriber, || decoder().decode_at(raw, now()));
        let seen = levels.0.lock().clone();
        (record, seen)
    }

    #[test_case("0|H0STCNT0|001" ; "three pipe segments")]
    #[test_case("0|H0STCNT0|001|005930^094434^70000" ; "three caret fields")]
    #[test_case("0|H0STCNT0|001|999999^094434^70000^2^200^0.29^0^69800^70100^69700^0^0^1200" ; "unknown symbol")]
    fn rejected_frame_logs_one_warning(raw: &str) {
        let (record, levels) = decode_logged(raw);
        assert!(record.is_none());
        assert_eq!(levels, vec![tracing::Level::WARN]);
    }

    #[test]
    fn decoded_tick_logs_nothing() {
        let (record, levels) = decode_logged(SAMSUNG);
        assert!(record.is_some());
        assert!(levels.is_empty());
    }

    #[test]
    fn segment_counts_are_reported() {
        let err = decoder().parse("0|H0STCNT0|001", now()).unwrap_err();
        assert_eq!(err, FrameError::TooFewSegments { found: 3 });

        let err = decoder()
            .parse("0|H0STCNT0|001|005930^094434^70000", now())
            .unwrap_err();
        assert_eq!(err, FrameError::TooFewFields { found: 3 });
    }

    #[test]
    fn subscription_ack_yields_no_record() {
        let raw = r#"{"header":{"tr_id":"H0STCNT0","tr_key":"005930","encrypt":"N"},"body":{"rt_cd":"1","msg_cd":"OPSP0000","msg1":"SUBSCRIBE SUCCESS"}}"#;
        let decoder = decoder();

        assert!(matches!(
            decoder.parse(raw, now()),
            Ok(Frame::SubscriptionAck(_))
        ));
        assert!(decoder.decode_at(raw, now()).is_none());
    }

    #[test]
    fn other_control_frames_yield_no_record() {
        let raw = r#"{"header":{"tr_id":"PINGPONG","datetime":"20240502094434"}}"#;
        let decoder = decoder();

        assert!(matches!(decoder.parse(raw, now()), Ok(Frame::Control(_))));
        assert!(decoder.decode_at(raw, now()).is_none());
    }

    #[test]
    fn lookup_miss_drops_well_formed_frame() {
        let mut lookup = MockReferenceLookup::new();
        lookup.expect_lookup().times(1).returning(|_| None);
        let decoder = FrameDecoder::new(Arc::new(lookup));

        assert_eq!(
            decoder.parse(SAMSUNG, now()).unwrap_err(),
            FrameError::LookupMiss("005930".to_string())
        );
    }

    #[test]
    fn late_evening_frame_after_midnight_uses_previous_day() {
        let just_after_midnight = NaiveDate::from_ymd_opt(2024, 5, 3)
            .unwrap()
            .and_hms_opt(0, 0, 1)
            .unwrap();
        let time = NaiveTime::from_hms_opt(23, 59, 58).unwrap();

        assert_eq!(
            frame_timestamp(just_after_midnight, time),
            NaiveDate::from_ymd_opt(2024, 5, 2)
                .unwrap()
                .and_time(time)
        );
    }

    #[test]
    fn frame_slightly_ahead_keeps_today() {
        let time = NaiveTime::from_hms_opt(10, 0, 5).unwrap();
        assert_eq!(frame_timestamp(now(), time), now().date().and_time(time));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("삼성전자", 2), "삼성");
        assert_eq!(truncate("abc", 10), "abc");
    }

    proptest! {
        #[test]
        fn trading_value_is_close_times_volume(
            close_cents in 1i64..100_000_000,
            volume in 0i64..10_000_000,
        ) {
            let close = Decimal::new(close_cents, 2);
            let raw = frame_with(&close.to_string(), &volume.to_string());

            let record = decoder().decode_at(&raw, now()).unwrap();

            prop_assert_eq!(record.trading_value, close * Decimal::from(volume));
            prop_assert_eq!(record.close, close.to_string());
            prop_assert_eq!(record.volume, volume.to_string());
        }
    }
}
