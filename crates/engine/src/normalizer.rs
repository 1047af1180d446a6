//! Typed parsing boundary for terminal deal records.
//!
//! The terminal hands back loosely typed field maps. Everything downstream of
//! this module works on [`RawDeal`]; a record whose numeric fields do not have
//! the expected JSON type is rejected, never coerced.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};
use tradetrack_core::*;

/// A deal record that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DealParseError {
    pub ticket: Option<i64>,
    pub field: String,
    pub reason: String,
}

impl fmt::Display for DealParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ticket {
            Some(ticket) => write!(
                f,
                "Rejected deal {}: field '{}' {}",
                ticket, self.field, self.reason
            ),
            None => write!(f, "Rejected deal: field '{}' {}", self.field, self.reason),
        }
    }
}

impl std::error::Error for DealParseError {}

/// Result of normalizing one batch of terminal records.
#[derive(Debug, Clone, Default)]
pub struct NormalizedDeals {
    /// Trade deals (buy/sell) in input order.
    pub deals: Vec<RawDeal>,
    /// Non-trade ledger entries dropped (balance, credit, correction, ...).
    pub filtered: usize,
    pub rejected: Vec<DealParseError>,
}

/// Normalize a batch of terminal records.
pub fn normalize_deals(records: &[DealRecord]) -> NormalizedDeals {
    let mut out = NormalizedDeals::default();

    for record in records {
        match parse_deal(record) {
            Ok(Some(deal)) => out.deals.push(deal),
            Ok(None) => out.filtered += 1,
            Err(e) => {
                warn!(error = %e, "Skipping malformed deal record");
                out.rejected.push(e);
            }
        }
    }

    debug!(
        deals = out.deals.len(),
        filtered = out.filtered,
        rejected = out.rejected.len(),
        "Normalized terminal deals"
    );
    out
}

/// Parse a single record. `Ok(None)` means the record is a valid non-trade
/// entry and should be dropped.
pub fn parse_deal(record: &DealRecord) -> Result<Option<RawDeal>, DealParseError> {
    let ticket = int_field(record, "ticket", None)?
        .ok_or_else(|| missing("ticket", None))?;
    if ticket <= 0 {
        return Err(invalid("ticket", Some(ticket), "must be positive"));
    }
    let t = Some(ticket);

    let type_code = int_field(record, "type", t)?.ok_or_else(|| missing("type", t))?;
    let Some(direction) = Direction::from_type_code(type_code) else {
        return Ok(None);
    };

    let entry_type = int_field(record, "entry", t)?
        .map(EntryType::from_code)
        .unwrap_or(EntryType::Other);

    let position_id = match int_field(record, "position_id", t)? {
        None | Some(0) => None,
        Some(id) if id < 0 => return Err(invalid("position_id", t, "must not be negative")),
        Some(id) => Some(id),
    };

    let symbol = match record.get("symbol") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::String(_)) | None | Some(Value::Null) => return Err(missing("symbol", t)),
        Some(other) => {
            return Err(invalid(
                "symbol",
                t,
                &format!("expected a string, got {}", kind(other)),
            ))
        }
    };

    let secs = int_field(record, "time", t)?.ok_or_else(|| missing("time", t))?;
    if secs < 0 {
        return Err(invalid("time", t, "must not be negative"));
    }
    // Terminal timestamps are epoch seconds and are taken as UTC.
    let time: DateTime<Utc> = DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| invalid("time", t, "is out of range"))?;

    let volume = decimal_field(record, "volume", t)?
        .ok_or_else(|| missing("volume", t))?
        .abs();
    let price = decimal_field(record, "price", t)?.ok_or_else(|| missing("price", t))?;
    let profit = decimal_field(record, "profit", t)?.ok_or_else(|| missing("profit", t))?;
    let commission = decimal_field(record, "commission", t)?.unwrap_or(Decimal::ZERO);
    let swap = decimal_field(record, "swap", t)?.unwrap_or(Decimal::ZERO);

    Ok(Some(RawDeal {
        ticket,
        position_id,
        entry_type,
        direction,
        symbol,
        volume,
        price,
        profit,
        commission,
        swap,
        time,
    }))
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn int_field(
    record: &DealRecord,
    field: &str,
    ticket: Option<i64>,
) -> Result<Option<i64>, DealParseError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_i64() {
                Ok(Some(v))
            } else if n.is_u64() {
                Err(invalid(field, ticket, "does not fit in a 64-bit integer"))
            } else {
                Err(invalid(
                    field,
                    ticket,
                    &format!("expected an integer, got {}", n),
                ))
            }
        }
        Some(other) => Err(invalid(
            field,
            ticket,
            &format!("expected an integer, got {}", kind(other)),
        )),
    }
}

fn decimal_field(
    record: &DealRecord,
    field: &str,
    ticket: Option<i64>,
) -> Result<Option<Decimal>, DealParseError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .map(Some)
                .map_err(|e| invalid(field, ticket, &format!("'{}' is not a decimal: {}", text, e)))
        }
        Some(other) => Err(invalid(
            field,
            ticket,
            &format!("expected a number, got {}", kind(other)),
        )),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn missing(field: &str, ticket: Option<i64>) -> DealParseError {
    invalid(field, ticket, "is missing")
}

fn invalid(field: &str, ticket: Option<i64>, reason: &str) -> DealParseError {
    DealParseError {
        ticket,
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn record(value: Value) -> DealRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("test record must be an object"),
        }
    }

    fn trade(ticket: i64, position_id: i64, type_code: i64, entry: i64, time: i64) -> DealRecord {
        record(json!({
            "ticket": ticket,
            "order": ticket + 1000,
            "time": time,
            "time_msc": time * 1000,
            "type": type_code,
            "entry": entry,
            "magic": 0,
            "position_id": position_id,
            "reason": 0,
            "volume": 0.1,
            "price": 1.0852,
            "commission": -0.35,
            "swap": 0.0,
            "profit": 4.2,
            "fee": 0.0,
            "symbol": "EURUSD",
            "comment": "",
            "external_id": ""
        }))
    }

    #[test]
    fn test_parses_trade_deal() {
        let deal = parse_deal(&trade(77, 5, 1, 1, 200)).unwrap().unwrap();
        assert_eq!(deal.ticket, 77);
        assert_eq!(deal.position_id, Some(5));
        assert_eq!(deal.direction, Direction::Sell);
        assert_eq!(deal.entry_type, EntryType::Exit);
        assert_eq!(deal.volume, dec!(0.1));
        assert_eq!(deal.price, dec!(1.0852));
        assert_eq!(deal.profit, dec!(4.2));
        assert_eq!(deal.commission, dec!(-0.35));
        assert_eq!(deal.time.timestamp(), 200);
    }

    #[test]
    fn test_never_emits_non_trade_types() {
        let mut records = Vec::new();
        for type_code in 0..=18 {
            records.push(trade(100 + type_code, 9, type_code, 0, 1_700_000_000));
        }
        let out = normalize_deals(&records);

        assert_eq!(out.deals.len(), 2);
        assert_eq!(out.filtered, 17);
        assert!(out.rejected.is_empty());
        assert!(out
            .deals
            .iter()
            .all(|d| matches!(d.direction, Direction::Buy | Direction::Sell)));
    }

    #[test]
    fn test_balance_operation_is_filtered() {
        let balance = record(json!({
            "ticket": 1, "type": 2, "entry": 0, "position_id": 0,
            "time": 1_700_000_000, "volume": 0.0, "price": 0.0,
            "profit": 10000.0, "symbol": ""
        }));
        let out = normalize_deals(&[balance]);
        assert!(out.deals.is_empty());
        assert_eq!(out.filtered, 1);
    }

    #[test]
    fn test_zero_position_id_falls_back_to_ticket() {
        let deal = parse_deal(&trade(55, 0, 0, 1, 300)).unwrap().unwrap();
        assert_eq!(deal.position_id, None);
        assert_eq!(deal.position_key(), 55);

        let mut rec = trade(56, 0, 0, 1, 300);
        rec.remove("position_id");
        assert_eq!(parse_deal(&rec).unwrap().unwrap().position_key(), 56);
    }

    #[test]
    fn test_volume_is_absolute() {
        let mut rec = trade(10, 3, 0, 0, 300);
        rec.insert("volume".to_string(), json!(-2.5));
        assert_eq!(parse_deal(&rec).unwrap().unwrap().volume, dec!(2.5));
    }

    #[test]
    fn test_rejects_string_numbers() {
        let mut rec = trade(10, 3, 0, 0, 300);
        rec.insert("profit".to_string(), json!("12.5"));
        let out = normalize_deals(&[rec]);

        assert!(out.deals.is_empty());
        assert_eq!(out.rejected.len(), 1);
        let err = &out.rejected[0];
        assert_eq!(err.ticket, Some(10));
        assert_eq!(err.field, "profit");
        assert!(err.reason.contains("a string"));
    }

    #[test]
    fn test_rejects_fractional_integer_fields() {
        let mut rec = trade(10, 3, 0, 0, 300);
        rec.insert("time".to_string(), json!(300.5));
        let err = parse_deal(&rec).unwrap_err();
        assert_eq!(err.field, "time");
    }

    #[test]
    fn test_rejects_missing_ticket_and_symbol() {
        let mut rec = trade(10, 3, 0, 0, 300);
        rec.remove("ticket");
        let err = parse_deal(&rec).unwrap_err();
        assert_eq!(err.field, "ticket");
        assert_eq!(err.ticket, None);

        let mut rec = trade(11, 3, 0, 0, 300);
        rec.insert("symbol".to_string(), json!(""));
        assert_eq!(parse_deal(&rec).unwrap_err().field, "symbol");
    }

    #[test]
    fn test_small_float_in_scientific_notation() {
        let mut rec = trade(12, 3, 0, 0, 300);
        rec.insert("commission".to_string(), json!(-0.0000001));
        let deal = parse_deal(&rec).unwrap().unwrap();
        assert_eq!(deal.commission, dec!(-0.0000001));
    }

    #[test]
    fn test_missing_entry_defaults_to_other() {
        let mut rec = trade(13, 3, 0, 0, 300);
        rec.remove("entry");
        assert_eq!(
            parse_deal(&rec).unwrap().unwrap().entry_type,
            EntryType::Other
        );
    }
}
