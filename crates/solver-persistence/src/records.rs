//! Audit record shapes.
//!
//! Format stability: every record has an ISO-8601 `timestamp` and a
//! `type` tag; readers may rely on those two fields and must tolerate
//! new optional fields.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// ISO-8601 timestamp for record construction.
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Trade lifecycle record: settlement, hedge, expiry events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub nonce: String,
    pub quote_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_btc: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl_estimate_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TradeRecord {
    /// Bare record with only the required fields set.
    pub fn new(event_type: &str, nonce: &str, quote_hash: &str) -> Self {
        Self {
            timestamp: iso_timestamp(),
            event_type: event_type.to_string(),
            nonce: nonce.to_string(),
            quote_hash: quote_hash.to_string(),
            direction: None,
            size_btc: None,
            price: None,
            pnl_estimate_usd: None,
            reason: None,
            error: None,
        }
    }
}

/// Periodic position snapshot from the drift watchdog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub status: String,
    pub net_delta_btc: f64,
    pub drift_alert: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perp_btc: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub btc_on_chain: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usd_on_chain: Option<f64>,
}

impl PositionRecord {
    pub fn new(status: &str, net_delta_btc: f64, drift_alert: bool) -> Self {
        Self {
            timestamp: iso_timestamp(),
            event_type: "POSITION_SNAPSHOT".to_string(),
            status: status.to_string(),
            net_delta_btc,
            drift_alert,
            margin_usd: None,
            perp_btc: None,
            btc_on_chain: None,
            usd_on_chain: None,
        }
    }
}

/// Quote phase trace: one line per lifecycle phase of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteTraceRecord {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub quote_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub btc_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spread_bps: Option<f64>,
}

impl QuoteTraceRecord {
    pub fn new(event_type: &str, quote_id: &str) -> Self {
        Self {
            timestamp: iso_timestamp(),
            event_type: event_type.to_string(),
            quote_id: quote_id.to_string(),
            reason: None,
            amount: None,
            btc_size: None,
            quoted_price: None,
            spread_bps: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_record_minimal_shape() {
        let record = TradeRecord::new("HEDGE_EXECUTED", "n1", "H1");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "HEDGE_EXECUTED");
        assert_eq!(json["nonce"], "n1");
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
        // Optional fields stay off the wire when unset
        assert!(json.get("price").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_position_record_tag() {
        let record = PositionRecord::new("READY", 0.001, false);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "POSITION_SNAPSHOT");
        assert_eq!(json["status"], "READY");
    }

    #[test]
    fn test_trace_round_trip() {
        let mut record = QuoteTraceRecord::new("QUOTE_GENERATED", "q-1");
        record.btc_size = Some(0.01);
        let line = serde_json::to_string(&record).unwrap();
        let back: QuoteTraceRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back.quote_id, "q-1");
        assert_eq!(back.btc_size, Some(0.01));
    }
}
