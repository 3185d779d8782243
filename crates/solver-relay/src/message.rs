//! Relay wire frames.
//!
//! The bus speaks JSON-RPC-shaped frames. Inbound traffic falls into
//! three classes, distinguished by shape: replies carrying `result` or
//! `error` for a known `id`, and events addressed by subscription id.

use serde::{Deserialize, Serialize};
use solver_core::QuoteRequest;

/// Relay error code for "not found or already finished": another solver
/// won the quote.
pub const SOLVER_LOST_CODE: i64 = -32098;

/// Outbound JSON-RPC request.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: serde_json::Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }

    /// Channel subscription request.
    pub fn subscribe(id: u64, channel: &str) -> Self {
        Self::new(id, "subscribe", serde_json::json!([channel]))
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).expect("rpc request serializes")
    }
}

/// Quote request as carried on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteRequestData {
    pub quote_id: String,
    pub defuse_asset_identifier_in: String,
    pub defuse_asset_identifier_out: String,
    #[serde(default)]
    pub exact_amount_in: Option<String>,
    #[serde(default)]
    pub exact_amount_out: Option<String>,
    #[serde(default)]
    pub min_deadline_ms: i64,
}

impl From<QuoteRequestData> for QuoteRequest {
    fn from(data: QuoteRequestData) -> Self {
        Self {
            quote_id: data.quote_id,
            token_in: data.defuse_asset_identifier_in,
            token_out: data.defuse_asset_identifier_out,
            amount_in: data.exact_amount_in,
            amount_out: data.exact_amount_out,
            min_deadline_ms: data.min_deadline_ms,
        }
    }
}

/// Settlement notification payload.
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementData {
    pub quote_hash: String,
    #[serde(default)]
    pub intent_hash: String,
    #[serde(default)]
    pub tx_hash: Option<String>,
}

/// Signed-intent envelope published with a quote.
#[derive(Debug, Clone, Serialize)]
pub struct SignedData {
    pub standard: String,
    pub payload: SignedPayload,
    pub signature: String,
    pub public_key: String,
}

/// The signed payload: message text, base64 nonce, recipient contract.
#[derive(Debug, Clone, Serialize)]
pub struct SignedPayload {
    pub message: String,
    pub nonce: String,
    pub recipient: String,
}

/// The computed side of a published quote.
#[derive(Debug, Clone, Serialize)]
pub struct QuoteOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_out: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_in: Option<String>,
}

/// Full quote response parameter object.
#[derive(Debug, Clone, Serialize)]
pub struct QuoteResponsePayload {
    pub quote_id: String,
    pub quote_output: QuoteOutput,
    pub signed_data: SignedData,
}

/// Inbound frame, classified by shape.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// Reply carrying `result` for a request id.
    Ack { id: u64, result: serde_json::Value },
    /// Reply carrying `error` for a request id.
    Error {
        id: u64,
        code: i64,
        message: String,
    },
    /// Event addressed by subscription id.
    Event {
        subscription: String,
        data: serde_json::Value,
    },
    /// Anything else; logged and dropped.
    Unknown,
}

/// Classify a raw frame.
pub fn classify_frame(value: &serde_json::Value) -> InboundFrame {
    if let Some(id) = value.get("id").and_then(|v| v.as_u64()) {
        if let Some(error) = value.get("error") {
            let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown relay error")
                .to_string();
            return InboundFrame::Error { id, code, message };
        }
        if let Some(result) = value.get("result") {
            return InboundFrame::Ack {
                id,
                result: result.clone(),
            };
        }
    }

    if value.get("method").is_some() {
        if let Some(params) = value.get("params") {
            if let Some(subscription) = params.get("subscription").and_then(|s| s.as_str()) {
                let data = params.get("data").cloned().unwrap_or(serde_json::Value::Null);
                return InboundFrame::Event {
                    subscription: subscription.to_string(),
                    data,
                };
            }
        }
    }

    InboundFrame::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_frame_shape() {
        let frame = RpcRequest::subscribe(3, "quote");
        let text = frame.to_text();
        assert_eq!(
            text,
            r#"{"jsonrpc":"2.0","id":3,"method":"subscribe","params":["quote"]}"#
        );
    }

    #[test]
    fn test_classify_ack() {
        let value = serde_json::json!({"id": 3, "result": "sub-abc"});
        match classify_frame(&value) {
            InboundFrame::Ack { id, result } => {
                assert_eq!(id, 3);
                assert_eq!(result, serde_json::json!("sub-abc"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_classify_error() {
        let value = serde_json::json!({
            "id": 9,
            "error": {"code": -32098, "message": "not found or already finished"}
        });
        match classify_frame(&value) {
            InboundFrame::Error { id, code, message } => {
                assert_eq!(id, 9);
                assert_eq!(code, SOLVER_LOST_CODE);
                assert!(message.contains("already finished"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_classify_event() {
        let value = serde_json::json!({
            "method": "event",
            "params": {"subscription": "sub-abc", "data": {"quote_id": "q1"}}
        });
        match classify_frame(&value) {
            InboundFrame::Event { subscription, data } => {
                assert_eq!(subscription, "sub-abc");
                assert_eq!(data["quote_id"], "q1");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_classify_unknown() {
        assert!(matches!(
            classify_frame(&serde_json::json!({"hello": 1})),
            InboundFrame::Unknown
        ));
    }

    #[test]
    fn test_quote_request_conversion() {
        let data: QuoteRequestData = serde_json::from_value(serde_json::json!({
            "quote_id": "q-7",
            "defuse_asset_identifier_in": "nep141:btc.omft.near",
            "defuse_asset_identifier_out": "nep141:usdc.omft.near",
            "exact_amount_in": "1000000",
            "min_deadline_ms": 1_700_000_060_000i64,
        }))
        .unwrap();

        let request: QuoteRequest = data.into();
        assert_eq!(request.quote_id, "q-7");
        assert_eq!(request.amount_in.as_deref(), Some("1000000"));
        assert!(request.amount_out.is_none());
        assert!(!request.is_exact_out());
    }

    #[test]
    fn test_quote_output_omits_empty_side() {
        let output = QuoteOutput {
            amount_out: Some("997000000".to_string()),
            amount_in: None,
        };
        let text = serde_json::to_string(&output).unwrap();
        assert_eq!(text, r#"{"amount_out":"997000000"}"#);
    }
}
