//! KIS WebSocket Control Messages
//!
//! JSON messages exchanged on the streaming connection. Data frames use a
//! delimited text format instead and are handled by the codec.
//!
//! # Subscribe (client → server)
//!
//! ```json
//! {
//!   "header": {"approval_key": "...", "custtype": "P", "tr_type": "1", "content-type": "utf-8"},
//!   "body": {"input": {"tr_id": "H0STCNT0", "tr_key": "005930"}}
//! }
//! ```
//!
//! # Control frame (server → client)
//!
//! ```json
//! {
//!   "header": {"tr_id": "H0STCNT0", "tr_key": "005930", "encrypt": "N"},
//!   "body": {"rt_cd": "1", "msg_cd": "OPSP0000", "msg1": "SUBSCRIBE SUCCESS"}
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::application::ports::ApprovalKey;

/// Transaction id of real-time contract price updates.
pub const CONTRACT_PRICE_TR_ID: &str = "H0STCNT0";

/// Customer type for individual accounts.
pub const CUSTOMER_TYPE_PERSONAL: &str = "P";

/// Transaction type that registers a subscription.
pub const TR_TYPE_REGISTER: &str = "1";

/// Result code carried by subscription acknowledgments.
pub const ACK_RESULT_CODE: &str = "1";

// =============================================================================
// Subscribe Message
// =============================================================================

/// Header of a subscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeHeader {
    /// Approval key from the token exchange.
    pub approval_key: String,
    /// Customer type.
    pub custtype: String,
    /// Transaction type.
    pub tr_type: String,
    /// Payload encoding.
    #[serde(rename = "content-type")]
    pub content_type: String,
}

/// Subscription target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeInput {
    /// Transaction id of the update stream.
    pub tr_id: String,
    /// Symbol to subscribe.
    pub tr_key: String,
}

/// Body of a subscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeBody {
    /// Subscription target.
    pub input: SubscribeInput,
}

/// A per-symbol subscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeMessage {
    /// Fixed header.
    pub header: SubscribeHeader,
    /// Target.
    pub body: SubscribeBody,
}

impl SubscribeMessage {
    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Symbol this message subscribes to.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.body.input.tr_key
    }
}

/// Build the contract-price subscribe request for one symbol.
#[must_use]
pub fn build_subscribe_message(key: &ApprovalKey, symbol: &str) -> SubscribeMessage {
    SubscribeMessage {
        header: SubscribeHeader {
            approval_key: key.as_str().to_string(),
            custtype: CUSTOMER_TYPE_PERSONAL.to_string(),
            tr_type: TR_TYPE_REGISTER.to_string(),
            content_type: "utf-8".to_string(),
        },
        body: SubscribeBody {
            input: SubscribeInput {
                tr_id: CONTRACT_PRICE_TR_ID.to_string(),
                tr_key: symbol.to_string(),
            },
        },
    }
}

// =============================================================================
// Control Frames
// =============================================================================

/// Header of a server control frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ControlHeader {
    /// Transaction id.
    #[serde(default)]
    pub tr_id: String,
    /// Symbol, when the frame concerns one.
    #[serde(default)]
    pub tr_key: Option<String>,
}

/// Body of a server control frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ControlBody {
    /// Result code.
    #[serde(default)]
    pub rt_cd: Option<String>,
    /// Message code.
    #[serde(default)]
    pub msg_cd: Option<String>,
    /// Human-readable message.
    #[serde(default)]
    pub msg1: Option<String>,
}

/// A JSON frame received from the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ControlFrame {
    /// Frame header.
    #[serde(default)]
    pub header: ControlHeader,
    /// Frame body, absent on keepalive frames.
    #[serde(default)]
    pub body: Option<ControlBody>,
}

impl ControlFrame {
    /// Parse a JSON control frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Whether this acknowledges a contract-price subscription.
    #[must_use]
    pub fn is_subscription_ack(&self) -> bool {
        self.header.tr_id == CONTRACT_PRICE_TR_ID
            && self.result_code() == Some(ACK_RESULT_CODE)
    }

    /// Result code, if any.
    #[must_use]
    pub fn result_code(&self) -> Option<&str> {
        self.body.as_ref().and_then(|b| b.rt_cd.as_deref())
    }

    /// Server message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.body.as_ref().and_then(|b| b.msg1.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn subscribe_message_wire_shape() {
        let key = ApprovalKey::new("approval-123").unwrap();
        let message = build_subscribe_message(&key, "005930");
        let value: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "header": {
                    "approval_key": "approval-123",
                    "custtype": "P",
                    "tr_type": "1",
                    "content-type": "utf-8"
                },
                "body": {"input": {"tr_id": "H0STCNT0", "tr_key": "005930"}}
            })
        );
        assert_eq!(message.symbol(), "005930");
    }

    #[test]
    fn acknowledgment_detected() {
        let frame = ControlFrame::parse(
            r#"{"header":{"tr_id":"H0STCNT0","tr_key":"005930","encrypt":"N"},
                "body":{"rt_cd":"1","msg_cd":"OPSP0000","msg1":"SUBSCRIBE SUCCESS"}}"#,
        )
        .unwrap();

        assert!(frame.is_subscription_ack());
        assert_eq!(frame.header.tr_key.as_deref(), Some("005930"));
        assert_eq!(frame.message(), Some("SUBSCRIBE SUCCESS"));
    }

    #[test]
    fn other_result_code_is_not_ack() {
        let frame =
            ControlFrame::parse(r#"{"header":{"tr_id":"H0STCNT0"},"body":{"rt_cd":"0"}}"#).unwrap();
        assert!(!frame.is_subscription_ack());
        assert_eq!(frame.result_code(), Some("0"));
    }

    #[test]
    fn keepalive_frame_without_body() {
        let frame = ControlFrame::parse(
            r#"{"header":{"tr_id":"PINGPONG","datetime":"20240502094434"}}"#,
        )
        .unwrap();
        assert_eq!(frame.header.tr_id, "PINGPONG");
        assert!(frame.body.is_none());
        assert!(!frame.is_subscription_ack());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(ControlFrame::parse("{\"header\":").is_err());
    }
}
