use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

#[derive(Debug, Deserialize)]
pub struct InitiatePushRequest {
    pub transaction_id: String,
    pub phone_number: String,
    pub description: Option<String>,
}

/// Envelope the gateway posts to the callback route.
#[derive(Debug, Deserialize)]
pub struct CallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata")]
    pub callback_metadata: Option<CallbackMetadata>,
}

/// Variable-shape list of name/value pairs; present on success only, and any
/// individual item may be missing.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub item: Vec<MetadataItem>,
}

#[derive(Debug, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: Option<Value>,
}

impl StkCallback {
    fn metadata_value(&self, name: &str) -> Option<&Value> {
        self.callback_metadata
            .as_ref()?
            .item
            .iter()
            .find(|item| item.name == name)?
            .value
            .as_ref()
    }

    fn metadata_string(&self, name: &str) -> Option<String> {
        match self.metadata_value(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn receipt_number(&self) -> Option<String> {
        self.metadata_string("MpesaReceiptNumber")
    }

    pub fn paid_amount(&self) -> Option<Decimal> {
        match self.metadata_value("Amount")? {
            Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            Value::String(s) => Decimal::from_str(s).ok(),
            _ => None,
        }
    }

    pub fn phone_number(&self) -> Option<String> {
        self.metadata_string("PhoneNumber")
    }

    /// Raw `YYYYMMDDHHMMSS` payment timestamp as delivered by the gateway.
    pub fn transaction_date(&self) -> Option<String> {
        self.metadata_string("TransactionDate")
    }
}

/// Receipt acknowledgement; the gateway redelivers anything else.
#[derive(Debug, Serialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    result_code: i64,
    #[serde(rename = "ResultDesc")]
    result_desc: &'static str,
}

impl CallbackAck {
    pub fn success() -> Self {
        Self {
            result_code: 0,
            result_desc: "Success",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUCCESS_CALLBACK: &str = r#"{
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": "ws_CO_191220191020363925",
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        {"Name": "Amount", "Value": 500.00},
                        {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                        {"Name": "TransactionDate", "Value": 20191219102115},
                        {"Name": "PhoneNumber", "Value": 254712345678}
                    ]
                }
            }
        }
    }"#;

    const FAILED_CALLBACK: &str = r#"{
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": "ws_CO_191220191020363925",
                "ResultCode": 1032,
                "ResultDesc": "Request cancelled by user"
            }
        }
    }"#;

    #[test]
    fn parses_success_callback_with_metadata() {
        let envelope: CallbackEnvelope = serde_json::from_str(SUCCESS_CALLBACK).unwrap();
        let callback = envelope.body.stk_callback;
        assert_eq!(callback.checkout_request_id, "ws_CO_191220191020363925");
        assert_eq!(callback.result_code, 0);
        assert_eq!(callback.receipt_number().as_deref(), Some("NLJ7RT61SV"));
        assert_eq!(callback.paid_amount(), Some(Decimal::from(500)));
        assert_eq!(callback.phone_number().as_deref(), Some("254712345678"));
        assert_eq!(callback.transaction_date().as_deref(), Some("20191219102115"));
    }

    #[test]
    fn parses_failure_callback_without_metadata() {
        let envelope: CallbackEnvelope = serde_json::from_str(FAILED_CALLBACK).unwrap();
        let callback = envelope.body.stk_callback;
        assert_eq!(callback.result_code, 1032);
        assert!(callback.callback_metadata.is_none());
        assert!(callback.receipt_number().is_none());
        assert!(callback.paid_amount().is_none());
        assert!(callback.transaction_date().is_none());
    }

    #[test]
    fn tolerates_partial_metadata() {
        let json = r#"{
            "Body": {
                "stkCallback": {
                    "CheckoutRequestID": "ws_CO_1",
                    "ResultCode": 0,
                    "ResultDesc": "ok",
                    "CallbackMetadata": {
                        "Item": [
                            {"Name": "Amount", "Value": 250},
                            {"Name": "Balance"}
                        ]
                    }
                }
            }
        }"#;
        let envelope: CallbackEnvelope = serde_json::from_str(json).unwrap();
        let callback = envelope.body.stk_callback;
        assert_eq!(callback.paid_amount(), Some(Decimal::from(250)));
        assert!(callback.receipt_number().is_none());
        assert!(callback.phone_number().is_none());
    }

    #[test]
    fn rejects_envelope_without_stk_callback() {
        let json = r#"{"Body": {}}"#;
        assert!(serde_json::from_str::<CallbackEnvelope>(json).is_err());
    }

    #[test]
    fn ack_matches_the_gateway_contract() {
        let ack = serde_json::to_value(CallbackAck::success()).unwrap();
        assert_eq!(ack["ResultCode"], 0);
        assert_eq!(ack["ResultDesc"], "Success");
    }
}
