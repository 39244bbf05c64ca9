// ACME orders

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub status: OrderStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,

    #[serde(default)]
    pub identifiers: Vec<Identifier>,

    #[serde(default)]
    pub authorizations: Vec<String>,

    pub finalize: String,

    /// Present once the order is valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub id_type: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(domain: impl Into<String>) -> Self {
        Self {
            id_type: "dns".to_string(),
            value: domain.into(),
        }
    }
}

/// Body of a newOrder request.
#[derive(Debug, Clone, Serialize)]
pub struct NewOrder {
    pub identifiers: Vec<Identifier>,
}

impl NewOrder {
    pub fn for_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identifiers: domains.into_iter().map(Identifier::dns).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_order_body() {
        let body = serde_json::to_value(NewOrder::for_domains(["example.com"])).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"identifiers": [{"type": "dns", "value": "example.com"}]})
        );
    }

    #[test]
    fn test_order_deserialization() {
        let order: Order = serde_json::from_str(
            r#"{
                "status": "valid",
                "expires": "2026-01-01T00:00:00Z",
                "identifiers": [{"type": "dns", "value": "example.com"}],
                "authorizations": ["https://example.com/acme/authz/1"],
                "finalize": "https://example.com/acme/order/1/finalize",
                "certificate": "https://example.com/acme/cert/1"
            }"#,
        )
        .unwrap();

        assert_eq!(order.status, OrderStatus::Valid);
        assert_eq!(order.identifiers[0], Identifier::dns("example.com"));
        assert!(order.expires.is_some());
        assert_eq!(order.certificate.as_deref(), Some("https://example.com/acme/cert/1"));
    }
}
