use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Envelope addressed between endpoints.
///
/// Conditions select mail by its destination URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail<T = Value> {
    /// Conversation id, shared by a request and its replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Url>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Delivery timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    pub data: T,
}

impl<T> Mail<T> {
    pub fn new(data: T) -> Self {
        Self {
            cid: None,
            id: None,
            from: None,
            to: None,
            kind: None,
            timeout: None,
            data,
        }
    }

    pub fn with_to(mut self, to: Url) -> Self {
        self.to = Some(to);
        self
    }

    pub fn with_from(mut self, from: Url) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }
}
