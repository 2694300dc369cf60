use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields that are local bookkeeping and never leave the process.
pub const LOCAL_FIELDS: [&str; 3] = ["operationDescription", "operationId", "operationName"];

/// A JSON object message with an optional correlation id.
///
/// `id` pairs a request with its reply. A message without an id is
/// unsolicited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            fields: Map::new(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// Builder form of [`Message::insert`].
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Drop the local bookkeeping fields.
    pub fn strip_local_fields(&mut self) {
        for key in LOCAL_FIELDS {
            self.fields.remove(key);
        }
    }

    /// Build a reply carrying this message's id.
    pub fn reply(&self) -> Self {
        Self {
            id: self.id.clone(),
            fields: Map::new(),
        }
    }

    pub fn into_value(self) -> Value {
        let mut fields = self.fields;
        if let Some(id) = self.id {
            fields.insert("id".to_string(), Value::String(id));
        }
        Value::Object(fields)
    }
}

impl TryFrom<Value> for Message {
    type Error = Value;

    /// Accepts any JSON object. A non-string `id` is kept as a plain field,
    /// so the message counts as unsolicited. Other values are handed back.
    fn try_from(value: Value) -> Result<Self, Value> {
        let Value::Object(mut fields) = value else {
            return Err(value);
        };
        let id = match fields.remove("id") {
            Some(Value::String(id)) => Some(id),
            Some(other) => {
                fields.insert("id".to_string(), other);
                None
            }
            None => None,
        };
        Ok(Self { id, fields })
    }
}

impl From<Message> for Value {
    fn from(message: Message) -> Self {
        message.into_value()
    }
}
