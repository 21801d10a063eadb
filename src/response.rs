//! Standard response envelope helpers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HttpError;

/// User-facing message pair carried by every envelope.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub title: String,
    pub message: String,
}

impl Message {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Message {
            title: title.into(),
            message: message.into(),
        }
    }
}

impl From<Message> for Value {
    fn from(m: Message) -> Self {
        serde_json::json!({ "title": m.title, "message": m.message })
    }
}

/// Success envelope: `data`'s fields merged with `{messageCode: 0, message}`.
/// Non-object data is placed under `data`.
pub fn success<T: Serialize>(message: Message, data: T) -> Result<Value, HttpError> {
    let value = serde_json::to_value(data).map_err(|e| HttpError::internal(e.to_string()))?;
    let mut map = match value {
        Value::Object(m) => m,
        Value::Null => Map::new(),
        other => {
            let mut m = Map::new();
            m.insert("data".into(), other);
            m
        }
    };
    map.insert("messageCode".into(), Value::from(0));
    map.insert("message".into(), message.into());
    Ok(Value::Object(map))
}

/// Business failure carried by a rejected deferred reply.
pub fn failure(message_code: i64, message: Message) -> HttpError {
    HttpError::new(message_code, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_merges_payload() {
        let v = success(Message::new("Ok", "Done"), json!({ "foo": 1 })).unwrap();
        assert_eq!(
            v,
            json!({ "foo": 1, "messageCode": 0, "message": { "title": "Ok", "message": "Done" } })
        );
    }

    #[test]
    fn unserializable_data_is_a_server_error() {
        let data = std::collections::HashMap::from([((1, 2), 3)]);
        let err = success(Message::new("Ok", "Done"), data).unwrap_err();
        assert_eq!(err.status, Some(axum::http::StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn success_wraps_scalars() {
        let v = success(Message::new("Ok", "Done"), vec![1, 2]).unwrap();
        assert_eq!(v["data"], json!([1, 2]));
        assert_eq!(v["messageCode"], 0);
    }
}
