//! Wire-message codec.
//!
//! The wire format is a JSON array whose first element is a string tag:
//!
//! | direction      | tag      | shape                                     |
//! |----------------|----------|-------------------------------------------|
//! | client → relay | `REQ`    | `["REQ", subscription_id, filter, ...]`   |
//! | client → relay | `CLOSE`  | `["CLOSE", subscription_id]`              |
//! | relay → client | `EVENT`  | `["EVENT", subscription_id, event]`       |
//! | relay → client | `NOTICE` | `["NOTICE", message]`                     |
//!
//! Encoding and decoding are stateless and per-message: a decode failure
//! yields a typed error the caller can log and skip without tearing down
//! the connection.

use serde_json::Value;

use crate::error::{ProtocolError, Result};
use crate::event::Event;
use crate::filter::{Filter, Subscription};

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    Close {
        subscription_id: String,
    },
}

/// Messages received from a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event {
        subscription_id: String,
        event: Event,
    },
    Notice {
        message: String,
    },
}

impl ClientMessage {
    /// REQ for a subscription.
    pub fn req(subscription: &Subscription) -> Self {
        Self::Req {
            subscription_id: subscription.id.clone(),
            filters: subscription.filters.clone(),
        }
    }

    /// CLOSE for a subscription id.
    pub fn close(subscription_id: impl Into<String>) -> Self {
        Self::Close {
            subscription_id: subscription_id.into(),
        }
    }

    pub fn to_wire(&self) -> Result<String> {
        let value = match self {
            Self::Req {
                subscription_id,
                filters,
            } => {
                // Filters spread as sibling array elements, not nested.
                let mut parts = Vec::with_capacity(filters.len() + 2);
                parts.push(Value::String("REQ".to_string()));
                parts.push(Value::String(subscription_id.clone()));
                for filter in filters {
                    parts.push(serde_json::to_value(filter)?);
                }
                Value::Array(parts)
            }
            Self::Close { subscription_id } => {
                serde_json::json!(["CLOSE", subscription_id])
            }
        };
        Ok(value.to_string())
    }

    pub fn from_wire(text: &str) -> Result<Self> {
        let (tag, array) = split_tagged_array(text)?;
        match tag.as_str() {
            "REQ" => {
                let subscription_id = element_str(&array, 1, "REQ subscription id")?;
                let filters = array[2..]
                    .iter()
                    .map(|value| {
                        serde_json::from_value(value.clone()).map_err(|error| {
                            ProtocolError::Malformed(format!("REQ filter: {error}"))
                        })
                    })
                    .collect::<Result<Vec<Filter>>>()?;
                Ok(Self::Req {
                    subscription_id,
                    filters,
                })
            }
            "CLOSE" => Ok(Self::Close {
                subscription_id: element_str(&array, 1, "CLOSE subscription id")?,
            }),
            other => Err(ProtocolError::UnknownMessageType(other.to_string())),
        }
    }
}

impl RelayMessage {
    pub fn to_wire(&self) -> Result<String> {
        let value = match self {
            Self::Event {
                subscription_id,
                event,
            } => serde_json::json!(["EVENT", subscription_id, event]),
            Self::Notice { message } => serde_json::json!(["NOTICE", message]),
        };
        Ok(value.to_string())
    }

    pub fn from_wire(text: &str) -> Result<Self> {
        let (tag, array) = split_tagged_array(text)?;
        match tag.as_str() {
            "EVENT" => {
                let subscription_id = element_str(&array, 1, "EVENT subscription id")?;
                let payload = array
                    .get(2)
                    .ok_or_else(|| ProtocolError::Malformed("EVENT is missing its payload".to_string()))?;
                let event: Event = serde_json::from_value(payload.clone())
                    .map_err(|error| ProtocolError::Malformed(format!("EVENT payload: {error}")))?;
                Ok(Self::Event {
                    subscription_id,
                    event,
                })
            }
            "NOTICE" => Ok(Self::Notice {
                message: element_str(&array, 1, "NOTICE text")?,
            }),
            other => Err(ProtocolError::UnknownMessageType(other.to_string())),
        }
    }
}

fn split_tagged_array(text: &str) -> Result<(String, Vec<Value>)> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Array(array) = value else {
        return Err(ProtocolError::Malformed(
            "message must be a JSON array".to_string(),
        ));
    };
    let tag = array
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed("message is missing its type tag".to_string()))?
        .to_string();
    Ok((tag, array))
}

fn element_str(array: &[Value], index: usize, what: &str) -> Result<String> {
    array
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::Malformed(format!("{what} must be a string")))
}
