//! Minimal WAMP v2 (JSON serialization) codec for a subscriber-only client.
//!
//! Only the messages a subscriber needs are modelled. Each message is a JSON
//! array whose first element is the message type code.

use error_stack::{Report, ResultExt};
use serde_json::{Value, json};

use crate::error::WampError;

/// WebSocket subprotocol negotiated for JSON-serialized WAMP v2.
pub const SUBPROTOCOL: &str = "wamp.2.json";

/// Reason URI sent when the client ends a session on its own.
pub const CLOSE_NORMAL: &str = "wamp.close.normal";

const HELLO: u64 = 1;
const WELCOME: u64 = 2;
const ABORT: u64 = 3;
const GOODBYE: u64 = 6;
const ERROR: u64 = 8;
/// Also echoed as the request type of an ERROR reply to a subscription.
pub const SUBSCRIBE: u64 = 32;
const SUBSCRIBED: u64 = 33;
const EVENT: u64 = 36;

#[derive(Debug, Clone, PartialEq)]
pub enum WampMessage {
    Hello {
        realm: String,
    },
    Welcome {
        session: u64,
    },
    Abort {
        reason: String,
    },
    Goodbye {
        reason: String,
    },
    Error {
        request_type: u64,
        request: u64,
        error: String,
    },
    Subscribe {
        request: u64,
        topic: String,
    },
    Subscribed {
        request: u64,
        subscription: u64,
    },
    Event {
        subscription: u64,
        publication: u64,
        args: Vec<Value>,
    },
}

impl WampMessage {
    pub fn encode(&self) -> String {
        let value = match self {
            Self::Hello { realm } => json!([HELLO, realm, { "roles": { "subscriber": {} } }]),
            Self::Welcome { session } => json!([WELCOME, session, { "roles": { "broker": {} } }]),
            Self::Abort { reason } => json!([ABORT, {}, reason]),
            Self::Goodbye { reason } => json!([GOODBYE, {}, reason]),
            Self::Error {
                request_type,
                request,
                error,
            } => json!([ERROR, request_type, request, {}, error]),
            Self::Subscribe { request, topic } => json!([SUBSCRIBE, request, {}, topic]),
            Self::Subscribed {
                request,
                subscription,
            } => json!([SUBSCRIBED, request, subscription]),
            Self::Event {
                subscription,
                publication,
                args,
            } => json!([EVENT, subscription, publication, {}, args]),
        };
        value.to_string()
    }

    pub fn decode(text: &str) -> Result<Self, Report<WampError>> {
        let value: Value = serde_json::from_str(text)
            .change_context(WampError::Malformed {
                reason: "not JSON".into(),
            })
            .attach_with(|| format!("payload: {text}"))?;

        let fields = value.as_array().ok_or_else(|| {
            Report::new(WampError::Malformed {
                reason: "not an array".into(),
            })
        })?;

        let code = uint(fields, 0)?;
        let message = match code {
            WELCOME => Self::Welcome {
                session: uint(fields, 1)?,
            },
            ABORT => Self::Abort {
                reason: string(fields, 2)?,
            },
            GOODBYE => Self::Goodbye {
                reason: string(fields, 2)?,
            },
            ERROR => Self::Error {
                request_type: uint(fields, 1)?,
                request: uint(fields, 2)?,
                error: string(fields, 4)?,
            },
            SUBSCRIBED => Self::Subscribed {
                request: uint(fields, 1)?,
                subscription: uint(fields, 2)?,
            },
            EVENT => Self::Event {
                subscription: uint(fields, 1)?,
                publication: uint(fields, 2)?,
                args: fields
                    .get(4)
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
            },
            HELLO => Self::Hello {
                realm: string(fields, 1)?,
            },
            SUBSCRIBE => Self::Subscribe {
                request: uint(fields, 1)?,
                topic: string(fields, 3)?,
            },
            other => return Err(Report::new(WampError::Unsupported { code: other })),
        };
        Ok(message)
    }
}

fn uint(fields: &[Value], index: usize) -> Result<u64, Report<WampError>> {
    fields.get(index).and_then(Value::as_u64).ok_or_else(|| {
        Report::new(WampError::Malformed {
            reason: format!("expected integer at position {index}"),
        })
    })
}

fn string(fields: &[Value], index: usize) -> Result<String, Report<WampError>> {
    fields
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| {
            Report::new(WampError::Malformed {
                reason: format!("expected string at position {index}"),
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_announces_subscriber_role() {
        let text = WampMessage::Hello {
            realm: "realm1".into(),
        }
        .encode();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value[0], 1);
        assert_eq!(value[1], "realm1");
        assert!(value[2]["roles"]["subscriber"].is_object());
    }

    #[test]
    fn subscribe_puts_topic_last() {
        let text = WampMessage::Subscribe {
            request: 7,
            topic: "ticker".into(),
        }
        .encode();
        assert_eq!(text, r#"[32,7,{},"ticker"]"#);
    }

    #[test]
    fn decodes_welcome_and_subscribed() {
        assert_eq!(
            WampMessage::decode(r#"[2, 9129137332, {"roles": {"broker": {}}}]"#).unwrap(),
            WampMessage::Welcome {
                session: 9129137332
            }
        );
        assert_eq!(
            WampMessage::decode("[33, 1, 5512315355]").unwrap(),
            WampMessage::Subscribed {
                request: 1,
                subscription: 5512315355
            }
        );
    }

    #[test]
    fn decodes_event_args() {
        let message = WampMessage::decode(
            r#"[36, 5512315355, 4429313566, {}, ["BTC_ETH", "0.06", "0.0601", "0.0599", "-0.01"]]"#,
        )
        .unwrap();
        let WampMessage::Event { args, .. } = message else {
            panic!("expected event, got {message:?}");
        };
        assert_eq!(args.len(), 5);
        assert_eq!(args[0], "BTC_ETH");
        assert_eq!(args[1], "0.06");
    }

    #[test]
    fn event_without_args_decodes_empty() {
        let message = WampMessage::decode("[36, 1, 2, {}]").unwrap();
        assert_eq!(
            message,
            WampMessage::Event {
                subscription: 1,
                publication: 2,
                args: Vec::new()
            }
        );
    }

    #[test]
    fn decodes_session_endings() {
        assert_eq!(
            WampMessage::decode(r#"[3, {"message": "no such realm"}, "wamp.error.no_such_realm"]"#)
                .unwrap(),
            WampMessage::Abort {
                reason: "wamp.error.no_such_realm".into()
            }
        );
        assert_eq!(
            WampMessage::decode(r#"[6, {}, "wamp.close.system_shutdown"]"#).unwrap(),
            WampMessage::Goodbye {
                reason: "wamp.close.system_shutdown".into()
            }
        );
        assert_eq!(
            WampMessage::decode(r#"[8, 32, 1, {}, "wamp.error.not_authorized"]"#).unwrap(),
            WampMessage::Error {
                request_type: 32,
                request: 1,
                error: "wamp.error.not_authorized".into()
            }
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(WampMessage::decode("hello").is_err());
        assert!(WampMessage::decode(r#"{"type": 2}"#).is_err());
        assert!(WampMessage::decode(r#"["2", 1]"#).is_err());
        assert!(WampMessage::decode("[33, 1]").is_err());
    }

    #[test]
    fn rejects_unsupported_codes() {
        let report = WampMessage::decode(r#"[4, "ticket", {}]"#).unwrap_err();
        assert!(matches!(
            report.current_context(),
            WampError::Unsupported { code: 4 }
        ));
    }

    #[test]
    fn server_side_messages_decode_back() {
        let messages = [
            WampMessage::Welcome { session: 1 },
            WampMessage::Subscribed {
                request: 1,
                subscription: 2,
            },
            WampMessage::Event {
                subscription: 2,
                publication: 3,
                args: vec![json!("BTC_XMR"), json!("0.01")],
            },
        ];
        for message in messages {
            assert_eq!(WampMessage::decode(&message.encode()).unwrap(), message);
        }
    }
}
