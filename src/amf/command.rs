//! RTMP command and data message codec
//!
//! RTMP invoke/data payloads are a command-name string followed by a fixed,
//! position-significant argument list. The schema tables below name each
//! position so callers can address arguments by name instead of index.
//! Decoding an unrecognized command yields just the bare name and logs a
//! diagnostic; it must not fail the connection.

use bytes::Bytes;

use crate::error::AmfError;

use super::amf0;
use super::value::Amf0Value;

/// Argument names, in wire order, following a command name.
fn command_schema(name: &str) -> Option<&'static [&'static str]> {
    Some(match name {
        "_result" => &["transId", "cmdObj", "info"],
        "_error" => &["transId", "cmdObj", "info", "streamId"],
        "onStatus" => &["transId", "cmdObj", "info"],
        "releaseStream" => &["transId", "cmdObj", "streamName"],
        "getStreamLength" => &["transId", "cmdObj", "streamId"],
        "getMovLen" => &["transId", "cmdObj", "streamId"],
        "FCPublish" => &["transId", "cmdObj", "streamName"],
        "FCUnpublish" => &["transId", "cmdObj", "streamName"],
        "FCSubscribe" => &["transId", "cmdObj", "streamName"],
        "onFCPublish" => &["transId", "cmdObj", "info"],
        "connect" => &["transId", "cmdObj", "args"],
        "call" => &["transId", "cmdObj", "args"],
        "createStream" => &["transId", "cmdObj"],
        "close" => &["transId", "cmdObj"],
        "play" => &["transId", "cmdObj", "streamName", "start", "duration", "reset"],
        "play2" => &["transId", "cmdObj", "params"],
        "deleteStream" => &["transId", "cmdObj", "streamId"],
        "closeStream" => &["transId", "cmdObj"],
        "receiveAudio" => &["transId", "cmdObj", "bool"],
        "receiveVideo" => &["transId", "cmdObj", "bool"],
        "publish" => &["transId", "cmdObj", "streamName", "type"],
        "seek" => &["transId", "cmdObj", "ms"],
        "pause" => &["transId", "cmdObj", "pause", "ms"],
        _ => return None,
    })
}

fn data_schema(name: &str) -> Option<&'static [&'static str]> {
    Some(match name {
        "@setDataFrame" => &["method", "dataObj"],
        "onFI" => &["info"],
        "onMetaData" => &["dataObj"],
        "|RtmpSampleAccess" => &["bool1", "bool2"],
        _ => return None,
    })
}

/// A decoded command or data message: name plus schema-named arguments.
#[derive(Debug, Clone)]
pub struct CommandMessage {
    /// Command name ("connect", "publish", "onMetaData", ...)
    pub name: String,
    values: Vec<(&'static str, Amf0Value)>,
}

impl CommandMessage {
    /// Look up an argument by its schema name.
    pub fn get(&self, key: &str) -> Option<&Amf0Value> {
        self.values.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Transaction id, 0.0 when absent.
    pub fn transaction_id(&self) -> f64 {
        self.get("transId").and_then(|v| v.as_number()).unwrap_or(0.0)
    }

    /// String argument helper.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }
}

fn decode_with(
    buf: &[u8],
    schema: fn(&str) -> Option<&'static [&'static str]>,
    kind: &str,
) -> Result<CommandMessage, AmfError> {
    let (cmd, mut pos) = amf0::decode_one(buf)?;
    let name = match cmd {
        Amf0Value::String(s) => s,
        other => {
            tracing::error!(?other, "{} name is not a string", kind);
            String::new()
        }
    };

    let mut values = Vec::new();
    match schema(&name) {
        Some(fields) => {
            for field in fields {
                if pos >= buf.len() {
                    break;
                }
                let (value, n) = amf0::decode_one(&buf[pos..])?;
                values.push((*field, value));
                pos += n;
            }
        }
        None => {
            tracing::trace!(name = %name, "unhandled {} message", kind);
        }
    }

    Ok(CommandMessage { name, values })
}

/// Decode an AMF0 command message (invoke payload).
pub fn decode_command(buf: &[u8]) -> Result<CommandMessage, AmfError> {
    decode_with(buf, command_schema, "command")
}

/// Decode an AMF0 data message (@setDataFrame, onMetaData, ...).
pub fn decode_data(buf: &[u8]) -> Result<CommandMessage, AmfError> {
    decode_with(buf, data_schema, "data")
}

fn encode_with(
    name: &str,
    args: &[(&str, Amf0Value)],
    schema: fn(&str) -> Option<&'static [&'static str]>,
    kind: &str,
) -> Result<Bytes, AmfError> {
    let mut values = vec![Amf0Value::String(name.to_string())];
    match schema(name) {
        Some(fields) => {
            for field in fields {
                if let Some((_, value)) = args.iter().find(|(k, _)| k == field) {
                    values.push(value.clone());
                }
            }
        }
        None => {
            tracing::error!(name = %name, "unknown {} message", kind);
        }
    }
    amf0::encode_all(&values)
}

/// Encode a command message: name followed by the schema-ordered arguments
/// present in `args`.
pub fn encode_command(name: &str, args: &[(&str, Amf0Value)]) -> Result<Bytes, AmfError> {
    encode_with(name, args, command_schema, "command")
}

/// Encode a data message.
pub fn encode_data(name: &str, args: &[(&str, Amf0Value)]) -> Result<Bytes, AmfError> {
    encode_with(name, args, data_schema, "data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_roundtrip() {
        let cmd_obj = Amf0Value::Object(vec![
            ("app".to_string(), Amf0Value::String("live".into())),
            (
                "tcUrl".to_string(),
                Amf0Value::String("rtmp://localhost/live".into()),
            ),
            ("objectEncoding".to_string(), Amf0Value::Number(0.0)),
        ]);
        let encoded = encode_command(
            "connect",
            &[
                ("transId", Amf0Value::Number(1.0)),
                ("cmdObj", cmd_obj.clone()),
            ],
        )
        .unwrap();

        let decoded = decode_command(&encoded).unwrap();
        assert_eq!(decoded.name, "connect");
        assert_eq!(decoded.transaction_id(), 1.0);
        assert_eq!(decoded.get("cmdObj"), Some(&cmd_obj));
        assert_eq!(
            decoded.get("cmdObj").unwrap().get_str("tcUrl"),
            Some("rtmp://localhost/live")
        );
    }

    #[test]
    fn test_publish_arguments_by_name() {
        let encoded = encode_command(
            "publish",
            &[
                ("transId", Amf0Value::Number(5.0)),
                ("cmdObj", Amf0Value::Null),
                ("streamName", Amf0Value::String("demo?sign=abc".into())),
                ("type", Amf0Value::String("live".into())),
            ],
        )
        .unwrap();

        let decoded = decode_command(&encoded).unwrap();
        assert_eq!(decoded.name, "publish");
        assert_eq!(decoded.get_str("streamName"), Some("demo?sign=abc"));
        assert_eq!(decoded.get_str("type"), Some("live"));
    }

    #[test]
    fn test_unknown_command_decodes_bare_name() {
        let encoded = amf0::encode_all(&[
            Amf0Value::String("somethingNew".into()),
            Amf0Value::Number(9.0),
        ])
        .unwrap();
        let decoded = decode_command(&encoded).unwrap();
        assert_eq!(decoded.name, "somethingNew");
        assert!(decoded.get("transId").is_none());
    }

    #[test]
    fn test_short_argument_list_tolerated() {
        // play with only transId + cmdObj + streamName; start/duration/reset absent
        let encoded = encode_command(
            "play",
            &[
                ("transId", Amf0Value::Number(2.0)),
                ("cmdObj", Amf0Value::Null),
                ("streamName", Amf0Value::String("demo".into())),
            ],
        )
        .unwrap();
        let decoded = decode_command(&encoded).unwrap();
        assert_eq!(decoded.get_str("streamName"), Some("demo"));
        assert!(decoded.get("start").is_none());
    }

    #[test]
    fn test_data_message_roundtrip() {
        let meta = Amf0Value::EcmaArray(vec![
            ("width".to_string(), Amf0Value::Number(1920.0)),
            ("height".to_string(), Amf0Value::Number(1080.0)),
        ]);
        let encoded = encode_data(
            "@setDataFrame",
            &[
                ("method", Amf0Value::String("onMetaData".into())),
                ("dataObj", meta.clone()),
            ],
        )
        .unwrap();
        let decoded = decode_data(&encoded).unwrap();
        assert_eq!(decoded.name, "@setDataFrame");
        assert_eq!(decoded.get("dataObj"), Some(&meta));
    }
}
