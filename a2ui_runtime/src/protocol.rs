use std::fmt;
use std::io::{self, BufRead, Read, Write};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::warn;

use crate::action::UserAction;
use crate::error::ProtocolError;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 1_048_576;

/// Signals that a surface can be shown, starting at `root`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginRendering {
    pub surface_id: String,
    pub root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub styles: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceUpdate {
    pub surface_id: String,
    #[serde(default)]
    pub components: Vec<ComponentDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataModelUpdate {
    pub surface_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub contents: Vec<DataEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSurface {
    pub surface_id: String,
}

/// One entry of a surface update: `{"id": "t", "component": {"Text": {...}}}`.
///
/// `component` is kept as a raw map so a definition naming zero or several
/// types still decodes and can be rejected on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDefinition {
    pub id: String,
    #[serde(default)]
    pub component: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<Number>,
}

/// A typed key/value pair of a data model update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataEntry {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_number: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_boolean: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_map: Option<Vec<DataEntry>>,
}

impl DataEntry {
    /// Converts the typed payload into a plain value. Nested maps become
    /// nested objects; an entry without any payload is `null`.
    pub fn value(&self) -> Value {
        if let Some(text) = &self.value_string {
            return Value::String(text.clone());
        }
        if let Some(number) = &self.value_number {
            return Value::Number(number.clone());
        }
        if let Some(flag) = self.value_boolean {
            return Value::Bool(flag);
        }
        if let Some(entries) = &self.value_map {
            let object = entries
                .iter()
                .map(|entry| (entry.key.clone(), entry.value()))
                .collect();
            return Value::Object(object);
        }
        Value::Null
    }
}

/// A server-to-client message.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    BeginRendering(BeginRendering),
    SurfaceUpdate(SurfaceUpdate),
    DataModelUpdate(DataModelUpdate),
    DeleteSurface(DeleteSurface),
    Unknown { kind: String },
}

impl ServerMessage {
    pub fn kind(&self) -> &str {
        match self {
            ServerMessage::BeginRendering(_) => "beginRendering",
            ServerMessage::SurfaceUpdate(_) => "surfaceUpdate",
            ServerMessage::DataModelUpdate(_) => "dataModelUpdate",
            ServerMessage::DeleteSurface(_) => "deleteSurface",
            ServerMessage::Unknown { kind } => kind,
        }
    }

    pub fn surface_id(&self) -> Option<&str> {
        match self {
            ServerMessage::BeginRendering(msg) => Some(&msg.surface_id),
            ServerMessage::SurfaceUpdate(msg) => Some(&msg.surface_id),
            ServerMessage::DataModelUpdate(msg) => Some(&msg.surface_id),
            ServerMessage::DeleteSurface(msg) => Some(&msg.surface_id),
            ServerMessage::Unknown { .. } => None,
        }
    }
}

impl<'de> Deserialize<'de> for ServerMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        decode_message(raw).map_err(serde::de::Error::custom)
    }
}

/// Decodes either envelope shape into a [`ServerMessage`]:
///
/// - wrapper key: `{"surfaceUpdate": {"surfaceId": "s", ...}}`
/// - flat tag: `{"type": "surfaceUpdate", "surfaceId": "s", ...}`
pub fn decode_message(raw: Value) -> Result<ServerMessage, ProtocolError> {
    let Value::Object(mut object) = raw else {
        return Err(ProtocolError::NotAnObject);
    };

    if let Some(kind) = object.remove("type") {
        let Value::String(kind) = kind else {
            return Err(ProtocolError::InvalidKind);
        };
        return decode_body(kind, Value::Object(object));
    }

    if object.len() != 1 {
        return Err(ProtocolError::UnrecognizedEnvelope {
            keys: object.keys().cloned().collect(),
        });
    }

    match object.into_iter().next() {
        Some((kind, body)) => decode_body(kind, body),
        None => Err(ProtocolError::UnrecognizedEnvelope { keys: vec![] }),
    }
}

pub fn decode_message_slice(payload: &[u8]) -> Result<ServerMessage, ProtocolError> {
    let raw: Value = serde_json::from_slice(payload)?;
    decode_message(raw)
}

fn decode_body(kind: String, body: Value) -> Result<ServerMessage, ProtocolError> {
    let message = match kind.as_str() {
        "beginRendering" => ServerMessage::BeginRendering(serde_json::from_value(body)?),
        "surfaceUpdate" => ServerMessage::SurfaceUpdate(serde_json::from_value(body)?),
        "dataModelUpdate" => ServerMessage::DataModelUpdate(serde_json::from_value(body)?),
        "deleteSurface" => ServerMessage::DeleteSurface(serde_json::from_value(body)?),
        _ => ServerMessage::Unknown { kind },
    };

    Ok(message)
}

/// Parses a JSON Lines document, skipping blank and unparsable lines.
pub fn parse_json_lines(text: &str) -> Vec<ServerMessage> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match decode_message_slice(line.as_bytes()) {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(error = %err, line, "skipping unparsable message line");
                None
            }
        })
        .collect()
}

/// A client-to-server event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientEvent {
    UserAction(UserAction),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Framing {
    /// One JSON document per line.
    #[default]
    JsonLines,
    /// 4-byte big-endian length prefix followed by the payload.
    Packet4,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown framing '{0}', expected 'jsonl' or 'packet4'")]
pub struct ParseFramingError(String);

impl FromStr for Framing {
    type Err = ParseFramingError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "jsonl" | "json-lines" => Ok(Framing::JsonLines),
            "packet4" | "packet-4" => Ok(Framing::Packet4),
            other => Err(ParseFramingError(other.to_string())),
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::JsonLines => f.write_str("jsonl"),
            Framing::Packet4 => f.write_str("packet4"),
        }
    }
}

/// Splits a byte stream into payloads according to a [`Framing`].
pub struct FrameReader<R> {
    reader: R,
    framing: Framing,
    max_payload: usize,
}

impl<R: BufRead> FrameReader<R> {
    pub fn new(reader: R, framing: Framing, max_payload: usize) -> Self {
        Self {
            reader,
            framing,
            max_payload,
        }
    }

    /// Returns the next payload, or `None` at a clean end of stream.
    ///
    /// Oversized lines are skipped; an oversized packet is an error since the
    /// stream cannot be resynchronized. A packet cut off mid-frame is an
    /// error too.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        match self.framing {
            Framing::Packet4 => {
                if self.reader.fill_buf()?.is_empty() {
                    return Ok(None);
                }
                read_frame(&mut self.reader, self.max_payload).map(Some)
            }
            Framing::JsonLines => loop {
                let Some((line, len)) = self.read_line()? else {
                    return Ok(None);
                };
                if len > self.max_payload {
                    warn!(len, max = self.max_payload, "skipping oversized line");
                    continue;
                }

                let trimmed = line.trim_ascii();
                if trimmed.is_empty() {
                    continue;
                }

                return Ok(Some(trimmed.to_vec()));
            },
        }
    }

    /// Reads through the next `\n` and returns the line with its full length.
    /// At most `max_payload + 1` bytes are kept; the rest of a longer line is
    /// consumed and dropped.
    fn read_line(&mut self) -> Result<Option<(Vec<u8>, usize)>, ProtocolError> {
        let keep = self.max_payload.saturating_add(1);
        let mut line = Vec::new();
        let mut len = 0_usize;
        let mut started = false;

        loop {
            let available = match self.reader.fill_buf() {
                Ok(available) => available,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            if available.is_empty() {
                return Ok(started.then_some((line, len)));
            }
            started = true;

            let newline = available.iter().position(|byte| *byte == b'\n');
            let chunk = &available[..newline.unwrap_or(available.len())];
            let room = keep.saturating_sub(line.len());
            line.extend_from_slice(&chunk[..chunk.len().min(room)]);
            len = len.saturating_add(chunk.len());

            let used = chunk.len() + usize::from(newline.is_some());
            self.reader.consume(used);
            if newline.is_some() {
                return Ok(Some((line, len)));
            }
        }
    }
}

pub fn read_frame(reader: &mut impl Read, max_payload: usize) -> Result<Vec<u8>, ProtocolError> {
    let mut len_buf = [0_u8; 4];
    reader.read_exact(&mut len_buf)?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_payload {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: max_payload,
        });
    }

    let mut payload = vec![0_u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

pub fn write_frame(
    writer: &mut impl Write,
    payload: &[u8],
    max_payload: usize,
) -> Result<(), ProtocolError> {
    if payload.len() > max_payload {
        return Err(ProtocolError::FrameTooLarge {
            len: payload.len(),
            max: max_payload,
        });
    }

    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;

    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

/// Writes one payload with the given framing.
pub fn write_payload(
    writer: &mut impl Write,
    framing: Framing,
    payload: &[u8],
    max_payload: usize,
) -> Result<(), ProtocolError> {
    match framing {
        Framing::Packet4 => write_frame(writer, payload, max_payload),
        Framing::JsonLines => {
            writer.write_all(payload)?;
            writer.write_all(b"\n")?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::{BufReader, Cursor};

    fn begin_rendering_payload() -> Vec<u8> {
        serde_json::to_vec(&json!({"beginRendering": {"surfaceId": "s", "root": "r"}}))
            .expect("encode message")
    }

    #[test]
    fn packet_frame_carries_a_decodable_message() {
        let payload = begin_rendering_payload();
        let mut out = Vec::new();
        write_frame(&mut out, &payload, DEFAULT_MAX_FRAME_BYTES).expect("frame write");

        let len = u32::try_from(payload.len()).expect("small payload");
        assert_eq!(&out[0..4], &len.to_be_bytes());

        let mut reader =
            FrameReader::new(Cursor::new(out), Framing::Packet4, DEFAULT_MAX_FRAME_BYTES);
        let frame = reader.next_frame().expect("read").expect("one frame");
        assert!(matches!(
            decode_message_slice(&frame).expect("decode"),
            ServerMessage::BeginRendering(msg) if msg.root == "r"
        ));
        assert_eq!(reader.next_frame().expect("clean eof"), None);
    }

    #[test]
    fn cut_off_packet_is_an_error_not_an_end_of_stream() {
        let mut out = Vec::new();
        write_frame(&mut out, &begin_rendering_payload(), DEFAULT_MAX_FRAME_BYTES)
            .expect("frame write");
        out.truncate(out.len() - 3);

        let mut reader =
            FrameReader::new(Cursor::new(out), Framing::Packet4, DEFAULT_MAX_FRAME_BYTES);
        match reader.next_frame() {
            Err(ProtocolError::Io(err)) => assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected unexpected eof, got {other:?}"),
        }
    }

    #[test]
    fn packet_over_the_cap_is_rejected_before_reading_it() {
        let payload = begin_rendering_payload();
        let mut out = Vec::new();
        write_frame(&mut out, &payload, DEFAULT_MAX_FRAME_BYTES).expect("frame write");

        let mut reader = FrameReader::new(Cursor::new(out), Framing::Packet4, 16);
        let err = reader.next_frame().expect_err("too large");
        assert!(matches!(
            err,
            ProtocolError::FrameTooLarge { len, max: 16 } if len == payload.len()
        ));
    }

    #[test]
    fn decodes_wrapper_key_envelope() {
        let decoded = decode_message(json!({
            "beginRendering": {"surfaceId": "s", "root": "r", "styles": {"font": "Roboto"}}
        }))
        .expect("decode begin rendering");

        match decoded {
            ServerMessage::BeginRendering(msg) => {
                assert_eq!(msg.surface_id, "s");
                assert_eq!(msg.root, "r");
                assert_eq!(msg.catalog_id, None);
                assert_eq!(msg.styles.expect("styles")["font"], "Roboto");
            }
            other => panic!("expected beginRendering, got {other:?}"),
        }
    }

    #[test]
    fn decodes_flat_type_tagged_envelope() {
        let decoded = decode_message(json!({
            "type": "dataModelUpdate",
            "surfaceId": "s",
            "path": "/user",
            "contents": [{"key": "age", "valueNumber": 41}]
        }))
        .expect("decode data model update");

        match decoded {
            ServerMessage::DataModelUpdate(msg) => {
                assert_eq!(msg.path.as_deref(), Some("/user"));
                assert_eq!(msg.contents[0].value(), json!(41));
            }
            other => panic!("expected dataModelUpdate, got {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_decodes_to_unknown() {
        let decoded = decode_message(json!({"teleport": {"surfaceId": "s"}})).expect("decode");
        assert_eq!(
            decoded,
            ServerMessage::Unknown {
                kind: "teleport".to_string()
            }
        );
    }

    #[test]
    fn ambiguous_envelope_is_rejected() {
        let err = decode_message(json!({"a": {}, "b": {}})).expect_err("two keys");
        assert!(matches!(err, ProtocolError::UnrecognizedEnvelope { .. }));

        let err = decode_message(json!(["surfaceUpdate"])).expect_err("not an object");
        assert!(matches!(err, ProtocolError::NotAnObject));
    }

    #[test]
    fn definition_without_component_still_decodes() {
        let decoded: ServerMessage = serde_json::from_value(json!({
            "surfaceUpdate": {"surfaceId": "s", "components": [{"id": "x"}]}
        }))
        .expect("decode via Deserialize");

        match decoded {
            ServerMessage::SurfaceUpdate(msg) => assert!(msg.components[0].component.is_empty()),
            other => panic!("expected surfaceUpdate, got {other:?}"),
        }
    }

    #[test]
    fn data_entry_value_precedence_and_nesting() {
        let entry: DataEntry = serde_json::from_value(json!({
            "key": "u",
            "valueMap": [
                {"key": "n", "valueString": "Jo"},
                {"key": "tags", "valueMap": [{"key": "admin", "valueBoolean": true}]},
                {"key": "empty"}
            ]
        }))
        .expect("decode entry");

        assert_eq!(
            entry.value(),
            json!({"n": "Jo", "tags": {"admin": true}, "empty": null})
        );

        let both = DataEntry {
            key: "k".to_string(),
            value_string: Some("text".to_string()),
            value_boolean: Some(true),
            ..DataEntry::default()
        };
        assert_eq!(both.value(), json!("text"));
    }

    #[test]
    fn json_lines_skip_blank_and_broken_lines() {
        let text = "{\"deleteSurface\":{\"surfaceId\":\"a\"}}\n\n   \nnot json\n{\"type\":\"deleteSurface\",\"surfaceId\":\"b\"}\n";
        let messages = parse_json_lines(text);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].surface_id(), Some("a"));
        assert_eq!(messages[1].surface_id(), Some("b"));
    }

    #[test]
    fn frame_reader_splits_lines_and_skips_oversized() {
        let input = b"{\"a\":1}\r\n\n{\"oversized\":\"xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx\"}\n{\"b\":2}".to_vec();
        let mut reader = FrameReader::new(Cursor::new(input), Framing::JsonLines, 16);

        assert_eq!(reader.next_frame().expect("first"), Some(b"{\"a\":1}".to_vec()));
        assert_eq!(reader.next_frame().expect("second"), Some(b"{\"b\":2}".to_vec()));
        assert_eq!(reader.next_frame().expect("eof"), None);
    }

    #[test]
    fn frame_reader_reads_packets_until_eof() {
        let mut input = Vec::new();
        write_payload(&mut input, Framing::Packet4, b"one", 16).expect("write one");
        write_payload(&mut input, Framing::Packet4, b"two", 16).expect("write two");
        let mut reader = FrameReader::new(Cursor::new(input), Framing::Packet4, 16);

        assert_eq!(reader.next_frame().expect("one"), Some(b"one".to_vec()));
        assert_eq!(reader.next_frame().expect("two"), Some(b"two".to_vec()));
        assert_eq!(reader.next_frame().expect("eof"), None);
    }

    #[test]
    fn long_line_is_dropped_without_being_buffered() {
        let mut input = vec![b'x'; 200_000];
        input.extend_from_slice(b"\n{\"deleteSurface\":{\"surfaceId\":\"s\"}}\n");
        input.extend(std::iter::repeat_n(b'y', 50_000));
        let buffered = BufReader::with_capacity(64, Cursor::new(input));
        let mut reader = FrameReader::new(buffered, Framing::JsonLines, 64);

        let line = reader.read_line().expect("read").expect("long line");
        assert_eq!(line.1, 200_000);
        assert_eq!(line.0.len(), 65);

        let frame = reader.next_frame().expect("read").expect("message after long line");
        assert_eq!(
            decode_message_slice(&frame).expect("decode").surface_id(),
            Some("s")
        );
        assert_eq!(reader.next_frame().expect("unterminated long tail"), None);
    }

    #[test]
    fn framing_parses_from_flags() {
        assert_eq!("jsonl".parse::<Framing>(), Ok(Framing::JsonLines));
        assert_eq!("packet-4".parse::<Framing>(), Ok(Framing::Packet4));
        assert!("xml".parse::<Framing>().is_err());
    }
}
