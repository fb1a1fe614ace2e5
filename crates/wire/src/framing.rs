// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tab-delimited, LF-terminated line framing.
//!
//! `<correlation-id> (TAB <field>)* LF`, all fields UTF-8 and free of TAB/LF
//! by construction of the split itself. The codec's only job is drawing
//! line boundaries and carving out the correlation id; per-message argument
//! shape is the [`crate::registry::MessageRegistry`]'s job.

use crate::errors::ProtocolError;
use bytes::{Buf, BytesMut};
use desd_core::CorrelationId;
use tokio_util::codec::{Decoder, Encoder};

/// One decoded protocol line: a correlation id plus `[verb, arg...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: CorrelationId,
    pub fields: Vec<String>,
}

impl Frame {
    pub fn new(id: CorrelationId, fields: Vec<String>) -> Self {
        Self { id, fields }
    }

    pub fn verb(&self) -> Option<&str> {
        self.fields.first().map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        if self.fields.is_empty() {
            &[]
        } else {
            &self.fields[1..]
        }
    }
}

/// `tokio_util::codec::Decoder`/`Encoder` pair for the LF-framed, TAB-split
/// wire format. Grounded on the same `FramedRead`/`FramedWrite` idiom the
/// teacher's length-prefixed JSON codec uses, swapping the boundary rule
/// from a 4-byte length prefix to a literal `LF` scan.
#[derive(Debug, Default)]
pub struct LineCodec {
    _private: (),
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        let Some(newline_at) = src.iter().position(|b| *b == b'\n') else {
            return Ok(None);
        };

        let line = src.split_to(newline_at);
        src.advance(1); // drop the LF itself

        let line = std::str::from_utf8(&line)
            .map_err(|_| ProtocolError::Framing("non-UTF-8 line".to_string()))?;
        // Tolerate a trailing CR for clients that frame on CRLF.
        let line = line.strip_suffix('\r').unwrap_or(line);

        let mut parts = line.split('\t');
        let id_field = parts.next().unwrap_or_default();
        if id_field.is_empty() || !id_field.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::Framing(format!("bad correlation id {id_field:?}")));
        }
        let id: u64 = id_field
            .parse()
            .map_err(|_| ProtocolError::Framing(format!("correlation id out of range: {id_field}")))?;

        let fields: Vec<String> = parts.map(str::to_string).collect();
        if fields.is_empty() {
            return Err(ProtocolError::Framing("message has no verb field".to_string()));
        }

        Ok(Some(Frame::new(CorrelationId(id), fields)))
    }
}

impl Encoder<Frame> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        for field in &frame.fields {
            if field.contains('\t') || field.contains('\n') {
                return Err(ProtocolError::Framing(format!("field {field:?} contains TAB or LF")));
            }
        }

        dst.extend_from_slice(frame.id.to_string().as_bytes());
        for field in &frame.fields {
            dst.extend_from_slice(b"\t");
            dst.extend_from_slice(field.as_bytes());
        }
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decodes_a_complete_line() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("0\techo\thello\tworld\n".as_bytes());
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.id, CorrelationId(0));
        assert_eq!(frame.verb(), Some("echo"));
        assert_eq!(frame.args(), &["hello".to_string(), "world".to_string()]);
    }

    #[test]
    fn returns_none_on_incomplete_line() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("0\techo\thello".as_bytes());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn rejects_non_numeric_id() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("abc\techo\n".as_bytes());
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn rejects_empty_id() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("\techo\n".as_bytes());
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        let original = Frame::new(CorrelationId(7), vec!["ok".to_string(), "reaped".to_string()]);
        codec.encode(original.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn encode_rejects_field_with_tab() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        let frame = Frame::new(CorrelationId(1), vec!["bad\tfield".to_string()]);
        assert!(codec.encode(frame, &mut buf).is_err());
    }

    fn arb_field() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_.:/-]{0,16}"
    }

    proptest! {
        #[test]
        fn encode_then_decode_is_identity_for_arbitrary_field_lists(
            id in 0u64..1_000_000,
            fields in prop::collection::vec(arb_field(), 1..6),
        ) {
            let mut codec = LineCodec::new();
            let mut buf = BytesMut::new();
            let original = Frame::new(CorrelationId(id), fields);
            codec.encode(original.clone(), &mut buf).unwrap();
            let decoded = codec.decode(&mut buf).unwrap().unwrap();
            prop_assert_eq!(decoded, original);
            prop_assert!(codec.decode(&mut buf).unwrap().is_none());
        }
    }
}
