//! `tokio_util` codec adapter

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::{DecodeError, Value, WireDecoder};

/// Framed codec over [`WireDecoder`] and [`Value::encode`].
///
/// Every byte handed to `decode` is moved into the incremental decoder, so
/// the framing buffer never holds a partial value. Values decoded before a
/// failure are yielded first; the failure follows, and nothing after it.
#[derive(Debug, Default)]
pub struct WireCodec {
    decoder: WireDecoder,
}

impl WireCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for WireCodec {
    type Item = Value;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, DecodeError> {
        if !src.is_empty() && self.decoder.failure().is_none() {
            let chunk = src.split();
            // A failure is recorded on the decoder and surfaced below
            let _ = self.decoder.feed(&chunk);
        }

        if let Some(value) = self.decoder.next_value() {
            return Ok(Some(value));
        }

        match self.decoder.failure() {
            Some(err) => Err(err.clone()),
            None => Ok(None),
        }
    }
}

impl Encoder<Value> for WireCodec {
    type Error = DecodeError;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<(), DecodeError> {
        item.encode(dst);
        Ok(())
    }
}
