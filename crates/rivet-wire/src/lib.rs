//! Wire format for the rivet coordination-store client
//!
//! Three value kinds travel over the stream, each introduced by a tag byte
//! and terminated by CRLF:
//! - `:` signed integer
//! - `$` length-prefixed byte string
//! - `*` counted sequence of nested values
//!
//! Requests and responses are sequences of alternating field numbers and
//! field values (see [`message`]).

mod codec;
mod decoder;
mod error;
pub mod message;
mod value;

pub use codec::WireCodec;
pub use decoder::{WireDecoder, MAX_BULK_LEN, MAX_DEPTH, MAX_SEQ_LEN};
pub use error::{DecodeError, FrameError};
pub use message::{flags, rev, ErrorCode, Request, Response, Verb};
pub use value::Value;
