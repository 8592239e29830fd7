//! Value codec boundary.
//!
//! Arguments and return values travel as opaque byte payloads. Raw bytes pass
//! through untouched; everything else goes through a [`ValueCodec`] injected
//! into each link. [`JsonCodec`] is the default.

use crate::{LinkError, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Encodes structured values to payload bytes and back.
///
/// Implementations report their own failures as [`LinkError::Codec`]. On the
/// sending side that surfaces as an argument error; on the receiving side it
/// becomes an exception response for the caller.
pub trait ValueCodec: Send + Sync + std::fmt::Debug + 'static {
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;
    fn decode(&self, payload: &[u8]) -> Result<Value>;
}

/// Codec handle shared between a link, its remote adapter and its handlers.
pub type SharedCodec = Arc<dyn ValueCodec>;

/// Plain JSON text payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, payload: &[u8]) -> Result<Value> {
        serde_json::from_slice(payload).map_err(|e| LinkError::Json {
            message: format!("Failed to decode payload: {}", e),
            source: Some(e),
        })
    }
}

/// Encode a typed value with the given codec.
pub fn encode_value<T: Serialize + ?Sized>(codec: &dyn ValueCodec, value: &T) -> Result<Bytes> {
    let value = serde_json::to_value(value)?;
    Ok(Bytes::from(codec.encode(&value)?))
}

/// Decode a payload into a typed value with the given codec.
pub fn decode_value<T: DeserializeOwned>(codec: &dyn ValueCodec, payload: &[u8]) -> Result<T> {
    let value = codec.decode(payload)?;
    Ok(serde_json::from_value(value)?)
}

/// Turn an exception payload back into its description text.
///
/// Exception payloads are the codec encoding of a string. A peer that sends
/// something else still gets its bytes shown, lossily.
pub(crate) fn exception_text(codec: &dyn ValueCodec, payload: &[u8]) -> String {
    match decode_value::<String>(codec, payload) {
        Ok(text) => text,
        Err(_) => String::from_utf8_lossy(payload).into_owned(),
    }
}

/// One argument of an outgoing call.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Sent as-is, for parameters declared as opaque bytes.
    Bytes(Bytes),
    /// Encoded with the link's value codec.
    Value(Value),
}

impl Arg {
    /// Build a structured argument from any serializable value.
    pub fn value<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Arg::Value(serde_json::to_value(value)?))
    }

    /// Build a raw byte argument.
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Arg::Bytes(data.into())
    }

    pub(crate) fn into_payload(self, codec: &dyn ValueCodec) -> Result<Bytes> {
        match self {
            Arg::Bytes(data) => Ok(data),
            Arg::Value(value) => Ok(Bytes::from(codec.encode(&value)?)),
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<Bytes> for Arg {
    fn from(data: Bytes) -> Self {
        Arg::Bytes(data)
    }
}
