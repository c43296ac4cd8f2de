//! Wire-level types and codec (spec.md §6): the handshake frames exchanged
//! once per connection, the RPC envelope exchanged per call, and the
//! `Marshal`/`Unmarshal` contract the spec names but leaves unspecified
//! beyond its encode/decode shape. Framing on the wire is length-delimited
//! (`tokio_util::codec::LengthDelimitedCodec`); `bincode` is the binary
//! document format used to encode/decode each frame and each envelope's
//! inner payload.

use serde::{Serialize, de::DeserializeOwned};

use crate::error::DispatchError;

/// Server→client, sent once per connection before anything else (spec.md
/// §4.2, §6).
#[derive(Clone, Debug, Serialize, serde::Deserialize)]
pub struct ServiceHandshake {
	pub registered: bool,
}

/// Client→server, sent once per connection in reply to [`ServiceHandshake`].
#[derive(Clone, Debug, Serialize, serde::Deserialize)]
pub struct ClientHandshake {
	pub client_id: String,
}

/// The envelope carried over the wire for every RPC call (spec.md §6).
#[derive(Clone, Debug, Serialize, serde::Deserialize)]
pub struct RequestEnvelope {
	pub request_info: RequestInfo,
	pub method: String,
	pub input: Vec<u8>,
}

#[derive(Clone, Debug, Default, Serialize, serde::Deserialize)]
pub struct RequestInfo {
	pub request_id: String,
}

impl RequestInfo {
	pub fn generate() -> Self {
		RequestInfo {
			request_id: uuid_like_id(),
		}
	}
}

#[derive(Clone, Debug, Serialize, serde::Deserialize)]
pub struct ResponseEnvelope {
	pub output: Vec<u8>,
}

/// Marshal/Unmarshal contract for the inner input/output payloads (spec.md
/// §6); kept distinct from `serde_json`, which is reserved for the
/// coordination store's persisted [`crate::store::ServiceRecord`] payloads.
pub trait Codec: Send + Sync + 'static {
	fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, DispatchError>;
	fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DispatchError>;
}

pub struct BincodeCodec;

impl Codec for BincodeCodec {
	fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, DispatchError> {
		bincode::serialize(value).map_err(|e| DispatchError::Decode(e.to_string()))
	}

	fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DispatchError> {
		bincode::deserialize(bytes).map_err(|e| DispatchError::Decode(e.to_string()))
	}
}

fn uuid_like_id() -> String {
	use rand::Rng;
	let mut rng = rand::rng();
	let bytes: [u8; 16] = rng.random();
	bytes.iter().map(|b| format!("{b:02x}")).collect()
}
