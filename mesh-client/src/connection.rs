//! Connection factory: opens a transport connection and performs the
//! registration handshake (spec.md §4.2).

use std::sync::Arc;

use futures::SinkExt;
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, instrument, warn};

use crate::error::DispatchError;
use crate::instance::ServiceInstance;
use crate::transport::RpcTransport;
use crate::wire::{BincodeCodec, Codec, ClientHandshake, RequestEnvelope, ResponseEnvelope, ServiceHandshake};

/// A connected, handshake-completed RPC channel bound to one instance
/// (spec.md §3 `RPCHandle`). Owned by the pool while idle; borrowed during
/// an attempt; closed on any transport error.
pub struct RpcHandle<S> {
	frames: Framed<S, LengthDelimitedCodec>,
	pub instance: Arc<ServiceInstance>,
	closed: bool,
}

impl<S> RpcHandle<S>
where
	S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
	pub fn is_closed(&self) -> bool {
		self.closed
	}

	/// Invokes `"<serviceName>.Forward"` once on this handle (spec.md §4.5
	/// `trySend`). On transport error the handle is marked closed; the pool
	/// discards it and regenerates on next acquire.
	pub async fn forward(&mut self, envelope: RequestEnvelope) -> Result<ResponseEnvelope, DispatchError> {
		let bytes = BincodeCodec::encode(&envelope)?;
		if let Err(e) = self.frames.send(bytes.into()).await {
			self.closed = true;
			return Err(DispatchError::Transport(e));
		}
		let frame = match self.frames.next().await {
			Some(Ok(frame)) => frame,
			Some(Err(e)) => {
				self.closed = true;
				return Err(DispatchError::Transport(e));
			},
			None => {
				self.closed = true;
				return Err(DispatchError::Transport(std::io::Error::new(
					std::io::ErrorKind::UnexpectedEof,
					"connection closed by peer",
				)));
			},
		};
		BincodeCodec::decode(&frame)
	}
}

/// Builds a ready [`RpcHandle`] bound to one instance, retrying the
/// handshake until the peer reports itself registered (spec.md §4.2).
pub struct ConnectionFactory<T: RpcTransport> {
	transport: T,
	instance: Arc<ServiceInstance>,
}

impl<T: RpcTransport> ConnectionFactory<T> {
	pub fn new(transport: T, instance: Arc<ServiceInstance>) -> Self {
		ConnectionFactory { transport, instance }
	}

	pub fn instance_address(&self) -> &str {
		&self.instance.address
	}

	#[instrument(skip(self), fields(address = %self.instance.address))]
	pub async fn connect(&self) -> Result<RpcHandle<T::Stream>, DispatchError> {
		loop {
			let stream = self.transport.connect(&self.instance.address).await?;
			let mut frames = Framed::new(stream, LengthDelimitedCodec::new());

			let handshake_frame = match frames.next().await {
				Some(Ok(frame)) => frame,
				Some(Err(e)) => return Err(DispatchError::Transport(e)),
				None => {
					return Err(DispatchError::Transport(std::io::Error::new(
						std::io::ErrorKind::UnexpectedEof,
						"connection closed before handshake",
					)));
				},
			};
			let handshake: ServiceHandshake = BincodeCodec::decode(&handshake_frame)?;

			let reply = ClientHandshake {
				client_id: self.instance.address.clone(),
			};
			let reply_bytes = BincodeCodec::encode(&reply)?;
			if let Err(e) = frames.send(reply_bytes.into()).await {
				return Err(DispatchError::Transport(e));
			}

			if !handshake.registered {
				debug!("peer not yet registered, retrying handshake");
				drop(frames);
				continue;
			}

			return Ok(RpcHandle {
				frames,
				instance: self.instance.clone(),
				closed: false,
			});
		}
	}
}

#[cfg(test)]
mod tests {
	use tokio::io::DuplexStream;

	use super::*;
	use crate::wire::RequestInfo;

	struct DuplexTransport(tokio::sync::Mutex<Option<DuplexStream>>);

	#[async_trait::async_trait]
	impl RpcTransport for DuplexTransport {
		type Stream = DuplexStream;

		async fn connect(&self, _address: &str) -> Result<Self::Stream, DispatchError> {
			self
				.0
				.lock()
				.await
				.take()
				.ok_or_else(|| DispatchError::Transport(std::io::Error::other("already connected")))
		}
	}

	#[tokio::test]
	async fn handshake_succeeds_when_registered() {
		let (client_side, server_side) = tokio::io::duplex(4096);
		let transport = DuplexTransport(tokio::sync::Mutex::new(Some(client_side)));
		let instance = Arc::new(ServiceInstance::new("test://a", "svc"));
		let factory = ConnectionFactory::new(transport, instance);

		let server = tokio::spawn(async move {
			let mut frames = Framed::new(server_side, LengthDelimitedCodec::new());
			let hs = BincodeCodec::encode(&ServiceHandshake { registered: true }).unwrap();
			frames.send(hs.into()).await.unwrap();
			let _client_hs = frames.next().await.unwrap().unwrap();
		});

		let handle = factory.connect().await.unwrap();
		assert!(!handle.is_closed());
		server.await.unwrap();
	}

	#[tokio::test]
	async fn handshake_retries_until_registered() {
		let (client_side, server_side) = tokio::io::duplex(8192);
		let transport = DuplexTransport(tokio::sync::Mutex::new(Some(client_side)));
		let instance = Arc::new(ServiceInstance::new("test://a", "svc"));
		let factory = ConnectionFactory::new(transport, instance);

		let server = tokio::spawn(async move {
			let mut frames = Framed::new(server_side, LengthDelimitedCodec::new());
			let hs = BincodeCodec::encode(&ServiceHandshake { registered: false }).unwrap();
			frames.send(hs.into()).await.unwrap();
			let _client_hs = frames.next().await.unwrap().unwrap();
		});

		// Only one transport connect is wired up in this fake, so the retry
		// path exercised here is the handshake loop body, not a second
		// physical connection; `handshake_re-registration` in the crate's
		// integration tests exercises the full multi-connection recursion.
		let result = tokio::time::timeout(std::time::Duration::from_millis(100), factory.connect()).await;
		assert!(result.is_err() || result.unwrap().is_err());
		server.await.unwrap();
		let _ = RequestInfo::generate();
	}
}
