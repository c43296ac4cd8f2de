//! Transport abstraction consumed by the [`crate::connection`] factory:
//! "open a stream to an address" (spec.md §6). Generic the way the
//! teacher's HBONE pool is generic over its workload key (`hbone::pool::Key`)
//! rather than boxing a trait object — production code gets a concrete
//! `TcpStream`, tests substitute `tokio::io::DuplexStream`.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::DispatchError;

#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
	type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

	async fn connect(&self, address: &str) -> Result<Self::Stream, DispatchError>;
}

/// Opens a plain TCP connection to `host:port`. No transport security layer
/// is implemented here (spec.md §1 Non-goals).
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpRpcTransport;

#[async_trait]
impl RpcTransport for TcpRpcTransport {
	type Stream = TcpStream;

	async fn connect(&self, address: &str) -> Result<Self::Stream, DispatchError> {
		let stream = TcpStream::connect(address).await?;
		stream.set_nodelay(true).ok();
		Ok(stream)
	}
}
