use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::{self, Error};

mod client;
pub(crate) mod single;
pub(crate) mod utils;

pub use client::{Client, ClientBuilder, ConnectionState, HeartbeatStatus};
pub use single::{Fail, Failure, Job, JobBuilder, JobId, WorkerId};

pub(crate) const EXPECTED_PROTOCOL_VERSION: usize = 2;

/// A means of establishing a stream to the server, repeatably.
///
/// The client calls this for the initial connection and again for every
/// reconnect attempt, so implementations must be able to produce a fresh
/// stream each time. You generally want [`TcpConnector`]; implementing this
/// trait yourself is how you put the client on a non-TCP transport, or on a
/// scripted stream in tests.
#[async_trait]
pub trait Connector: Send + 'static {
    /// The stream produced by this connector.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Establish a new stream.
    async fn connect(&mut self) -> Result<Self::Stream, Error>;
}

/// A [`Connector`] for a regular TCP stream.
///
/// Connects to the `hostname:port` pair it was built with.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    /// Create a connector for the given `hostname:port` address.
    pub fn new(addr: impl Into<String>) -> Self {
        TcpConnector { addr: addr.into() }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&mut self) -> Result<TcpStream, Error> {
        Ok(TcpStream::connect(&self.addr)
            .await
            .map_err(error::Connect::Io)?)
    }
}
