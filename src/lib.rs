//! API bindings for the Faktory job server, client side.
//!
//! This crate talks to the language-agnostic
//! [Faktory](https://github.com/contribsys/faktory) work server: it
//! submits and fetches jobs and reports their outcomes, over a single
//! pipelined connection that authenticates itself on the way in and
//! transparently reconnects with backoff if the socket drops.
//!
//! # Producing jobs
//!
//! If you want to **submit** jobs to Faktory, connect a [`Client`] and
//! [`push`](Client::push):
//!
//! ```no_run
//! # tokio_test::block_on(async {
//! use faktory_client::{Client, Job};
//! let client = Client::connect(None).await.unwrap();
//! let jid = client.push(Job::new("foobar", vec!["z"])).await.unwrap();
//! println!("enqueued {}", jid);
//! # });
//! ```
//!
//! # Consuming jobs
//!
//! If you want to **accept** jobs from Faktory, configure a worker id so
//! that the server knows who keeps [`beat`](Client::beat)ing, then
//! [`fetch`](Client::fetch) and report back:
//!
//! ```no_run
//! # tokio_test::block_on(async {
//! use faktory_client::{ClientBuilder, WorkerId};
//! let mut b = ClientBuilder::default();
//! b.wid(WorkerId::random());
//! let client = b.connect(None).await.unwrap();
//! if let Some(job) = client.fetch(&["default"]).await.unwrap() {
//!     // run the job, then:
//!     client.ack(job.id().clone()).await.unwrap();
//! }
//! # });
//! ```
//!
//! Commands issued concurrently share the connection: each is written in
//! turn and each caller gets exactly the reply to its own command, in
//! write order. That correspondence, and what happens to it when the
//! socket dies mid-flight, is described on [`Client`].
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]

mod error;
mod proto;

pub use crate::error::{Connect, Error, Protocol};
pub use crate::proto::{
    Client, ClientBuilder, ConnectionState, Connector, Fail, Failure, HeartbeatStatus, Job,
    JobBuilder, JobId, TcpConnector, WorkerId,
};
