use std::time::Duration;

use bytes::BytesMut;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{self, Error};
use crate::proto::single::{
    self, Ack, FaktoryCommand, Fail, Fetch, Flush, Frame, Heartbeat, Info, Job, JobId, Push,
    WorkerId,
};
use crate::proto::{utils, Connector, TcpConnector};

mod conn;
mod options;
mod pending;

pub use conn::ConnectionState;
use conn::{ConnectionEngine, Dispatch, Request};
use options::ClientOptions;

/// The server's verdict on a [`beat`](Client::beat).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    /// The server is happy with this worker.
    Ok,

    /// The worker should stop fetching new jobs, finish what it has, and
    /// keep beating.
    Quiet,

    /// The worker should stop fetching new jobs, fail anything still
    /// running, report back, and exit.
    Terminate,
}

/// `Client` is used to issue commands to the Faktory server.
///
/// # Connecting to Faktory
///
/// To issue commands, the `Client` must first be connected to the Faktory
/// server. Exactly how you do that depends on your setup. Faktory suggests
/// using the `FAKTORY_PROVIDER` and `FAKTORY_URL` environment variables (see
/// their docs for more information) with `localhost:7419` as the fallback
/// default. If you want this behavior, pass `None` to
/// [`Client::connect`](Client::connect). If not, you can supply the URL
/// directly in the form:
///
/// ```text
/// [tcp://][:password@]hostname[:port]
/// ```
///
/// Non-default client options are set through a [`ClientBuilder`].
///
/// # Issuing commands
///
/// Most of the lifetime of a `Client` will be spent creating and enqueueing
/// jobs for Faktory workers. This is done by passing a [`Job`] to
/// [`push`](Client::push). The most important part of a `Job` is its
/// `kind`; this field dictates how workers will execute the job when they
/// receive it. Clients that act as workers instead call
/// [`fetch`](Client::fetch), run the job, and report the outcome with
/// [`ack`](Client::ack) or [`fail`](Client::fail).
///
/// Commands may be issued concurrently from multiple tasks; they are
/// pipelined over the one connection, and each caller receives exactly the
/// reply to its own command.
///
/// # Connection lifecycle
///
/// If the connection to the server is lost, the client drains every
/// in-flight command with [`Error::LostConnection`] and reconnects with
/// linear backoff, re-performing the handshake. Once the configured number
/// of consecutive attempts fails, the client gives up; this is observable
/// through [`state_changes`](Client::state_changes). Commands issued while
/// the connection is down fail fast with [`Error::NotWritable`].
///
/// # Examples
///
/// Connecting and enqueueing a job:
///
/// ```no_run
/// # tokio_test::block_on(async {
/// use faktory_client::{Client, Job};
/// let client = Client::connect(None).await.unwrap();
/// client.push(Job::new("foobar", vec!["z"])).await.unwrap();
/// # });
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    requests: mpsc::Sender<Request>,
    state: watch::Receiver<ConnectionState>,
    wid: Option<WorkerId>,
}

/// Convenience wrapper for building a [`Client`] with non-standard options.
///
/// ```no_run
/// # tokio_test::block_on(async {
/// use faktory_client::{ClientBuilder, WorkerId};
/// let mut b = ClientBuilder::default();
/// b.wid(WorkerId::random()).labels(vec!["rust".into(), "worker".into()]);
/// let client = b.connect(None).await.unwrap();
/// # });
/// ```
#[derive(Clone, Default)]
pub struct ClientBuilder(ClientOptions);

impl ClientBuilder {
    /// Set the hostname to advertise to the server.
    ///
    /// Defaults to the machine's hostname as reported by the operating
    /// system.
    pub fn hostname(&mut self, hn: String) -> &mut Self {
        self.0.hostname = Some(hn);
        self
    }

    /// Set a unique identifier for this client in its role as a worker.
    ///
    /// A worker id is what entitles a client to [`beat`](Client::beat); it
    /// is sent along with the handshake together with this process's id.
    pub fn wid(&mut self, wid: WorkerId) -> &mut Self {
        self.0.wid = Some(wid);
        self
    }

    /// Set the labels to advertise to the server.
    ///
    /// Defaults to `["rust"]`.
    pub fn labels(&mut self, labels: Vec<String>) -> &mut Self {
        self.0.labels = labels;
        self
    }

    /// Set the password to authenticate with.
    ///
    /// A password given in the connection url takes precedence over this.
    pub fn password(&mut self, password: String) -> &mut Self {
        self.0.password = Some(password);
        self
    }

    /// Set how many consecutive reconnect attempts to make before declaring
    /// the session dead.
    ///
    /// Defaults to 2.
    pub fn reconnect_limit(&mut self, limit: u32) -> &mut Self {
        self.0.reconnect_limit = limit;
        self
    }

    /// Set the base delay between reconnect attempts.
    ///
    /// Attempt `n` waits `n` times this before dialing. Defaults to 2
    /// seconds.
    pub fn reconnect_delay(&mut self, delay: Duration) -> &mut Self {
        self.0.reconnect_delay = delay;
        self
    }

    /// Set how long the socket may sit silent before that fact is logged.
    ///
    /// This is a diagnostic signal, not a deadline: nothing is torn down
    /// when it fires, since the server's heartbeat protocol is the
    /// authoritative liveness check. Defaults to 20 seconds.
    pub fn idle_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.0.idle_timeout = timeout;
        self
    }

    /// Connect to a Faktory server over TCP.
    ///
    /// If `url` is not given, will use the standard Faktory environment
    /// variables. Specifically, `FAKTORY_PROVIDER` is read to get the name
    /// of the environment variable to get the address from (defaults to
    /// `FAKTORY_URL`), and then that environment variable is read to get
    /// the server address. If the latter environment variable is not
    /// defined, the connection will be made to
    ///
    /// ```text
    /// tcp://localhost:7419
    /// ```
    pub async fn connect(self, url: Option<&str>) -> Result<Client, Error> {
        let url = utils::parse_provided_or_from_env(url)?;
        let mut builder = self;
        if let Some(password) = url.password() {
            builder.0.password = Some(password.to_string());
        }
        builder
            .connect_with(TcpConnector::new(utils::host_from_url(&url)))
            .await
    }

    /// Connect to a Faktory server through a custom [`Connector`].
    ///
    /// The connector is also what the client reconnects through, so it must
    /// be able to produce a fresh stream every time it is called.
    pub async fn connect_with<C: Connector>(self, connector: C) -> Result<Client, Error> {
        let mut opts = self.0;

        // fill in any missing options, and remember them for re-connect
        if opts.hostname.is_none() {
            opts.hostname = hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .or_else(|| Some("local".to_string()));
        }
        if opts.pid.is_none() {
            opts.pid = Some(std::process::id() as usize);
        }
        let wid = opts.wid.clone();

        let (requests, requests_rx) = mpsc::channel(16);
        let (state_tx, state) = watch::channel(ConnectionState::Idle);
        let (ready_tx, ready) = oneshot::channel();

        let engine = ConnectionEngine::new(connector, opts, requests_rx, state_tx);
        tokio::spawn(engine.run(ready_tx));

        ready.await.map_err(|_| Error::LostConnection)??;
        Ok(Client {
            requests,
            state,
            wid,
        })
    }
}

impl Client {
    /// Connect to a Faktory server with default options.
    ///
    /// See [`ClientBuilder::connect`] for how `url` is resolved.
    pub async fn connect(url: Option<&str>) -> Result<Client, Error> {
        ClientBuilder::default().connect(url).await
    }

    async fn issue<FC: FaktoryCommand>(
        &self,
        command: &FC,
        expect: Option<&'static str>,
    ) -> Result<Frame, Error> {
        let state = *self.state.borrow();
        if state != ConnectionState::Connected {
            return Err(Error::NotWritable { state });
        }

        let mut line = BytesMut::new();
        command.issue(&mut line)?;
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Dispatch(Dispatch {
                line: line.freeze(),
                expect,
                reply,
            }))
            .await
            .map_err(|_| Error::NotWritable {
                state: ConnectionState::Closed,
            })?;

        rx.await.map_err(|_| Error::LostConnection)?
    }

    /// Enqueue the given job on the Faktory server.
    ///
    /// Returns the job's id, which is generated at [`Job`] construction if
    /// the caller did not provide one.
    pub async fn push(&self, job: Job) -> Result<JobId, Error> {
        let jid = job.jid.clone();
        self.issue(&Push::from(job), Some("OK")).await?;
        Ok(jid)
    }

    /// Fetch the next available job from one of the given queues.
    ///
    /// Returns `Ok(None)` when every named queue is empty.
    pub async fn fetch<Q>(&self, queues: &[Q]) -> Result<Option<Job>, Error>
    where
        Q: AsRef<str>,
    {
        let frame = self.issue(&Fetch::from(queues), None).await?;
        single::read_json(frame)
    }

    /// Tell the server that the job with the given id completed
    /// successfully.
    pub async fn ack(&self, jid: JobId) -> Result<(), Error> {
        self.issue(&Ack::new(jid), Some("OK")).await.map(|_| ())
    }

    /// Tell the server that a job could not be completed.
    ///
    /// The job will be retried by the server according to its `retry`
    /// policy.
    pub async fn fail(&self, fail: Fail) -> Result<(), Error> {
        self.issue(&fail, Some("OK")).await.map(|_| ())
    }

    /// Send a heartbeat for this worker.
    ///
    /// Requires a worker id to have been configured through
    /// [`ClientBuilder::wid`]. The reply is either a plain
    /// acknowledgement, or an instruction to wind down; see
    /// [`HeartbeatStatus`].
    pub async fn beat(&self) -> Result<HeartbeatStatus, Error> {
        let wid = self.wid.clone().ok_or(Error::MissingWorkerId)?;
        let frame = self.issue(&Heartbeat::new(wid), None).await?;
        match single::read_json::<serde_json::Value>(frame)? {
            None => Ok(HeartbeatStatus::Ok),
            Some(s) => match s
                .as_object()
                .and_then(|m| m.get("state"))
                .and_then(|s| s.as_str())
            {
                Some("terminate") => Ok(HeartbeatStatus::Terminate),
                Some("quiet") => Ok(HeartbeatStatus::Quiet),
                _ => Err(error::Protocol::BadType {
                    expected: "heartbeat response",
                    received: format!("{}", s),
                }
                .into()),
            },
        }
    }

    /// Retrieve information about the running server.
    ///
    /// The returned value is the JSON response from the server.
    pub async fn info(&self) -> Result<serde_json::Value, Error> {
        let frame = self.issue(&Info, None).await?;
        match single::read_json(frame)? {
            Some(info) => Ok(info),
            None => Err(error::Protocol::BadType {
                expected: "server info",
                received: "OK".to_string(),
            }
            .into()),
        }
    }

    /// Ask the server to forget everything it knows: all jobs, all queues.
    ///
    /// Only meant for use against development and test servers.
    pub async fn flush(&self) -> Result<String, Error> {
        match self.issue(&Flush, None).await? {
            Frame::Inline(text) => Ok(text),
            ref other => Err(single::bad("server ok", other).into()),
        }
    }

    /// The current state of the underlying connection.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A channel over which every connection state transition is published.
    ///
    /// Useful for reacting to a session dying for good (the
    /// [`Closed`](ConnectionState::Closed) state) when no command happens
    /// to be in flight to report it.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Close the connection, sending `END` to the server first.
    ///
    /// Dropping every handle to the client has the same effect.
    pub async fn close(self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        if self.requests.send(Request::Close(tx)).await.is_ok() {
            let _ = rx.await;
        }
        Ok(())
    }
}
