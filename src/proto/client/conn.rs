use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::sleep;
use tokio_util::codec::FramedRead;

use super::options::ClientOptions;
use super::pending::PendingReplies;
use crate::error::{self, Error};
use crate::proto::single::{bad, FaktoryCommand, Frame, Hello, Hi, RespCodec};
use crate::proto::{Connector, EXPECTED_PROTOCOL_VERSION};

/// The lifecycle of a [`Client`](crate::Client)'s underlying connection.
///
/// Every transition is published through [`Client::state_changes`][sc],
/// including the terminal [`Closed`](ConnectionState::Closed) reached when
/// the reconnect budget runs out mid-session. Watch for that if your
/// application needs to react to a dead session rather than finding out on
/// its next command.
///
/// [sc]: crate::Client::state_changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionState {
    /// No connection has been attempted yet.
    Idle,

    /// A stream to the server is being established.
    Connecting,

    /// The `HI`/`HELLO` exchange is in progress.
    Handshaking,

    /// The session is established; commands may be issued.
    Connected,

    /// The connection dropped unexpectedly; another attempt will be made
    /// after a backoff delay.
    Reconnecting,

    /// An explicit close is in progress.
    Closing,

    /// Terminal; no further transitions occur.
    Closed,
}

pub(crate) struct Dispatch {
    pub(crate) line: Bytes,
    pub(crate) expect: Option<&'static str>,
    pub(crate) reply: oneshot::Sender<Result<Frame, Error>>,
}

pub(crate) enum Request {
    Dispatch(Dispatch),
    Close(oneshot::Sender<()>),
}

/// How a served session ended.
enum Exit {
    /// The socket failed or the server desynchronized; reconnect policy
    /// applies.
    Lost,
    /// An explicit close was requested (or every handle was dropped).
    Close(Option<oneshot::Sender<()>>),
}

/// What to do once a backoff delay has elapsed.
enum After {
    Reconnect,
    Close(Option<oneshot::Sender<()>>),
}

type Reader<S> = FramedRead<ReadHalf<S>, RespCodec>;
type Writer<S> = WriteHalf<S>;

/// The task that owns the socket.
///
/// All socket reads and writes happen here, in one loop per lifecycle
/// state. Command dispatches arrive over an mpsc channel; for each one the
/// engine writes the encoded line and registers the caller's continuation
/// in the pending-reply queue before the loop returns to polling the read
/// half, which is what keeps replies matched to commands in write order.
pub(crate) struct ConnectionEngine<C: Connector> {
    connector: C,
    opts: ClientOptions,
    requests: mpsc::Receiver<Request>,
    state: watch::Sender<ConnectionState>,
    pending: PendingReplies,
    attempt: u32,
}

impl<C: Connector> ConnectionEngine<C> {
    pub(crate) fn new(
        connector: C,
        opts: ClientOptions,
        requests: mpsc::Receiver<Request>,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        ConnectionEngine {
            connector,
            opts,
            requests,
            state,
            pending: PendingReplies::new(),
            attempt: 0,
        }
    }

    fn publish(&self, state: ConnectionState) {
        tracing::trace!(state = ?state, "connection state");
        self.state.send_replace(state);
    }

    /// Drive the connection until it is closed or its reconnect budget runs
    /// out.
    ///
    /// `ready` resolves when the first handshake completes (or definitively
    /// fails); it is what a pending `connect()` call awaits.
    pub(crate) async fn run(mut self, ready: oneshot::Sender<Result<(), Error>>) {
        let mut ready = Some(ready);
        let mut close_waiter: Option<oneshot::Sender<()>> = None;

        'session: loop {
            self.publish(ConnectionState::Connecting);
            let stream = match self.connector.connect().await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to establish connection");
                    self.attempt += 1;
                    if self.attempt > self.opts.reconnect_limit {
                        let e = self.exhausted(e);
                        if let Some(tx) = ready.take() {
                            let _ = tx.send(Err(e));
                        }
                        break 'session;
                    }
                    self.publish(ConnectionState::Reconnecting);
                    match self.backoff().await {
                        After::Reconnect => continue 'session,
                        After::Close(waiter) => {
                            close_waiter = waiter;
                            break 'session;
                        }
                    }
                }
            };

            self.publish(ConnectionState::Handshaking);
            let (read, write) = tokio::io::split(stream);
            let mut reader = FramedRead::new(read, RespCodec);
            let mut writer = write;
            if let Err(e) = self.handshake(&mut reader, &mut writer).await {
                if let Some(tx) = ready.take() {
                    // handshake rejection is terminal for the connect() call;
                    // the caller may retry with a fresh client
                    let _ = tx.send(Err(e));
                    break 'session;
                }
                tracing::warn!(error = %e, "handshake failed while reconnecting");
                self.attempt += 1;
                if self.attempt > self.opts.reconnect_limit {
                    let _ = self.exhausted(e);
                    break 'session;
                }
                self.publish(ConnectionState::Reconnecting);
                match self.backoff().await {
                    After::Reconnect => continue 'session,
                    After::Close(waiter) => {
                        close_waiter = waiter;
                        break 'session;
                    }
                }
            }

            self.attempt = 0;
            self.publish(ConnectionState::Connected);
            if let Some(tx) = ready.take() {
                let _ = tx.send(Ok(()));
            }

            match self.serve(&mut reader, &mut writer).await {
                Exit::Lost => {
                    self.pending.drain(|| Error::LostConnection);
                    self.attempt += 1;
                    if self.attempt > self.opts.reconnect_limit {
                        let _ = self.exhausted(Error::LostConnection);
                        break 'session;
                    }
                    self.publish(ConnectionState::Reconnecting);
                    match self.backoff().await {
                        After::Reconnect => continue 'session,
                        After::Close(waiter) => {
                            close_waiter = waiter;
                            break 'session;
                        }
                    }
                }
                Exit::Close(waiter) => {
                    self.publish(ConnectionState::Closing);
                    let mut line = BytesMut::new();
                    if crate::proto::single::End.issue(&mut line).is_ok() {
                        let _ = writer.write_all(&line).await;
                        let _ = writer.flush().await;
                    }
                    let _ = writer.shutdown().await;
                    close_waiter = waiter;
                    break 'session;
                }
            }
        }

        self.pending.drain(|| Error::LostConnection);
        self.publish(ConnectionState::Closed);
        if let Some(tx) = close_waiter {
            let _ = tx.send(());
        }
    }

    /// Record that the reconnect budget ran out, and produce the error that
    /// describes it.
    fn exhausted(&self, cause: Error) -> Error {
        tracing::error!(
            attempts = self.attempt,
            error = %cause,
            "giving up on this server"
        );
        error::Connect::ExhaustedReconnectBudget {
            attempts: self.attempt,
        }
        .into()
    }

    async fn handshake(
        &mut self,
        reader: &mut Reader<C::Stream>,
        writer: &mut Writer<C::Stream>,
    ) -> Result<(), Error> {
        let hi = match reader.next().await {
            Some(Ok(Frame::Hello(raw))) => {
                serde_json::from_str::<Hi>(&raw).map_err(Error::Serialization)?
            }
            Some(Ok(ref other)) => return Err(bad("server hi", other).into()),
            Some(Err(e)) => return Err(e),
            None => return Err(eof("server closed the connection before greeting us")),
        };

        if hi.version != EXPECTED_PROTOCOL_VERSION {
            return Err(error::Connect::VersionMismatch {
                ours: EXPECTED_PROTOCOL_VERSION,
                theirs: hi.version,
            }
            .into());
        }

        let mut hello = Hello {
            hostname: self.opts.hostname.clone(),
            labels: self.opts.labels.clone(),
            ..Hello::default()
        };
        if let Some(ref wid) = self.opts.wid {
            hello.wid = Some(wid.clone());
            hello.pid = self.opts.pid;
        }
        if hi.salt.is_some() {
            if let Some(ref pwd) = self.opts.password {
                hello.set_password(&hi, pwd);
            } else {
                return Err(error::Connect::AuthenticationNeeded.into());
            }
        }

        let mut line = BytesMut::new();
        hello.issue(&mut line)?;
        writer.write_all(&line).await?;
        writer.flush().await?;

        match reader.next().await {
            Some(Ok(Frame::Inline(ref s))) if s == "OK" => Ok(()),
            Some(Ok(Frame::Error(line))) => Err(error::Protocol::new(line).into()),
            Some(Ok(ref other)) => Err(bad("server ok", other).into()),
            Some(Err(e)) => Err(e),
            None => Err(eof("server closed the connection during handshake")),
        }
    }

    /// Serve an established session until it ends.
    async fn serve(
        &mut self,
        reader: &mut Reader<C::Stream>,
        writer: &mut Writer<C::Stream>,
    ) -> Exit {
        loop {
            tokio::select! {
                frame = reader.next() => match frame {
                    Some(Ok(frame)) => {
                        if !self.pending.resume(frame) {
                            tracing::warn!(
                                "reply arrived with no command awaiting it; poisoning session"
                            );
                            return Exit::Lost;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "failed to decode server reply");
                        return Exit::Lost;
                    }
                    None => {
                        tracing::debug!("server closed the connection");
                        return Exit::Lost;
                    }
                },
                request = self.requests.recv() => match request {
                    Some(Request::Dispatch(dispatch)) => {
                        // write and register before polling the read half
                        // again; this ordering is the pipelining guarantee
                        if let Err(e) = write_line(writer, &dispatch.line).await {
                            let _ = dispatch.reply.send(Err(e.into()));
                            return Exit::Lost;
                        }
                        self.pending.push(dispatch.expect, dispatch.reply);
                    }
                    Some(Request::Close(tx)) => return Exit::Close(Some(tx)),
                    None => return Exit::Close(None),
                },
                _ = sleep(self.opts.idle_timeout) => {
                    // soft signal only; BEAT is the authoritative liveness
                    // check
                    tracing::debug!(
                        timeout = ?self.opts.idle_timeout,
                        "nothing heard from the server lately"
                    );
                }
            }
        }
    }

    /// Wait out the linear backoff delay, refusing commands in the
    /// meantime.
    async fn backoff(&mut self) -> After {
        let delay = self.opts.reconnect_delay * self.attempt;
        tracing::debug!(attempt = self.attempt, delay = ?delay, "waiting before reconnecting");
        let wait = sleep(delay);
        tokio::pin!(wait);
        loop {
            tokio::select! {
                _ = &mut wait => return After::Reconnect,
                request = self.requests.recv() => match request {
                    Some(Request::Dispatch(dispatch)) => {
                        let _ = dispatch.reply.send(Err(Error::NotWritable {
                            state: ConnectionState::Reconnecting,
                        }));
                    }
                    Some(Request::Close(tx)) => return After::Close(Some(tx)),
                    None => return After::Close(None),
                },
            }
        }
    }
}

async fn write_line<S>(writer: &mut Writer<S>, line: &[u8]) -> std::io::Result<()>
where
    S: tokio::io::AsyncWrite,
{
    writer.write_all(line).await?;
    writer.flush().await
}

fn eof(msg: &'static str) -> Error {
    error::Connect::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, msg)).into()
}
