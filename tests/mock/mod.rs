use std::collections::VecDeque;
use std::io;

use faktory_client::{Connector, Error};
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

/// A [`Connector`] that hands out pre-created in-memory streams, one per
/// (re)connection attempt. Once the script runs out, connecting fails the
/// way a refused TCP dial would.
pub struct Scripted {
    streams: VecDeque<Option<DuplexStream>>,
}

impl Scripted {
    /// Script the next dial to be refused, ahead of any remaining
    /// connections.
    #[allow(dead_code)]
    pub fn refuse_next(&mut self) {
        self.streams.push_front(None);
    }
}

#[async_trait::async_trait]
impl Connector for Scripted {
    type Stream = DuplexStream;

    async fn connect(&mut self) -> Result<DuplexStream, Error> {
        match self.streams.pop_front() {
            Some(Some(stream)) => Ok(stream),
            _ => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "no more scripted connections",
            )
            .into()),
        }
    }
}

/// The server's end of one scripted connection.
pub struct ServerHalf {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

#[allow(dead_code)]
impl ServerHalf {
    fn new(stream: DuplexStream) -> Self {
        let (read, write) = tokio::io::split(stream);
        ServerHalf {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    pub async fn say(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn hi(&mut self) {
        self.say(b"+HI {\"v\":2}\r\n").await;
    }

    pub async fn ok(&mut self) {
        self.say(b"+OK\r\n").await;
    }

    pub async fn bulk(&mut self, payload: &str) {
        self.say(format!("${}\r\n{}\r\n", payload.len(), payload).as_bytes())
            .await;
    }

    pub async fn no_job(&mut self) {
        self.say(b"$-1\r\n").await;
    }

    /// Read one CRLF-terminated line written by the client, newline
    /// stripped.
    pub async fn read_line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        let l = line.len() - 2;
        line.truncate(l);
        line
    }

    /// Greet the client, consume its `HELLO`, and approve it. Returns the
    /// `HELLO` body (a JSON object, as text).
    pub async fn handshake(&mut self) -> String {
        self.hi().await;
        let hello = self.read_line().await;
        self.ok().await;
        hello
            .strip_prefix("HELLO ")
            .expect("client should have sent HELLO first")
            .to_string()
    }
}

/// A connector scripted for `n` successive connections, plus the server
/// half of each.
pub fn streams(n: usize) -> (Scripted, Vec<ServerHalf>) {
    let mut client_ends = VecDeque::new();
    let mut servers = Vec::new();
    for _ in 0..n {
        let (client_end, server_end) = duplex(4096);
        client_ends.push_back(Some(client_end));
        servers.push(ServerHalf::new(server_end));
    }
    (
        Scripted {
            streams: client_ends,
        },
        servers,
    )
}

/// A connector scripted for a single connection.
pub fn stream() -> (Scripted, ServerHalf) {
    let (connector, mut servers) = streams(1);
    (connector, servers.remove(0))
}
