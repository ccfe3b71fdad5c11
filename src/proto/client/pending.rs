use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::error::{self, Error};
use crate::proto::single::{bad, Frame};

pub(crate) struct PendingReply {
    expect: Option<&'static str>,
    tx: oneshot::Sender<Result<Frame, Error>>,
}

/// The in-flight half of the pipelining contract.
///
/// Every command written to the socket registers exactly one entry here, in
/// write order. The server replies in receipt order, so each decoded frame
/// resumes the head entry. The queue never reorders: an entry that fails its
/// expected-status assertion still consumed exactly its own frame.
pub(crate) struct PendingReplies {
    entries: VecDeque<PendingReply>,
}

impl PendingReplies {
    pub fn new() -> Self {
        PendingReplies {
            entries: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register a continuation for the command whose bytes were just handed
    /// to the socket.
    pub fn push(
        &mut self,
        expect: Option<&'static str>,
        tx: oneshot::Sender<Result<Frame, Error>>,
    ) {
        self.entries.push_back(PendingReply { expect, tx });
    }

    /// Resume the head entry with `frame`.
    ///
    /// Returns `false` when no entry was waiting, which means the reply
    /// stream is desynchronized from the queue: the frame is discarded and
    /// the session must be torn down.
    pub fn resume(&mut self, frame: Frame) -> bool {
        let Some(entry) = self.entries.pop_front() else {
            return false;
        };
        let result = match frame {
            Frame::Error(line) => Err(error::Protocol::new(line).into()),
            frame => match entry.expect {
                Some(expected) => match frame {
                    Frame::Inline(ref text) if *text == expected => Ok(frame),
                    ref other => Err(bad(expected, other).into()),
                },
                None => Ok(frame),
            },
        };
        // the caller may have stopped waiting; that does not affect the
        // queue's correspondence with the reply stream
        let _ = entry.tx.send(result);
        true
    }

    /// Resume every entry with an error, in FIFO order, and empty the queue.
    pub fn drain<F>(&mut self, reason: F)
    where
        F: Fn() -> Error,
    {
        for entry in self.entries.drain(..) {
            let _ = entry.tx.send(Err(reason()));
        }
    }
}
