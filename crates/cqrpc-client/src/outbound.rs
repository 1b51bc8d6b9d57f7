//! Outbound side of a streaming call
//!
//! At most one write-kind operation (a message or the half-close) is in
//! flight. Everything requested meanwhile waits in a FIFO queue and is
//! issued, in order, as each completion is processed. The queue is
//! unbounded.

use std::collections::VecDeque;

use cqrpc_core::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteStatus {
    Init,
    Connecting,
    /// A message is in flight
    Writing,
    /// Connected, nothing in flight
    Idle,
    /// The half-close is in flight
    Finishing,
    /// Cancelled with an operation in flight
    Canceling,
    Finished,
}

impl WriteStatus {
    /// Whether an operation of this side is waiting for its completion
    #[inline]
    pub(crate) fn is_pending(self) -> bool {
        matches!(
            self,
            WriteStatus::Connecting | WriteStatus::Writing | WriteStatus::Finishing
        )
    }
}

pub(crate) enum Outbound<W> {
    Message { id: u64, msg: W },
    Done,
}

pub(crate) struct WriteSide<W> {
    pub(crate) status: WriteStatus,
    queue: VecDeque<Outbound<W>>,
    next_id: u64,
    in_flight: Option<u64>,
    done_requested: bool,
}

impl<W> WriteSide<W> {
    pub(crate) fn new() -> Self {
        Self {
            status: WriteStatus::Init,
            queue: VecDeque::new(),
            next_id: 0,
            in_flight: None,
            done_requested: false,
        }
    }

    /// Queue a message, returning its id
    pub(crate) fn push(&mut self, msg: W) -> Result<u64> {
        if self.done_requested {
            return Err(Error::WritesDone);
        }
        if matches!(self.status, WriteStatus::Canceling | WriteStatus::Finished) {
            return Err(Error::Closed);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.queue.push_back(Outbound::Message { id, msg });
        Ok(id)
    }

    /// Queue the half-close; false if it was already requested
    pub(crate) fn push_done(&mut self) -> bool {
        if self.done_requested
            || matches!(self.status, WriteStatus::Canceling | WriteStatus::Finished)
        {
            return false;
        }
        self.done_requested = true;
        self.queue.push_back(Outbound::Done);
        true
    }

    /// Take the next operation to issue when nothing is in flight
    ///
    /// Moves to `Writing` or `Finishing` when something was dequeued, to
    /// `Idle` otherwise. The caller issues the returned operation.
    pub(crate) fn next_op(&mut self) -> Option<Outbound<W>> {
        match self.queue.pop_front() {
            Some(op) => {
                match &op {
                    Outbound::Message { id, .. } => {
                        self.in_flight = Some(*id);
                        self.status = WriteStatus::Writing;
                    }
                    Outbound::Done => {
                        self.in_flight = None;
                        self.status = WriteStatus::Finishing;
                    }
                }
                Some(op)
            }
            None => {
                self.status = WriteStatus::Idle;
                None
            }
        }
    }

    /// Id of the message whose completion just arrived
    pub(crate) fn complete_message(&mut self) -> Option<u64> {
        self.in_flight.take()
    }

    /// Cancel the side, dropping anything not yet issued
    pub(crate) fn cancel(&mut self) {
        self.status = if self.status.is_pending() {
            WriteStatus::Canceling
        } else {
            WriteStatus::Finished
        };
        self.queue.clear();
        self.in_flight = None;
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }
}
