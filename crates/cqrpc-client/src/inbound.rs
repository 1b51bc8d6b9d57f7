//! Inbound side of a streaming call

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadStatus {
    Init,
    Connecting,
    Reading,
    /// Stream ended, waiting for the terminal status
    Finishing,
    /// Cancelled with an operation in flight
    Canceling,
    Finished,
}

impl ReadStatus {
    /// Whether an operation of this side is waiting for its completion
    #[inline]
    pub(crate) fn is_pending(self) -> bool {
        matches!(
            self,
            ReadStatus::Connecting | ReadStatus::Reading | ReadStatus::Finishing
        )
    }
}
