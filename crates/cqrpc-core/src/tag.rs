//! Completion tag types
//!
//! A [`Tag`] names the call an event belongs to (a [`SlotKey`] into the
//! handler slab) and the operation that completed ([`Op`]). Tags are plain
//! values; they never keep a call alive on their own.

use core::fmt;

/// Key of a live handler in the slab
///
/// The index addresses the slot, the generation distinguishes successive
/// occupants of the same slot so that a late completion for a retired call
/// can never reach the call that reused its slot.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey {
    index: u32,
    generation: u32,
}

impl SlotKey {
    /// Sentinel value indicating no slot
    pub const NONE: SlotKey = SlotKey {
        index: u32::MAX,
        generation: 0,
    };

    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        SlotKey { index, generation }
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Get index as usize for slab addressing
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.index == u32::MAX
    }

    /// Build a tag for `op` on this slot
    #[inline]
    pub const fn tag(self, op: Op) -> Tag {
        Tag { key: self, op }
    }
}

impl fmt::Debug for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "SlotKey(NONE)")
        } else {
            write!(f, "SlotKey({}v{})", self.index, self.generation)
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "-")
        } else {
            write!(f, "{}v{}", self.index, self.generation)
        }
    }
}

/// Kind of operation a completion belongs to
///
/// One call can have at most one pending operation of each kind, so the
/// kind is enough to route a completion to the right transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Stream establishment (client side)
    Connect,
    /// Inbound message
    Read,
    /// Outbound message or half-close
    Write,
    /// Terminal status exchange
    Finish,
    /// Incoming call delivered to a server acceptor
    Accept,
    /// Application request forwarded onto the event loop
    Notify,
    /// Timer expiry or cancellation
    Alarm,
}

impl Op {
    pub const fn name(self) -> &'static str {
        match self {
            Op::Connect => "connect",
            Op::Read => "read",
            Op::Write => "write",
            Op::Finish => "finish",
            Op::Accept => "accept",
            Op::Notify => "notify",
            Op::Alarm => "alarm",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque completion tag carried by every queue event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
    pub key: SlotKey,
    pub op: Op,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.key, self.op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_key_none() {
        assert!(SlotKey::NONE.is_none());
        assert!(!SlotKey::new(0, 0).is_none());
        assert_eq!(format!("{:?}", SlotKey::NONE), "SlotKey(NONE)");
    }

    #[test]
    fn test_generation_distinguishes_keys() {
        let a = SlotKey::new(3, 1);
        let b = SlotKey::new(3, 2);
        assert_ne!(a, b);
        assert_eq!(a.index(), b.index());
    }

    #[test]
    fn test_tag_display() {
        let tag = SlotKey::new(7, 2).tag(Op::Read);
        assert_eq!(tag.to_string(), "7v2/read");
        assert_eq!(tag.op, Op::Read);
    }
}
