//! User callback contracts
//!
//! Every per-packet decision point in the graph is a small trait with a
//! blanket implementation for `FnMut + Clone + Send` closures. Whatever
//! the closure captures *is* the user context the framework threads
//! through: the `Clone` bound is the replication hook the scheduler
//! invokes when it clones a vertex across cores. State that must stay
//! shared between clones is captured as an `Arc`.
//!
//! Callbacks may not raise; they communicate through return values. They
//! run on the fast path — no allocation, no logging, no blocking.

use flux_packet::Packet;

/// Outcome of a drop-deciding handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Forward the packet downstream
    Keep,
    /// Free the packet; counted as dropped
    Drop,
    /// Free the packet; counted as broken (failed an integrity check)
    Broken,
}

impl From<bool> for Verdict {
    /// `true` keeps the packet, mirroring boolean handler conventions
    fn from(keep: bool) -> Self {
        if keep {
            Verdict::Keep
        } else {
            Verdict::Drop
        }
    }
}

/// In-place packet mutation without a drop decision
pub trait PacketHandler: Send + 'static {
    /// Process one packet
    fn handle(&mut self, pkt: &mut Packet<'_>);

    /// Replicate this handler (and its captured context) for a new
    /// vertex clone
    fn fork(&self) -> Box<dyn PacketHandler>;
}

impl<F> PacketHandler for F
where
    F: FnMut(&mut Packet<'_>) + Clone + Send + 'static,
{
    #[inline(always)]
    fn handle(&mut self, pkt: &mut Packet<'_>) {
        self(pkt)
    }

    fn fork(&self) -> Box<dyn PacketHandler> {
        Box::new(self.clone())
    }
}

/// Packet mutation with a keep/drop/broken decision
pub trait DropHandler: Send + 'static {
    /// Process one packet and decide its fate
    fn handle(&mut self, pkt: &mut Packet<'_>) -> Verdict;

    /// Replicate for a new vertex clone
    fn fork(&self) -> Box<dyn DropHandler>;
}

impl<F> DropHandler for F
where
    F: FnMut(&mut Packet<'_>) -> Verdict + Clone + Send + 'static,
{
    #[inline(always)]
    fn handle(&mut self, pkt: &mut Packet<'_>) -> Verdict {
        self(pkt)
    }

    fn fork(&self) -> Box<dyn DropHandler> {
        Box::new(self.clone())
    }
}

/// Chooses one of `n` output flows per packet
pub trait Splitter: Send + 'static {
    /// Return the output index; out-of-range indices drop the packet
    fn split(&mut self, pkt: &mut Packet<'_>) -> usize;

    /// Replicate for a new vertex clone
    fn fork(&self) -> Box<dyn Splitter>;
}

impl<F> Splitter for F
where
    F: FnMut(&mut Packet<'_>) -> usize + Clone + Send + 'static,
{
    #[inline(always)]
    fn split(&mut self, pkt: &mut Packet<'_>) -> usize {
        self(pkt)
    }

    fn fork(&self) -> Box<dyn Splitter> {
        Box::new(self.clone())
    }
}

/// Two-way accept/reject classification
pub trait Separator: Send + 'static {
    /// `true` sends the packet to the accepted flow
    fn separate(&mut self, pkt: &mut Packet<'_>) -> bool;

    /// Replicate for a new vertex clone
    fn fork(&self) -> Box<dyn Separator>;
}

impl<F> Separator for F
where
    F: FnMut(&mut Packet<'_>) -> bool + Clone + Send + 'static,
{
    #[inline(always)]
    fn separate(&mut self, pkt: &mut Packet<'_>) -> bool {
        self(pkt)
    }

    fn fork(&self) -> Box<dyn Separator> {
        Box::new(self.clone())
    }
}

/// Fills freshly allocated packets at a clocked rate
pub trait Generator: Send + 'static {
    /// Fill one packet; the buffer arrives reset
    fn generate(&mut self, pkt: &mut Packet<'_>);

    /// Replicate for a new vertex clone
    fn fork(&self) -> Box<dyn Generator>;
}

impl<F> Generator for F
where
    F: FnMut(&mut Packet<'_>) + Clone + Send + 'static,
{
    #[inline(always)]
    fn generate(&mut self, pkt: &mut Packet<'_>) {
        self(pkt)
    }

    fn fork(&self) -> Box<dyn Generator> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_packet::buffer::PacketBuffer;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_closure_context_forks() {
        let shared = Arc::new(AtomicU64::new(0));
        let counter = shared.clone();
        let mut handler = move |_pkt: &mut Packet<'_>| {
            counter.fetch_add(1, Ordering::Relaxed);
        };

        let mut forked = PacketHandler::fork(&handler);

        let mut buf = PacketBuffer::empty();
        buf.append(20).unwrap();
        let mut pkt = Packet::new(&mut buf);
        handler.handle(&mut pkt);
        forked.handle(&mut pkt);

        // Arc captures are the shared-read-write escape hatch: both
        // clones observe the same counter.
        assert_eq!(shared.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_verdict_from_bool() {
        assert_eq!(Verdict::from(true), Verdict::Keep);
        assert_eq!(Verdict::from(false), Verdict::Drop);
    }
}
