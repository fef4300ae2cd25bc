//! The common channel: a host-attachable byte pipe between simulations.
//!
//! `SEND` and `RECV` are the only instructions whose effects leave the
//! soup. The engine never blocks on the channel: both calls complete
//! synchronously, and an unattached side degrades to a no-op (`SEND`)
//! or a `NOP0` source (`RECV`). Transport, buffering, and pairing of
//! simulations are entirely the host's concern.

use crate::instset::Inst;

/// Host sink for instructions emitted by `SEND`.
pub trait Sender {
    /// Accepts one instruction. Must return promptly; the simulation
    /// thread runs through this call.
    fn send(&mut self, inst: Inst);
}

/// Host source for instructions consumed by `RECV`.
pub trait Receiver {
    /// Produces one instruction. Hosts with nothing to deliver should
    /// return [`Inst::Nop0`].
    fn receive(&mut self) -> Inst;
}

/// Functor pair wiring `SEND`/`RECV` to the host.
#[derive(Default)]
pub struct CommonChannel {
    sender: Option<Box<dyn Sender>>,
    receiver: Option<Box<dyn Receiver>>,
}

impl std::fmt::Debug for CommonChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommonChannel")
            .field("sender", &self.sender.is_some())
            .field("receiver", &self.receiver.is_some())
            .finish()
    }
}

impl CommonChannel {
    /// Creates a channel with neither side attached.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the sender functor, replacing any previous one.
    pub fn set_sender(&mut self, sender: Box<dyn Sender>) {
        self.sender = Some(sender);
    }

    /// Attaches the receiver functor, replacing any previous one.
    pub fn set_receiver(&mut self, receiver: Box<dyn Receiver>) {
        self.receiver = Some(receiver);
    }

    /// Detaches the sender; subsequent `SEND`s are dropped.
    pub fn clear_sender(&mut self) {
        self.sender = None;
    }

    /// Detaches the receiver; subsequent `RECV`s read `NOP0`.
    pub fn clear_receiver(&mut self) {
        self.receiver = None;
    }

    /// Returns `true` when a sender is attached.
    #[must_use]
    pub const fn has_sender(&self) -> bool {
        self.sender.is_some()
    }

    /// Returns `true` when a receiver is attached.
    #[must_use]
    pub const fn has_receiver(&self) -> bool {
        self.receiver.is_some()
    }

    pub(crate) fn send(&mut self, inst: Inst) {
        if let Some(sender) = self.sender.as_mut() {
            sender.send(inst);
        }
    }

    pub(crate) fn receive(&mut self) -> Inst {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.receive(),
            None => Inst::Nop0,
        }
    }
}
