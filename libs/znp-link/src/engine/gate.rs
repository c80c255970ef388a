//! Admission gate
//!
//! `Idle -> Busy -> (PromotedBusy | Idle)`. `PromotedBusy` means the holder
//! went on the wire while an earlier synchronous transaction was still
//! outstanding.

use std::fmt;

/// Engine-assigned transaction id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TxnId(pub(crate) u64);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who holds the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holder {
    /// Reserved for a dequeued request on its way to dispatch
    Dispatch,
    /// A synchronous transaction awaiting its reply
    Txn(TxnId),
    /// A device reset awaiting its indication
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Gate {
    #[default]
    Idle,
    Busy(Holder),
    PromotedBusy(Holder),
}

impl Gate {
    pub fn is_idle(&self) -> bool {
        matches!(self, Gate::Idle)
    }

    pub fn is_promoted(&self) -> bool {
        matches!(self, Gate::PromotedBusy(_))
    }

    pub fn holder(&self) -> Option<Holder> {
        match self {
            Gate::Idle => None,
            Gate::Busy(holder) | Gate::PromotedBusy(holder) => Some(*holder),
        }
    }

    pub fn is_held_by(&self, holder: Holder) -> bool {
        self.holder() == Some(holder)
    }

    /// Claim or hand over the gate
    pub(crate) fn hold(&mut self, holder: Holder, promoted: bool) {
        *self = if promoted {
            Gate::PromotedBusy(holder)
        } else {
            Gate::Busy(holder)
        };
    }

    /// Replace the holder, keeping the flavour
    pub(crate) fn transfer(&mut self, holder: Holder) {
        *self = match *self {
            Gate::PromotedBusy(_) => Gate::PromotedBusy(holder),
            Gate::Busy(_) | Gate::Idle => Gate::Busy(holder),
        };
    }

    pub(crate) fn release(&mut self) {
        *self = Gate::Idle;
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gate::Idle => write!(f, "IDLE"),
            Gate::Busy(holder) => write!(f, "BUSY({:?})", holder),
            Gate::PromotedBusy(holder) => write!(f, "PROMOTED_BUSY({:?})", holder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_transitions() {
        let mut gate = Gate::default();
        assert!(gate.is_idle());
        assert_eq!(gate.holder(), None);

        gate.hold(Holder::Txn(TxnId(1)), false);
        assert!(gate.is_held_by(Holder::Txn(TxnId(1))));
        assert!(!gate.is_promoted());

        gate.hold(Holder::Dispatch, true);
        assert_eq!(gate, Gate::PromotedBusy(Holder::Dispatch));

        gate.transfer(Holder::Txn(TxnId(2)));
        assert_eq!(gate, Gate::PromotedBusy(Holder::Txn(TxnId(2))));
        assert!(!gate.is_held_by(Holder::Txn(TxnId(1))));

        gate.release();
        assert!(gate.is_idle());
    }

    #[test]
    fn test_transfer_from_idle_claims() {
        let mut gate = Gate::Idle;
        gate.transfer(Holder::Reset);
        assert_eq!(gate, Gate::Busy(Holder::Reset));
        assert_eq!(gate.to_string(), "BUSY(Reset)");
    }
}
