//! The cross-layer DTO passed between the queue, CEMI handler, and
//! management modules.

use crate::address::{Destination, GroupAddress, IndividualAddress, InternalGroupAddress};
use crate::apci::Apci;
use crate::tpci::Tpci;

/// Which way a [`Telegram`] is travelling through the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelegramDirection {
    Incoming,
    Outgoing,
}

/// A telegram in flight. `data_secure` records whether this telegram was (or
/// is to be) carried inside a Data Secure `SecureAPDU`; it is set by the CEMI
/// handler/Data Secure pipeline and never participates in equality.
#[derive(Debug, Clone)]
pub struct Telegram {
    pub destination: Destination,
    pub source: IndividualAddress,
    pub direction: TelegramDirection,
    pub payload: Option<Apci>,
    pub tpci: Tpci,
    pub data_secure: Option<bool>,
}

impl Telegram {
    /// Build an outgoing telegram, inferring the default TPCI from the
    /// destination kind: broadcast for group 0, group-data otherwise,
    /// individual-data for an `IndividualAddress`, group-data for an
    /// internal address (it never reaches the wire regardless).
    pub fn outgoing(destination: impl Into<Destination>, source: IndividualAddress, payload: Option<Apci>) -> Self {
        let destination = destination.into();
        let tpci = default_tpci(&destination);
        Self {
            destination,
            source,
            direction: TelegramDirection::Outgoing,
            payload,
            tpci,
            data_secure: None,
        }
    }

    /// Build an incoming telegram with an explicit TPCI as observed on the
    /// wire (incoming telegrams do not use the inferred default).
    pub fn incoming(
        destination: impl Into<Destination>,
        source: IndividualAddress,
        tpci: Tpci,
        payload: Option<Apci>,
    ) -> Self {
        Self {
            destination: destination.into(),
            source,
            direction: TelegramDirection::Incoming,
            payload,
            tpci,
            data_secure: None,
        }
    }

    #[must_use]
    pub const fn is_outgoing(&self) -> bool {
        matches!(self.direction, TelegramDirection::Outgoing)
    }

    #[must_use]
    pub const fn is_incoming(&self) -> bool {
        matches!(self.direction, TelegramDirection::Incoming)
    }
}

fn default_tpci(destination: &Destination) -> Tpci {
    match destination {
        Destination::Group(g) if g.is_broadcast() => Tpci::DataBroadcast,
        Destination::Group(_) | Destination::Internal(_) => Tpci::DataGroup,
        Destination::Individual(_) => Tpci::DataIndividual,
    }
}
