//! CEMI handler (C6): the request/confirmation rendezvous.
//!
//! Owns the single in-flight `send_telegram` call and the classification of
//! inbound frames towards the telegram queue (group traffic) or management
//! connections (point-to-point traffic addressed to us).

use std::time::Duration;

use tokio::sync::{mpsc, Notify};

use crate::address::{Destination, IndividualAddress};
use crate::interface::CemiTransport;
use crate::secure::DataSecure;
use crate::telegram::Telegram;
use crate::tpci::Tpci;

use super::constants::CemiMessageCode;
use super::frame::CemiFrame;

const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(3);

/// Result of a successful [`CemiHandler::send_telegram`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOutcome {
    /// Whether the outgoing frame was wrapped in a Data Secure `SecureAPDU`.
    pub secured: bool,
}

/// Serializes outgoing `L_DATA.req`/`.con` rendezvous and classifies inbound
/// frames. At most one `send_telegram` call may be in flight at a time; the
/// queue (C8) enforces that upstream, this type just owns the confirmation
/// event the calls rendezvous on.
#[derive(Debug)]
pub struct CemiHandler<T: CemiTransport> {
    interface: T,
    data_secure: Option<DataSecure>,
    confirmation: Notify,
    group_incoming: mpsc::UnboundedSender<Telegram>,
    management_incoming: mpsc::UnboundedSender<Telegram>,
}

impl<T: CemiTransport> CemiHandler<T> {
    #[must_use]
    pub fn new(
        interface: T,
        data_secure: Option<DataSecure>,
        group_incoming: mpsc::UnboundedSender<Telegram>,
        management_incoming: mpsc::UnboundedSender<Telegram>,
    ) -> Self {
        Self {
            interface,
            data_secure,
            confirmation: Notify::new(),
            group_incoming,
            management_incoming,
        }
    }

    #[must_use]
    pub fn assigned_individual_address(&self) -> IndividualAddress {
        self.interface.assigned_individual_address()
    }

    /// Send a telegram and await its `L_DATA.con`. Fills `source` from the
    /// interface's assigned address when the caller left it unassigned.
    pub async fn send_telegram(&self, mut telegram: Telegram) -> crate::error::Result<SendOutcome> {
        if telegram.source == IndividualAddress::UNASSIGNED {
            telegram.source = self.interface.assigned_individual_address();
        }

        let mut frame = CemiFrame::from_telegram(CemiMessageCode::LDataReq, &telegram)?;

        if let Some(data_secure) = &self.data_secure {
            data_secure.secure_outgoing(&mut frame)?;
        }
        let secured = matches!(frame.payload, Some(crate::apci::Apci::SecureApdu { .. }));

        let bytes = frame.encode()?;
        tracing::debug!(dst = ?frame.destination, secured, "sending CEMI frame");

        // Register interest in the confirmation before handing the frame to
        // the interface, so a `.con` that races ahead of us is never missed.
        let notified = self.confirmation.notified();
        self.interface.send_cemi(&bytes).await?;

        tokio::time::timeout(CONFIRMATION_TIMEOUT, notified)
            .await
            .map_err(|_| crate::error::KnxError::confirmation_timeout())?;

        Ok(SendOutcome { secured })
    }

    /// Feed one inbound, already-parsed CEMI frame through the pipeline.
    /// Data Secure failures are terminal for the frame: logged and dropped,
    /// never propagated to the caller.
    pub async fn handle_cemi_frame(&self, mut frame: CemiFrame) {
        if matches!(frame.payload, Some(crate::apci::Apci::SecureApdu { .. })) {
            if let Some(data_secure) = &self.data_secure {
                if let Err(err) = data_secure.process_incoming(&mut frame) {
                    tracing::warn!(src = ?frame.source, error = %err, "dropping frame: Data Secure rejected it");
                    return;
                }
            } else {
                tracing::warn!(src = ?frame.source, "dropping Secure frame: no Data Secure key material configured");
                return;
            }
        } else if let (Destination::Group(group), Some(data_secure)) = (&frame.destination, &self.data_secure) {
            if data_secure.requires_security(*group) {
                tracing::warn!(src = ?frame.source, dst = ?group, "dropping plain frame: destination group requires Data Secure");
                return;
            }
        }

        match frame.message_code {
            CemiMessageCode::LDataCon => {
                tracing::debug!("L_DATA.con received, releasing pending send");
                self.confirmation.notify_one();
            }
            CemiMessageCode::LDataReq => {
                tracing::warn!(src = ?frame.source, "dropping inbound L_DATA.req: requests are outgoing only");
            }
            CemiMessageCode::LDataInd => self.route_indication(frame).await,
        }
    }

    async fn route_indication(&self, frame: CemiFrame) {
        let is_group_transport = matches!(frame.tpci, Tpci::DataGroup | Tpci::DataTagGroup | Tpci::DataBroadcast);
        // TDataIndividual/TDataConnected carry P2P application payloads;
        // TConnect/TDisconnect/TAck/TNak are the connection-lifecycle and
        // ACK/NAK control frames Management (C7) needs to observe to drive
        // its connect/disconnect/request state machine at all.
        let is_p2p_transport = matches!(
            frame.tpci,
            Tpci::DataIndividual | Tpci::DataConnected(_) | Tpci::Connect | Tpci::Disconnect | Tpci::Ack(_) | Tpci::Nak(_)
        );
        let addressed_to_us =
            matches!(frame.destination, Destination::Individual(dst) if dst == self.interface.assigned_individual_address());

        if is_p2p_transport && addressed_to_us && frame.flags.ack_requested() {
            self.send_ack(frame.source, frame.tpci.sequence_number()).await;
        }

        if is_group_transport && frame.destination.is_group() {
            let telegram = frame.to_telegram();
            tracing::debug!(dst = ?telegram.destination, "dispatching group telegram to queue");
            let _ = self.group_incoming.send(telegram);
            return;
        }

        if is_p2p_transport && addressed_to_us {
            let telegram = frame.to_telegram();
            tracing::debug!(src = ?telegram.source, "dispatching P2P telegram to management");
            let _ = self.management_incoming.send(telegram);
            return;
        }

        tracing::debug!(dst = ?frame.destination, "dropping indication not addressed to us");
    }

    /// Emit an immediate `T_ACK` towards `peer`, independent of the
    /// request/confirmation rendezvous: this does not wait for its own
    /// `L_DATA.con`, matching the "irrespective of the request/response
    /// cycle" obligation.
    async fn send_ack(&self, peer: IndividualAddress, seq: u8) {
        let destination = Destination::Individual(peer);
        let frame = CemiFrame {
            message_code: CemiMessageCode::LDataReq,
            flags: crate::cemi::CemiFlags::default_for(&destination),
            source: self.interface.assigned_individual_address(),
            destination,
            tpci: Tpci::Ack(seq),
            payload: None,
        };
        match frame.encode() {
            Ok(bytes) => {
                if let Err(err) = self.interface.send_cemi(&bytes).await {
                    tracing::warn!(%peer, error = %err, "failed to send T_ACK");
                }
            }
            Err(err) => tracing::warn!(%peer, error = %err, "failed to encode T_ACK frame"),
        }
    }
}
