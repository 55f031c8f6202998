//! The trait boundary towards the physical interface (C11).
//!
//! Everything below this line — the KNXnet/IP tunnel or routing socket,
//! framing, reconnection — is a collaborator out of this crate's scope.
//! `CemiTransport` is the seam: production code implements it over a real
//! connection; `handle_cemi_frame` is called directly by that collaborator
//! for every frame it receives, in wire order.

use crate::address::IndividualAddress;
use crate::error::Result;

/// Towards the physical interface. Implementations own the actual socket or
/// tunnel and are expected to call the owning `CemiHandler::handle_cemi_frame`
/// for every inbound frame; this trait only covers the outgoing direction
/// plus the one piece of static configuration the stack needs at startup.
#[allow(async_fn_in_trait)]
pub trait CemiTransport {
    /// Hand a raw CEMI frame to the transport. Must deliver it to the bus or
    /// raise; never silently drop.
    async fn send_cemi(&self, frame: &[u8]) -> Result<()>;

    /// The individual address this interface is assigned on the bus, read
    /// once at handler construction for source-address substitution.
    fn assigned_individual_address(&self) -> IndividualAddress;
}

impl<C: CemiTransport + ?Sized> CemiTransport for std::sync::Arc<C> {
    async fn send_cemi(&self, frame: &[u8]) -> Result<()> {
        (**self).send_cemi(frame).await
    }

    fn assigned_individual_address(&self) -> IndividualAddress {
        (**self).assigned_individual_address()
    }
}

/// Recording/programmable test double, mirroring the role `MockTransport`
/// plays for the physical transport layer.
pub mod test_support {
    use super::CemiTransport;
    use crate::address::IndividualAddress;
    use crate::error::{KnxError, Result};
    use std::sync::Mutex;

    /// A [`CemiTransport`] double that records every frame passed to
    /// `send_cemi` and can be programmed to fail the next N sends.
    #[derive(Debug)]
    pub struct MockInterface {
        assigned: IndividualAddress,
        sent: Mutex<Vec<Vec<u8>>>,
        fail_next: Mutex<u32>,
    }

    impl MockInterface {
        #[must_use]
        pub fn new(assigned: IndividualAddress) -> Self {
            Self {
                assigned,
                sent: Mutex::new(Vec::new()),
                fail_next: Mutex::new(0),
            }
        }

        /// All frames handed to `send_cemi` so far, oldest first.
        #[must_use]
        pub fn sent_frames(&self) -> Vec<Vec<u8>> {
            self.sent.lock().expect("mock interface mutex poisoned").clone()
        }

        #[must_use]
        pub fn last_sent(&self) -> Option<Vec<u8>> {
            self.sent.lock().expect("mock interface mutex poisoned").last().cloned()
        }

        pub fn clear_sent(&self) {
            self.sent.lock().expect("mock interface mutex poisoned").clear();
        }

        /// Make the next `count` calls to `send_cemi` fail with a
        /// `CommunicationError` instead of recording the frame.
        pub fn fail_next_sends(&self, count: u32) {
            *self.fail_next.lock().expect("mock interface mutex poisoned") = count;
        }
    }

    impl CemiTransport for MockInterface {
        async fn send_cemi(&self, frame: &[u8]) -> Result<()> {
            let mut remaining = self.fail_next.lock().expect("mock interface mutex poisoned");
            if *remaining > 0 {
                *remaining -= 1;
                return Err(KnxError::communication("mock interface programmed to fail", true));
            }
            drop(remaining);
            self.sent.lock().expect("mock interface mutex poisoned").push(frame.to_vec());
            Ok(())
        }

        fn assigned_individual_address(&self) -> IndividualAddress {
            self.assigned
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn records_sent_frames_in_order() {
            let mock = MockInterface::new(IndividualAddress::new(1, 1, 1).unwrap());
            mock.send_cemi(&[0x01]).await.unwrap();
            mock.send_cemi(&[0x02]).await.unwrap();
            assert_eq!(mock.sent_frames(), vec![vec![0x01], vec![0x02]]);
            assert_eq!(mock.last_sent(), Some(vec![0x02]));
        }

        #[tokio::test]
        async fn programmed_failures_are_consumed_then_stop() {
            let mock = MockInterface::new(IndividualAddress::new(1, 1, 1).unwrap());
            mock.fail_next_sends(1);
            assert!(mock.send_cemi(&[0x01]).await.is_err());
            assert!(mock.send_cemi(&[0x02]).await.is_ok());
            assert_eq!(mock.sent_frames(), vec![vec![0x02]]);
        }
    }
}
