//! Session manager: client registration against a seed class

use ks_core::{ClientTicket, KsResult, Request, SeedClass, Transport, CLIENT_TICKET_SIZE};

use crate::Keystore;

impl<T: Transport> Keystore<T> {
    /// Register this client and obtain a session ticket. Never retried.
    pub fn register(&self, seed: SeedClass) -> KsResult<ClientTicket> {
        let mut ticket = [0u8; CLIENT_TICKET_SIZE];
        self.execute(Request::Register {
            seed,
            ticket: &mut ticket,
        })?;
        tracing::info!(%seed, "registered keystore client");
        Ok(ClientTicket::from_bytes(ticket))
    }

    /// Release a session ticket. Slots still loaded under it are the
    /// backend's to reclaim.
    pub fn unregister(&self, ticket: &ClientTicket) -> KsResult<()> {
        self.execute(Request::Unregister { ticket })?;
        tracing::info!("unregistered keystore client");
        Ok(())
    }

    /// [`Keystore::unregister`] for a ticket held as raw bytes. Malformed
    /// tickets never reach the backend.
    pub fn unregister_bytes(&self, ticket: &[u8]) -> KsResult<()> {
        let ticket = ClientTicket::try_from(ticket)?;
        self.unregister(&ticket)
    }
}
