//! Transport gateway: one backend round trip per call.

use ks_core::{Endpoint, KeystoreError, KsResult, Request, Transport};

/// Issues single requests against a [`Transport`].
///
/// No endpoint outlives a call: it is opened, used for exactly one request
/// and dropped on every exit path.
#[derive(Debug)]
pub struct Gateway<T> {
    transport: T,
}

impl<T: Transport> Gateway<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn execute(&self, request: Request<'_>) -> KsResult<()> {
        let command = request.command();
        let mut endpoint = self.transport.open().map_err(|errno| {
            tracing::warn!(
                endpoint = %self.transport.target(),
                ?command,
                %errno,
                "cannot open keystore endpoint"
            );
            KeystoreError::Backend { command, errno }
        })?;

        tracing::debug!(?command, nr = command.number(), "issuing keystore command");
        endpoint.issue(request).map_err(|errno| {
            tracing::warn!(?command, %errno, "keystore command failed");
            KeystoreError::from_backend(command, errno)
        })
    }
}
