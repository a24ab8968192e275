//! ks-client: keystore client library
//!
//! Turns key-management calls into single backend round trips and owns the
//! persisted ciphertext framing:
//!
//! ```text
//! register(seed) ─► ticket ─► generate/wrap ─► WrappedKey ─► load ─► KeySlot
//!                                                                   │
//!                      CryptoBlob ◄── encrypt / decrypt ◄───────────┘
//! unload(slot) ─► unregister(ticket)
//! ```
//!
//! Every call goes through the [`gateway::Gateway`] of a [`Keystore`]
//! context. The backend endpoint is part of that context and fixed once it
//! is built.

pub mod blob;
pub mod crypto;
pub mod device;
pub mod gateway;
pub mod iv;
pub mod keys;
pub mod mem;
pub mod session;
pub mod smoke;

use ks_core::config::KeystoreConfig;
use ks_core::{ApiVersion, KsResult, Request, Transport};

pub use blob::{BlobView, CryptoBlob, HEADER_LEN, IV_FIELD_LEN};
pub use device::DeviceTransport;
pub use keys::{KeySlot, WrappedKey};
pub use ks_core::{
    AlgoSpec, ClientTicket, KeySizes, KeySpec, KeystoreError, SeedClass, KEYSTORE_API_VERSION,
};

use gateway::Gateway;

/// Version of this client library
pub fn library_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Client context bound to one backend endpoint
#[derive(Debug)]
pub struct Keystore<T: Transport = DeviceTransport> {
    gateway: Gateway<T>,
}

impl Keystore<DeviceTransport> {
    /// Talk to the device named in `[transport]`.
    pub fn from_config(config: &KeystoreConfig) -> Self {
        Self::new(DeviceTransport::new(config.transport.device.clone()))
    }
}

impl Default for Keystore<DeviceTransport> {
    fn default() -> Self {
        Self::new(DeviceTransport::default())
    }
}

impl<T: Transport> Keystore<T> {
    pub fn new(transport: T) -> Self {
        tracing::debug!(endpoint = %transport.target(), "keystore client created");
        Self {
            gateway: Gateway::new(transport),
        }
    }

    pub fn transport(&self) -> &T {
        self.gateway.transport()
    }

    pub(crate) fn execute(&self, request: Request<'_>) -> KsResult<()> {
        self.gateway.execute(request)
    }

    /// Backend API version.
    pub fn api_version(&self) -> KsResult<ApiVersion> {
        let mut version = ApiVersion::default();
        self.execute(Request::Version {
            version: &mut version,
        })?;
        if !version.is_compatible() {
            tracing::warn!(
                backend = %version,
                client = %KEYSTORE_API_VERSION,
                "keystore backend speaks a different major version"
            );
        }
        Ok(version)
    }
}
