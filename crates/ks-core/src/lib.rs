//! ks-core: vocabulary shared by the keystore client and its backends
//!
//! Holds the closed enumerations that travel on the wire, the error
//! taxonomy, the configuration schema, and the request/transport protocol
//! a backend has to speak.

pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::{KeystoreError, KsResult};
pub use protocol::{Command, CryptoRequest, Endpoint, Errno, Request, Transport};
pub use types::{
    AlgoSpec, ApiVersion, ClientTicket, KeySizes, KeySpec, SeedClass, CLIENT_TICKET_SIZE,
    ECC_DIGITS, ECC_KEYPAIR_SIZE, KEYSTORE_API_VERSION, MAX_IV_SIZE,
};
