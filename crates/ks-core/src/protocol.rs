//! Backend protocol: the fixed set of commands, their request shapes, and
//! the transport seam a backend plugs into.
//!
//! Every request is a single round trip on a freshly opened endpoint:
//!
//! ```text
//! Transport::open() → Endpoint::issue(Request) → drop(Endpoint)
//! ```
//!
//! Output fields are borrowed mutably from the caller, so a backend writes
//! results straight into caller-owned memory (wrapped keys, ciphertext).

use std::fmt;
use std::io;

use crate::types::{
    AlgoSpec, ApiVersion, ClientTicket, KeySizes, KeySpec, SeedClass, CLIENT_TICKET_SIZE,
};

/// Backend commands, numbered as on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Version,
    Register,
    Unregister,
    WrappedKeySize,
    GenerateKey,
    WrapKey,
    LoadKey,
    UnloadKey,
    EncryptSize,
    Encrypt,
    DecryptSize,
    Decrypt,
}

impl Command {
    pub fn number(self) -> u8 {
        match self {
            Command::Version => 0,
            Command::Register => 1,
            Command::Unregister => 2,
            Command::WrappedKeySize => 3,
            Command::GenerateKey => 4,
            Command::WrapKey => 5,
            Command::LoadKey => 6,
            Command::UnloadKey => 7,
            Command::EncryptSize => 8,
            Command::Encrypt => 9,
            Command::DecryptSize => 10,
            Command::Decrypt => 11,
        }
    }
}

/// A positive OS error number reported by a backend or the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub i32);

impl Errno {
    pub const INVAL: Errno = Errno(libc::EINVAL);
    pub const FAULT: Errno = Errno(libc::EFAULT);
    pub const AGAIN: Errno = Errno(libc::EAGAIN);
    pub const NOSPC: Errno = Errno(libc::ENOSPC);
    pub const BADMSG: Errno = Errno(libc::EBADMSG);
    pub const IO: Errno = Errno(libc::EIO);

    pub fn last_os_error() -> Self {
        Self::from(io::Error::last_os_error())
    }
}

impl From<io::Error> for Errno {
    fn from(e: io::Error) -> Self {
        Errno(e.raw_os_error().unwrap_or(libc::EIO))
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (errno {})", io::Error::from_raw_os_error(self.0), self.0)
    }
}

/// Shared shape of the encrypt and decrypt commands
#[derive(Debug)]
pub struct CryptoRequest<'a> {
    pub ticket: &'a ClientTicket,
    pub slot_id: u32,
    pub algo: AlgoSpec,
    /// Empty when the algorithm takes no IV
    pub iv: &'a [u8],
    pub input: &'a [u8],
    /// Pre-sized by the caller from the matching size query
    pub output: &'a mut [u8],
}

/// One command with its input fields and borrowed output fields
#[derive(Debug)]
pub enum Request<'a> {
    Version {
        version: &'a mut ApiVersion,
    },
    Register {
        seed: SeedClass,
        ticket: &'a mut [u8; CLIENT_TICKET_SIZE],
    },
    Unregister {
        ticket: &'a ClientTicket,
    },
    WrappedKeySize {
        key_spec: KeySpec,
        sizes: &'a mut KeySizes,
    },
    GenerateKey {
        ticket: &'a ClientTicket,
        key_spec: KeySpec,
        wrapped_key: &'a mut [u8],
    },
    WrapKey {
        ticket: &'a ClientTicket,
        key_spec: KeySpec,
        app_key: &'a [u8],
        wrapped_key: &'a mut [u8],
    },
    /// The backend may rewrite `wrapped_key` in place and fail with `EAGAIN`.
    LoadKey {
        ticket: &'a ClientTicket,
        wrapped_key: &'a mut [u8],
        slot_id: &'a mut u32,
    },
    UnloadKey {
        ticket: &'a ClientTicket,
        slot_id: u32,
    },
    EncryptSize {
        algo: AlgoSpec,
        input_size: u32,
        output_size: &'a mut u32,
    },
    Encrypt(CryptoRequest<'a>),
    DecryptSize {
        algo: AlgoSpec,
        input_size: u32,
        output_size: &'a mut u32,
    },
    Decrypt(CryptoRequest<'a>),
}

impl Request<'_> {
    pub fn command(&self) -> Command {
        match self {
            Request::Version { .. } => Command::Version,
            Request::Register { .. } => Command::Register,
            Request::Unregister { .. } => Command::Unregister,
            Request::WrappedKeySize { .. } => Command::WrappedKeySize,
            Request::GenerateKey { .. } => Command::GenerateKey,
            Request::WrapKey { .. } => Command::WrapKey,
            Request::LoadKey { .. } => Command::LoadKey,
            Request::UnloadKey { .. } => Command::UnloadKey,
            Request::EncryptSize { .. } => Command::EncryptSize,
            Request::Encrypt(_) => Command::Encrypt,
            Request::DecryptSize { .. } => Command::DecryptSize,
            Request::Decrypt(_) => Command::Decrypt,
        }
    }
}

/// An open connection to the backend. Dropping it closes the connection.
pub trait Endpoint {
    fn issue(&mut self, request: Request<'_>) -> Result<(), Errno>;
}

/// A way to reach the backend. Holds no connection state between calls.
pub trait Transport: Send + Sync {
    type Endpoint<'t>: Endpoint
    where
        Self: 't;

    fn open(&self) -> Result<Self::Endpoint<'_>, Errno>;

    /// Human-readable endpoint identifier for diagnostics
    fn target(&self) -> String;
}
