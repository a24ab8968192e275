use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{KeystoreError, KsResult};

/// Size of a client ticket in bytes
pub const CLIENT_TICKET_SIZE: usize = 8;

/// Width of the IV field reserved in every request and every crypto blob
pub const MAX_IV_SIZE: usize = 16;

/// Number of 32-bit digits in one ECC scalar or coordinate
pub const ECC_DIGITS: usize = 17;

/// Unwrapped size of an ECC key pair: private scalar plus (x, y) public point
pub const ECC_KEYPAIR_SIZE: usize = 3 * ECC_DIGITS * 4;

/// Keystore API version this client speaks
pub const KEYSTORE_API_VERSION: ApiVersion = ApiVersion {
    major: 2,
    minor: 0,
    patch: 0,
};

/// Which long-lived secret the backend derives client keys from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedClass {
    /// Bound to the device; changes only if the device seed is compromised
    Device,
    /// Bound to the user; may be reset on request
    User,
}

impl SeedClass {
    pub fn tag(self) -> u32 {
        match self {
            SeedClass::Device => 0,
            SeedClass::User => 1,
        }
    }
}

impl TryFrom<u32> for SeedClass {
    type Error = KeystoreError;

    fn try_from(tag: u32) -> KsResult<Self> {
        match tag {
            0 => Ok(SeedClass::Device),
            1 => Ok(SeedClass::User),
            other => Err(KeystoreError::invalid(format!("unknown seed class tag {other}"))),
        }
    }
}

impl FromStr for SeedClass {
    type Err = KeystoreError;

    fn from_str(s: &str) -> KsResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "device" => Ok(SeedClass::Device),
            "user" => Ok(SeedClass::User),
            _ => Err(KeystoreError::invalid(format!(
                "unrecognized seed class \"{s}\" (expected device or user)"
            ))),
        }
    }
}

impl fmt::Display for SeedClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SeedClass::Device => "device",
            SeedClass::User => "user",
        })
    }
}

/// Semantic shape of an application key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySpec {
    /// 128-bit raw AES key
    Raw128,
    /// 256-bit raw AES key
    Raw256,
    /// ECC private/public key pair
    EccPair,
}

impl KeySpec {
    pub const ALL: [KeySpec; 3] = [KeySpec::Raw128, KeySpec::Raw256, KeySpec::EccPair];

    pub fn tag(self) -> u32 {
        match self {
            KeySpec::Raw128 => 1,
            KeySpec::Raw256 => 2,
            KeySpec::EccPair => 128,
        }
    }

    /// Length of the bare key material a caller must supply to wrap this class.
    pub fn key_len(self) -> usize {
        match self {
            KeySpec::Raw128 => 16,
            KeySpec::Raw256 => 32,
            KeySpec::EccPair => ECC_KEYPAIR_SIZE,
        }
    }

    pub fn is_symmetric(self) -> bool {
        matches!(self, KeySpec::Raw128 | KeySpec::Raw256)
    }
}

impl TryFrom<u32> for KeySpec {
    type Error = KeystoreError;

    fn try_from(tag: u32) -> KsResult<Self> {
        match tag {
            1 => Ok(KeySpec::Raw128),
            2 => Ok(KeySpec::Raw256),
            128 => Ok(KeySpec::EccPair),
            other => Err(KeystoreError::invalid(format!("unknown key spec tag {other}"))),
        }
    }
}

impl FromStr for KeySpec {
    type Err = KeystoreError;

    fn from_str(s: &str) -> KsResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "aes128" => Ok(KeySpec::Raw128),
            "aes256" => Ok(KeySpec::Raw256),
            "ecc" => Ok(KeySpec::EccPair),
            _ => Err(KeystoreError::invalid(format!("unrecognized keyspec \"{s}\""))),
        }
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeySpec::Raw128 => "aes128",
            KeySpec::Raw256 => "aes256",
            KeySpec::EccPair => "ecc",
        })
    }
}

/// Algorithm selected for a crypto operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgoSpec {
    AesCcm,
    AesGcm,
    Ecies,
    Ecdsa,
}

impl AlgoSpec {
    pub const ALL: [AlgoSpec; 4] = [
        AlgoSpec::AesCcm,
        AlgoSpec::AesGcm,
        AlgoSpec::Ecies,
        AlgoSpec::Ecdsa,
    ];

    pub fn tag(self) -> u32 {
        match self {
            AlgoSpec::AesCcm => 1,
            AlgoSpec::AesGcm => 2,
            AlgoSpec::Ecies => 128,
            AlgoSpec::Ecdsa => 129,
        }
    }

    /// The single byte stored at the head of a crypto blob.
    pub fn blob_tag(self) -> u8 {
        // every tag fits in one byte
        self.tag() as u8
    }

    /// Required IV length: the full field for AES modes, none otherwise.
    pub fn iv_len(self) -> usize {
        match self {
            AlgoSpec::AesCcm | AlgoSpec::AesGcm => MAX_IV_SIZE,
            AlgoSpec::Ecies | AlgoSpec::Ecdsa => 0,
        }
    }

    pub fn is_aes(self) -> bool {
        matches!(self, AlgoSpec::AesCcm | AlgoSpec::AesGcm)
    }
}

impl TryFrom<u32> for AlgoSpec {
    type Error = KeystoreError;

    fn try_from(tag: u32) -> KsResult<Self> {
        match tag {
            1 => Ok(AlgoSpec::AesCcm),
            2 => Ok(AlgoSpec::AesGcm),
            128 => Ok(AlgoSpec::Ecies),
            129 => Ok(AlgoSpec::Ecdsa),
            other => Err(KeystoreError::invalid(format!("unknown algo spec tag {other}"))),
        }
    }
}

impl TryFrom<u8> for AlgoSpec {
    type Error = KeystoreError;

    fn try_from(tag: u8) -> KsResult<Self> {
        AlgoSpec::try_from(u32::from(tag))
    }
}

impl FromStr for AlgoSpec {
    type Err = KeystoreError;

    fn from_str(s: &str) -> KsResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "aes_ccm" => Ok(AlgoSpec::AesCcm),
            "aes_gcm" => Ok(AlgoSpec::AesGcm),
            "ecc" | "ecies" => Ok(AlgoSpec::Ecies),
            "ecdsa" => Ok(AlgoSpec::Ecdsa),
            _ => Err(KeystoreError::invalid(format!("unrecognized algorithm \"{s}\""))),
        }
    }
}

impl fmt::Display for AlgoSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlgoSpec::AesCcm => "aes_ccm",
            AlgoSpec::AesGcm => "aes_gcm",
            AlgoSpec::Ecies => "ecies",
            AlgoSpec::Ecdsa => "ecdsa",
        })
    }
}

/// Opaque session credential issued by the backend on registration.
///
/// The client never interprets the bytes; it only hands them back.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientTicket {
    bytes: [u8; CLIENT_TICKET_SIZE],
}

impl ClientTicket {
    pub fn from_bytes(bytes: [u8; CLIENT_TICKET_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; CLIENT_TICKET_SIZE] {
        &self.bytes
    }
}

impl TryFrom<&[u8]> for ClientTicket {
    type Error = KeystoreError;

    fn try_from(bytes: &[u8]) -> KsResult<Self> {
        let bytes: [u8; CLIENT_TICKET_SIZE] = bytes.try_into().map_err(|_| {
            KeystoreError::invalid(format!(
                "client ticket must be {CLIENT_TICKET_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self { bytes })
    }
}

impl fmt::Debug for ClientTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTicket")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Backend-reported sizes for one key class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeySizes {
    pub wrapped: usize,
    pub unwrapped: usize,
}

/// Keystore API version (major changes break compatibility)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ApiVersion {
    /// A backend is usable when it speaks the client's major version.
    pub fn is_compatible(&self) -> bool {
        self.major == KEYSTORE_API_VERSION.major
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
