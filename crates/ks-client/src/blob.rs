//! Crypto blob framing
//!
//! ```text
//! ┌──────┬──────────────────────┬────────────────────────┐
//! │ algo │ IV field (16 bytes,  │ ciphertext from the    │
//! │ (1B) │ zero-padded)         │ backend                │
//! └──────┴──────────────────────┴────────────────────────┘
//! ```
//!
//! The header is the same 17 bytes for every algorithm, so a blob carries
//! everything decryption needs apart from the ticket and slot.

use ks_core::{AlgoSpec, KeystoreError, KsResult, MAX_IV_SIZE};

use crate::mem;

pub const IV_FIELD_LEN: usize = MAX_IV_SIZE;
pub const HEADER_LEN: usize = 1 + IV_FIELD_LEN;

pub fn blob_len(cipher_len: usize) -> usize {
    HEADER_LEN + cipher_len
}

/// Write the algorithm tag and the IV (left-justified, zero-padded) into
/// the first `HEADER_LEN` bytes of `out`.
pub fn write_header(out: &mut [u8], algo: AlgoSpec, iv: &[u8]) -> KsResult<()> {
    if out.len() < HEADER_LEN {
        return Err(KeystoreError::invalid(format!(
            "blob header needs {HEADER_LEN} bytes, buffer has {}",
            out.len()
        )));
    }
    if iv.len() > IV_FIELD_LEN {
        return Err(KeystoreError::invalid(format!(
            "IV of {} bytes exceeds the IV field",
            iv.len()
        )));
    }
    out[0] = algo.blob_tag();
    let field = &mut out[1..HEADER_LEN];
    field.fill(0);
    mem::copy_checked(field, iv)
}

/// Borrowed, parsed view of a crypto blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobView<'a> {
    algo: AlgoSpec,
    iv_field: &'a [u8],
    ciphertext: &'a [u8],
}

impl<'a> BlobView<'a> {
    pub fn parse(blob: &'a [u8]) -> KsResult<Self> {
        if blob.len() < HEADER_LEN {
            return Err(KeystoreError::invalid(format!(
                "blob of {} bytes is shorter than its {HEADER_LEN}-byte header",
                blob.len()
            )));
        }
        let algo = AlgoSpec::try_from(blob[0])?;
        Ok(Self {
            algo,
            iv_field: &blob[1..HEADER_LEN],
            ciphertext: &blob[HEADER_LEN..],
        })
    }

    pub fn algo(&self) -> AlgoSpec {
        self.algo
    }

    /// The IV as the algorithm consumes it (empty for ECIES)
    pub fn iv(&self) -> &'a [u8] {
        &self.iv_field[..self.algo.iv_len()]
    }

    /// All 16 bytes of the IV field, padding included
    pub fn iv_field(&self) -> &'a [u8] {
        self.iv_field
    }

    pub fn ciphertext(&self) -> &'a [u8] {
        self.ciphertext
    }
}

/// An owned, well-formed crypto blob
#[derive(Clone, PartialEq, Eq)]
pub struct CryptoBlob {
    algo: AlgoSpec,
    bytes: Vec<u8>,
}

impl CryptoBlob {
    /// Validate the header of bytes read back from storage.
    pub fn from_bytes(bytes: Vec<u8>) -> KsResult<Self> {
        let algo = BlobView::parse(&bytes)?.algo();
        Ok(Self { algo, bytes })
    }

    /// `bytes` must already carry a header written by [`write_header`].
    pub(crate) fn from_framed(algo: AlgoSpec, bytes: Vec<u8>) -> Self {
        Self { algo, bytes }
    }

    pub fn view(&self) -> BlobView<'_> {
        BlobView {
            algo: self.algo,
            iv_field: &self.bytes[1..HEADER_LEN],
            ciphertext: &self.bytes[HEADER_LEN..],
        }
    }

    pub fn algo(&self) -> AlgoSpec {
        self.algo
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl AsRef<[u8]> for CryptoBlob {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for CryptoBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoBlob")
            .field("algo", &self.algo)
            .field("len", &self.bytes.len())
            .finish()
    }
}
