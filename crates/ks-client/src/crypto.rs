//! Crypto blob codec: sizing, framed encrypt/decrypt, and unframed calls

use ks_core::{AlgoSpec, CryptoRequest, KeystoreError, KsResult, Request, Transport};

use crate::blob::{self, BlobView, CryptoBlob, HEADER_LEN};
use crate::keys::{wire_len, KeySlot};
use crate::{iv, mem, Keystore};

impl<T: Transport> Keystore<T> {
    /// Ciphertext length `algo` produces for `plain_len` bytes.
    pub fn encrypt_size(&self, algo: AlgoSpec, plain_len: usize) -> KsResult<usize> {
        let mut output_size = 0u32;
        self.execute(Request::EncryptSize {
            algo,
            input_size: wire_len(plain_len, "plaintext")?,
            output_size: &mut output_size,
        })?;
        Ok(output_size as usize)
    }

    /// Plaintext length `algo` recovers from `cipher_len` bytes.
    pub fn decrypt_size(&self, algo: AlgoSpec, cipher_len: usize) -> KsResult<usize> {
        let mut output_size = 0u32;
        self.execute(Request::DecryptSize {
            algo,
            input_size: wire_len(cipher_len, "ciphertext")?,
            output_size: &mut output_size,
        })?;
        Ok(output_size as usize)
    }

    /// Encrypt without blob framing. `output` must be exactly
    /// [`Keystore::encrypt_size`] bytes.
    pub fn encrypt_raw(
        &self,
        slot: &KeySlot,
        algo: AlgoSpec,
        iv: &[u8],
        input: &[u8],
        output: &mut [u8],
    ) -> KsResult<()> {
        iv::validate(algo, iv)?;
        self.crypt(slot, algo, iv, input, output, true)
    }

    /// Decrypt without blob framing. `output` must be exactly
    /// [`Keystore::decrypt_size`] bytes.
    pub fn decrypt_raw(
        &self,
        slot: &KeySlot,
        algo: AlgoSpec,
        iv: &[u8],
        input: &[u8],
        output: &mut [u8],
    ) -> KsResult<()> {
        iv::validate(algo, iv)?;
        self.crypt(slot, algo, iv, input, output, false)
    }

    fn crypt(
        &self,
        slot: &KeySlot,
        algo: AlgoSpec,
        iv: &[u8],
        input: &[u8],
        output: &mut [u8],
        encrypt: bool,
    ) -> KsResult<()> {
        wire_len(input.len(), "input")?;
        let req = CryptoRequest {
            ticket: slot.ticket(),
            slot_id: slot.id(),
            algo,
            iv,
            input,
            output,
        };
        if encrypt {
            self.execute(Request::Encrypt(req))
        } else {
            self.execute(Request::Decrypt(req))
        }
    }

    /// Encrypt `plaintext` into a blob written at the front of `out`.
    ///
    /// Returns the blob length, `HEADER_LEN + encrypt_size(algo, len)`. An
    /// undersized `out` is rejected before the payload is sent.
    pub fn encrypt_into(
        &self,
        slot: &KeySlot,
        algo: AlgoSpec,
        iv: &[u8],
        plaintext: &[u8],
        out: &mut [u8],
    ) -> KsResult<usize> {
        iv::validate(algo, iv)?;
        let cipher_len = self.encrypt_size(algo, plaintext.len())?;
        let blob_len = blob::blob_len(cipher_len);
        if out.len() < blob_len {
            return Err(KeystoreError::invalid(format!(
                "output holds {} bytes, blob needs {blob_len}",
                out.len()
            )));
        }
        let (header, body) = out[..blob_len].split_at_mut(HEADER_LEN);
        blob::write_header(header, algo, iv)?;
        self.crypt(slot, algo, iv, plaintext, body, true)?;
        tracing::debug!(
            %algo,
            slot = slot.id(),
            plain = plaintext.len(),
            blob = blob_len,
            "encrypted"
        );
        Ok(blob_len)
    }

    /// Encrypt `plaintext` into a freshly allocated blob.
    pub fn encrypt(
        &self,
        slot: &KeySlot,
        algo: AlgoSpec,
        iv: &[u8],
        plaintext: &[u8],
    ) -> KsResult<CryptoBlob> {
        iv::validate(algo, iv)?;
        let cipher_len = self.encrypt_size(algo, plaintext.len())?;
        let mut out = mem::alloc_zeroed(blob::blob_len(cipher_len))?;
        let (header, body) = out.split_at_mut(HEADER_LEN);
        blob::write_header(header, algo, iv)?;
        self.crypt(slot, algo, iv, plaintext, body, true)?;
        tracing::debug!(
            %algo,
            slot = slot.id(),
            plain = plaintext.len(),
            blob = out.len(),
            "encrypted"
        );
        Ok(CryptoBlob::from_framed(algo, out))
    }

    /// Decrypt `blob` into the front of `out`, returning the plaintext length.
    pub fn decrypt_into(&self, slot: &KeySlot, blob: &[u8], out: &mut [u8]) -> KsResult<usize> {
        let view = BlobView::parse(blob)?;
        let plain_len = self.decrypt_size(view.algo(), view.ciphertext().len())?;
        if out.len() < plain_len {
            return Err(KeystoreError::invalid(format!(
                "output holds {} bytes, plaintext needs {plain_len}",
                out.len()
            )));
        }
        let out = &mut out[..plain_len];
        self.crypt(slot, view.algo(), view.iv(), view.ciphertext(), out, false)?;
        Ok(plain_len)
    }

    /// Decrypt a blob produced by [`Keystore::encrypt`].
    pub fn decrypt(&self, slot: &KeySlot, blob: &[u8]) -> KsResult<Vec<u8>> {
        let view = BlobView::parse(blob)?;
        let plain_len = self.decrypt_size(view.algo(), view.ciphertext().len())?;
        let mut out = mem::alloc_zeroed(plain_len)?;
        self.crypt(slot, view.algo(), view.iv(), view.ciphertext(), &mut out, false)?;
        tracing::debug!(algo = %view.algo(), slot = slot.id(), plain = plain_len, "decrypted");
        Ok(out)
    }
}
