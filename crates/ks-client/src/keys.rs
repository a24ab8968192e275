//! Key lifecycle: sizing, generation, wrapping, loading and unloading

use ks_core::{ClientTicket, KeySizes, KeySpec, KeystoreError, KsResult, Request, Transport};

use crate::{mem, Keystore};

/// Application key in its wrapped, storable form.
///
/// The only shape in which key material leaves the backend. Its length is
/// always the backend-reported wrapped size for its key class.
#[derive(Clone, PartialEq, Eq)]
pub struct WrappedKey {
    bytes: Vec<u8>,
}

impl WrappedKey {
    /// Wrap bytes read back from storage.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
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

impl std::fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedKey")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A loaded key: a slot number paired with the ticket it was loaded under.
///
/// Slots are scoped to one ticket, so the two travel together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeySlot {
    ticket: ClientTicket,
    id: u32,
}

impl KeySlot {
    /// Rebuild a slot handle from a stored slot number.
    pub fn new(ticket: ClientTicket, slot_id: i64) -> KsResult<Self> {
        let id = u32::try_from(slot_id)
            .map_err(|_| KeystoreError::invalid(format!("slot id {slot_id} out of range")))?;
        Ok(Self { ticket, id })
    }

    pub fn ticket(&self) -> &ClientTicket {
        &self.ticket
    }

    pub fn id(&self) -> u32 {
        self.id
    }
}

/// Lengths travel as 32-bit fields.
pub(crate) fn wire_len(len: usize, what: &str) -> KsResult<u32> {
    u32::try_from(len)
        .map_err(|_| KeystoreError::invalid(format!("{what} of {len} bytes is too large")))
}

impl<T: Transport> Keystore<T> {
    /// Backend-reported wrapped and unwrapped sizes for `spec`.
    pub fn wrapped_key_size(&self, spec: KeySpec) -> KsResult<KeySizes> {
        let mut sizes = KeySizes::default();
        self.execute(Request::WrappedKeySize {
            key_spec: spec,
            sizes: &mut sizes,
        })?;
        if sizes.wrapped == 0 {
            return Err(KeystoreError::invalid(format!(
                "backend reports no wrapped size for {spec}"
            )));
        }
        Ok(sizes)
    }

    /// Generate fresh key material of class `spec`, returned wrapped.
    pub fn generate_key(&self, ticket: &ClientTicket, spec: KeySpec) -> KsResult<WrappedKey> {
        let sizes = self.wrapped_key_size(spec)?;
        let mut bytes = mem::alloc_zeroed(sizes.wrapped)?;
        self.execute(Request::GenerateKey {
            ticket,
            key_spec: spec,
            wrapped_key: &mut bytes,
        })?;
        tracing::debug!(%spec, len = bytes.len(), "generated key");
        Ok(WrappedKey::from_bytes(bytes))
    }

    /// Wrap caller-supplied key material. `app_key` must be exactly the
    /// size of a `spec` key.
    pub fn wrap_key(
        &self,
        ticket: &ClientTicket,
        app_key: &[u8],
        spec: KeySpec,
    ) -> KsResult<WrappedKey> {
        if app_key.len() != spec.key_len() {
            return Err(KeystoreError::invalid(format!(
                "{spec} keys are {} bytes, got {}",
                spec.key_len(),
                app_key.len()
            )));
        }
        let sizes = self.wrapped_key_size(spec)?;
        let mut bytes = mem::alloc_zeroed(sizes.wrapped)?;
        self.execute(Request::WrapKey {
            ticket,
            key_spec: spec,
            app_key,
            wrapped_key: &mut bytes,
        })?;
        tracing::debug!(%spec, len = bytes.len(), "wrapped key");
        Ok(WrappedKey::from_bytes(bytes))
    }

    /// Unwrap `wrapped` into a fresh slot under `ticket`.
    ///
    /// On [`KeystoreError::RetryRequired`] the backend has replaced
    /// `wrapped` with a rewrapped form: persist it, then load again.
    pub fn load_key(&self, ticket: &ClientTicket, wrapped: &mut WrappedKey) -> KsResult<KeySlot> {
        wire_len(wrapped.len(), "wrapped key")?;
        let mut slot_id = 0u32;
        let result = self.execute(Request::LoadKey {
            ticket,
            wrapped_key: &mut wrapped.bytes,
            slot_id: &mut slot_id,
        });
        match result {
            Ok(()) => {
                tracing::debug!(slot = slot_id, "loaded key");
                Ok(KeySlot {
                    ticket: *ticket,
                    id: slot_id,
                })
            }
            Err(e) => {
                if e.is_retry_required() {
                    tracing::info!("wrapped key replaced by the backend, persist it and reload");
                }
                Err(e)
            }
        }
    }

    /// Free a slot.
    pub fn unload_key(&self, slot: &KeySlot) -> KsResult<()> {
        self.execute(Request::UnloadKey {
            ticket: &slot.ticket,
            slot_id: slot.id,
        })?;
        tracing::debug!(slot = slot.id, "unloaded key");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_rejects_negative() {
        let ticket = ClientTicket::from_bytes([1; 8]);
        let err = KeySlot::new(ticket, -1).unwrap_err();
        assert_eq!(err.code(), -libc::EINVAL);
        assert!(KeySlot::new(ticket, i64::from(u32::MAX) + 1).is_err());

        let slot = KeySlot::new(ticket, 15).unwrap();
        assert_eq!(slot.id(), 15);
        assert_eq!(slot.ticket(), &ticket);
    }

    #[test]
    fn test_wrapped_key_debug_shows_length_only() {
        let key = WrappedKey::from_bytes(vec![0xAB; 33]);
        let printed = format!("{key:?}");
        assert!(printed.contains("33"));
        assert!(!printed.contains("171"));
    }

    #[test]
    fn test_wire_len() {
        assert_eq!(wire_len(17, "x").unwrap(), 17);
        if let Ok(big) = usize::try_from(u64::from(u32::MAX) + 1) {
            assert!(wire_len(big, "x").is_err());
        }
    }
}
