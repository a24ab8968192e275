//! Client key derivation, key material generation, and key wrapping
//!
//! Wrapped key layout: `[1-byte generation][16-byte SIV tag][ciphertext]`.
//! The generation byte is bound in as associated data, so a rewrapped key
//! cannot be rolled back by editing the header.

use aes_siv::{
    aead::{Aead, KeyInit, Payload},
    Aes256SivAead, Nonce,
};
use hkdf::Hkdf;
use p256::SecretKey;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use ks_core::{Errno, KeySizes, KeySpec, ECC_DIGITS, ECC_KEYPAIR_SIZE};

pub const SEED_SIZE: usize = 32;
pub const CLIENT_ID_SIZE: usize = 32;
pub const SIV_TAG_SIZE: usize = 16;

/// Generation byte plus SIV tag
pub const WRAP_OVERHEAD: usize = 1 + SIV_TAG_SIZE;

/// Width of one ECC component inside an unwrapped key pair
const ECC_FIELD_SIZE: usize = ECC_DIGITS * 4;
const P256_SCALAR_SIZE: usize = 32;

const CLIENT_KEY_INFO: &[u8] = b"ks-soft/client";

pub fn key_sizes(spec: KeySpec) -> KeySizes {
    KeySizes {
        wrapped: spec.key_len() + WRAP_OVERHEAD,
        unwrapped: spec.key_len(),
    }
}

/// Recover the key class from a wrapped blob's length.
pub fn spec_for_wrapped_len(len: usize) -> Option<KeySpec> {
    KeySpec::ALL
        .into_iter()
        .find(|spec| key_sizes(*spec).wrapped == len)
}

/// Identity of the calling program: SHA-256 of its executable path.
pub fn current_client_id() -> [u8; CLIENT_ID_SIZE] {
    let path = std::env::current_exe()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    client_id_for(&path)
}

pub fn client_id_for(identity: &str) -> [u8; CLIENT_ID_SIZE] {
    Sha256::digest(identity.as_bytes()).into()
}

pub fn random_seed() -> Zeroizing<[u8; SEED_SIZE]> {
    let mut seed = Zeroizing::new([0u8; SEED_SIZE]);
    OsRng.fill_bytes(&mut seed[..]);
    seed
}

/// Per-client AES-256-SIV wrapping key. Zeroized on drop.
pub struct ClientKey {
    bytes: Zeroizing<[u8; 64]>,
}

impl ClientKey {
    pub fn derive(seed: &[u8; SEED_SIZE], client_id: &[u8; CLIENT_ID_SIZE]) -> Result<Self, Errno> {
        let hkdf = Hkdf::<Sha256>::new(None, seed);
        let mut info = Vec::with_capacity(CLIENT_KEY_INFO.len() + CLIENT_ID_SIZE);
        info.extend_from_slice(CLIENT_KEY_INFO);
        info.extend_from_slice(client_id);

        let mut bytes = Zeroizing::new([0u8; 64]);
        hkdf.expand(&info, &mut bytes[..]).map_err(|_| Errno::IO)?;
        Ok(Self { bytes })
    }

    fn cipher(&self) -> Result<Aes256SivAead, Errno> {
        Aes256SivAead::new_from_slice(&self.bytes[..]).map_err(|_| Errno::IO)
    }

    /// Wrap `key` into `out`, which must be exactly `key.len() + WRAP_OVERHEAD` long.
    pub fn wrap(&self, generation: u8, key: &[u8], out: &mut [u8]) -> Result<(), Errno> {
        if out.len() != key.len() + WRAP_OVERHEAD {
            return Err(Errno::INVAL);
        }
        let aad = [generation];
        let sealed = self
            .cipher()?
            .encrypt(&Nonce::default(), Payload { msg: key, aad: &aad })
            .map_err(|_| Errno::IO)?;
        out[0] = generation;
        out[1..].copy_from_slice(&sealed);
        Ok(())
    }

    pub fn unwrap(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, Errno> {
        if wrapped.len() < WRAP_OVERHEAD {
            return Err(Errno::INVAL);
        }
        let (aad, sealed) = wrapped.split_at(1);
        self.cipher()?
            .decrypt(&Nonce::default(), Payload { msg: sealed, aad })
            .map(Zeroizing::new)
            .map_err(|_| Errno::BADMSG)
    }
}

impl std::fmt::Debug for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Fresh key material of the given class.
pub fn generate_material(spec: KeySpec) -> Zeroizing<Vec<u8>> {
    match spec {
        KeySpec::Raw128 | KeySpec::Raw256 => {
            let mut bytes = Zeroizing::new(vec![0u8; spec.key_len()]);
            OsRng.fill_bytes(&mut bytes);
            bytes
        }
        KeySpec::EccPair => encode_ecc_pair(&SecretKey::random(&mut OsRng)),
    }
}

/// Lay out a P-256 pair as three big-endian components (private scalar,
/// public x, public y), each right-aligned in a 68-byte field.
pub fn encode_ecc_pair(secret: &SecretKey) -> Zeroizing<Vec<u8>> {
    use p256::elliptic_curve::sec1::ToEncodedPoint;

    let mut out = Zeroizing::new(vec![0u8; ECC_KEYPAIR_SIZE]);
    let point = secret.public_key().to_encoded_point(false);
    // uncompressed SEC1: 0x04 || x || y
    let xy = &point.as_bytes()[1..];
    let scalar = secret.to_bytes();

    let pad = ECC_FIELD_SIZE - P256_SCALAR_SIZE;
    out[pad..ECC_FIELD_SIZE].copy_from_slice(&scalar);
    out[ECC_FIELD_SIZE + pad..2 * ECC_FIELD_SIZE].copy_from_slice(&xy[..P256_SCALAR_SIZE]);
    out[2 * ECC_FIELD_SIZE + pad..].copy_from_slice(&xy[P256_SCALAR_SIZE..]);
    out
}

pub fn decode_ecc_secret(material: &[u8]) -> Result<SecretKey, Errno> {
    if material.len() != ECC_KEYPAIR_SIZE {
        return Err(Errno::INVAL);
    }
    let pad = ECC_FIELD_SIZE - P256_SCALAR_SIZE;
    if material[..pad].iter().any(|b| *b != 0) {
        return Err(Errno::INVAL);
    }
    SecretKey::from_slice(&material[pad..ECC_FIELD_SIZE]).map_err(|_| Errno::INVAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_key() -> ClientKey {
        ClientKey::derive(&[7u8; SEED_SIZE], &client_id_for("/usr/bin/test")).unwrap()
    }

    #[test]
    fn test_wrapped_sizes() {
        assert_eq!(key_sizes(KeySpec::Raw128).wrapped, 33);
        assert_eq!(key_sizes(KeySpec::Raw256).wrapped, 49);
        assert_eq!(key_sizes(KeySpec::EccPair).wrapped, 221);
        assert_eq!(spec_for_wrapped_len(49), Some(KeySpec::Raw256));
        assert_eq!(spec_for_wrapped_len(50), None);
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let key = test_key();
        let material = generate_material(KeySpec::Raw256);
        let mut wrapped = vec![0u8; 49];
        key.wrap(0, &material, &mut wrapped).unwrap();

        let unwrapped = key.unwrap(&wrapped).unwrap();
        assert_eq!(&unwrapped[..], &material[..]);
    }

    #[test]
    fn test_wrap_rejects_wrong_out_len() {
        let mut out = vec![0u8; 32];
        assert_eq!(test_key().wrap(0, &[0u8; 16], &mut out), Err(Errno::INVAL));
    }

    #[test]
    fn test_generation_byte_is_authenticated() {
        let key = test_key();
        let mut wrapped = vec![0u8; 33];
        key.wrap(3, &[0x11; 16], &mut wrapped).unwrap();
        wrapped[0] = 4;
        assert_eq!(key.unwrap(&wrapped).unwrap_err(), Errno::BADMSG);
    }

    #[test]
    fn test_other_client_cannot_unwrap() {
        let mut wrapped = vec![0u8; 33];
        test_key().wrap(0, &[0x22; 16], &mut wrapped).unwrap();

        let other = ClientKey::derive(&[7u8; SEED_SIZE], &client_id_for("/usr/bin/other")).unwrap();
        assert_eq!(other.unwrap(&wrapped).unwrap_err(), Errno::BADMSG);
    }

    #[test]
    fn test_ecc_pair_layout() {
        let material = generate_material(KeySpec::EccPair);
        assert_eq!(material.len(), ECC_KEYPAIR_SIZE);

        let secret = decode_ecc_secret(&material).unwrap();
        assert_eq!(&encode_ecc_pair(&secret)[..], &material[..]);
    }

    #[test]
    fn test_ecc_padding_must_be_zero() {
        let mut material = generate_material(KeySpec::EccPair);
        material[0] = 1;
        assert_eq!(decode_ecc_secret(&material).unwrap_err(), Errno::INVAL);
    }

    #[test]
    fn test_client_key_debug_redacted() {
        assert!(format!("{:?}", test_key()).contains("REDACTED"));
    }

    proptest! {
        #[test]
        fn any_bit_flip_fails_unwrap(
            generation in any::<u8>(),
            byte in 0usize..33,
            bit in 0u8..8,
        ) {
            let key = test_key();
            let mut wrapped = vec![0u8; 33];
            key.wrap(generation, &[0x5A; 16], &mut wrapped).unwrap();
            wrapped[byte] ^= 1 << bit;
            prop_assert_eq!(key.unwrap(&wrapped).unwrap_err(), Errno::BADMSG);
        }
    }
}
