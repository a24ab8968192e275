//! Encryption with loaded application keys
//!
//! - AES-GCM: 96-bit nonce from IV[0..12], 16-byte tag appended
//! - AES-CCM: IV[0] selects the length field (`1`: 13-byte nonce, messages
//!   under 64 KiB; `2`: 12-byte nonce), nonce from IV[1..], 8-byte tag appended
//! - ECIES (P-256): `[65-byte ephemeral point][AES-256-GCM ciphertext + tag]`

use aes_gcm::{
    aead::{
        generic_array::{typenum::Unsigned, GenericArray},
        AeadCore, AeadInPlace, KeyInit,
    },
    Aes128Gcm, Aes256Gcm,
};
use ccm::{
    consts::{U12, U13, U8},
    Ccm,
};
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroizing;

use ks_core::{AlgoSpec, Errno, KeySpec, MAX_IV_SIZE};

use crate::keys::decode_ecc_secret;

type Aes128Ccm = Ccm<aes::Aes128, U8, U13>;
type Aes256Ccm = Ccm<aes::Aes256, U8, U13>;
type Aes128CcmWide = Ccm<aes::Aes128, U8, U12>;
type Aes256CcmWide = Ccm<aes::Aes256, U8, U12>;

const GCM_TAG_SIZE: usize = 16;
const GCM_NONCE_SIZE: usize = 12;
const CCM_TAG_SIZE: usize = 8;
const CCM_NONCE_SIZE: usize = 13;
const CCM_WIDE_NONCE_SIZE: usize = 12;
const SEC1_POINT_SIZE: usize = 65;
const ECIES_OVERHEAD: usize = SEC1_POINT_SIZE + GCM_TAG_SIZE;

const ECIES_INFO: &[u8] = b"ks-soft/ecies";

/// An application key resident in a slot
pub struct LoadedKey {
    pub spec: KeySpec,
    pub material: Zeroizing<Vec<u8>>,
}

fn overhead(algo: AlgoSpec) -> Result<usize, Errno> {
    match algo {
        AlgoSpec::AesGcm => Ok(GCM_TAG_SIZE),
        AlgoSpec::AesCcm => Ok(CCM_TAG_SIZE),
        AlgoSpec::Ecies => Ok(ECIES_OVERHEAD),
        AlgoSpec::Ecdsa => Err(Errno::INVAL),
    }
}

pub fn encrypt_size(algo: AlgoSpec, input_size: u32) -> Result<u32, Errno> {
    let extra = overhead(algo)? as u32;
    input_size.checked_add(extra).ok_or(Errno::INVAL)
}

pub fn decrypt_size(algo: AlgoSpec, input_size: u32) -> Result<u32, Errno> {
    let extra = overhead(algo)? as u32;
    input_size.checked_sub(extra).ok_or(Errno::INVAL)
}

fn aes_nonce(algo: AlgoSpec, iv: &[u8]) -> Result<&[u8], Errno> {
    if iv.len() != MAX_IV_SIZE {
        return Err(Errno::INVAL);
    }
    match algo {
        AlgoSpec::AesCcm => {
            let len = match iv[0] {
                1 => CCM_NONCE_SIZE,
                2 => CCM_WIDE_NONCE_SIZE,
                _ => return Err(Errno::INVAL),
            };
            Ok(&iv[1..1 + len])
        }
        _ => Ok(&iv[..GCM_NONCE_SIZE]),
    }
}

fn check_key(key: &LoadedKey, algo: AlgoSpec) -> Result<(), Errno> {
    let fits = match algo {
        AlgoSpec::AesCcm | AlgoSpec::AesGcm => key.spec.is_symmetric(),
        AlgoSpec::Ecies => key.spec == KeySpec::EccPair,
        AlgoSpec::Ecdsa => false,
    };
    if fits {
        Ok(())
    } else {
        Err(Errno::INVAL)
    }
}

/// Encrypt `input` into `output`, which must be exactly `encrypt_size` long.
pub fn encrypt(
    key: &LoadedKey,
    algo: AlgoSpec,
    iv: &[u8],
    input: &[u8],
    output: &mut [u8],
) -> Result<(), Errno> {
    check_key(key, algo)?;
    if output.len() != input.len() + overhead(algo)? {
        return Err(Errno::INVAL);
    }
    let material = &key.material[..];
    if algo == AlgoSpec::Ecies {
        return ecies_seal(material, input, output);
    }
    let nonce = aes_nonce(algo, iv)?;
    let short = key.spec == KeySpec::Raw128;
    match (algo, short, nonce.len()) {
        (AlgoSpec::AesCcm, true, CCM_NONCE_SIZE) => {
            seal::<Aes128Ccm>(material, nonce, input, output)
        }
        (AlgoSpec::AesCcm, false, CCM_NONCE_SIZE) => {
            seal::<Aes256Ccm>(material, nonce, input, output)
        }
        (AlgoSpec::AesCcm, true, _) => seal::<Aes128CcmWide>(material, nonce, input, output),
        (AlgoSpec::AesCcm, false, _) => seal::<Aes256CcmWide>(material, nonce, input, output),
        (_, true, _) => seal::<Aes128Gcm>(material, nonce, input, output),
        _ => seal::<Aes256Gcm>(material, nonce, input, output),
    }
}

/// Decrypt `input` into `output`, which must be exactly `decrypt_size` long.
pub fn decrypt(
    key: &LoadedKey,
    algo: AlgoSpec,
    iv: &[u8],
    input: &[u8],
    output: &mut [u8],
) -> Result<(), Errno> {
    check_key(key, algo)?;
    if input.len() != output.len() + overhead(algo)? {
        return Err(Errno::INVAL);
    }
    let material = &key.material[..];
    if algo == AlgoSpec::Ecies {
        return ecies_open(material, input, output);
    }
    let nonce = aes_nonce(algo, iv)?;
    let short = key.spec == KeySpec::Raw128;
    match (algo, short, nonce.len()) {
        (AlgoSpec::AesCcm, true, CCM_NONCE_SIZE) => {
            open::<Aes128Ccm>(material, nonce, input, output)
        }
        (AlgoSpec::AesCcm, false, CCM_NONCE_SIZE) => {
            open::<Aes256Ccm>(material, nonce, input, output)
        }
        (AlgoSpec::AesCcm, true, _) => open::<Aes128CcmWide>(material, nonce, input, output),
        (AlgoSpec::AesCcm, false, _) => open::<Aes256CcmWide>(material, nonce, input, output),
        (_, true, _) => open::<Aes128Gcm>(material, nonce, input, output),
        _ => open::<Aes256Gcm>(material, nonce, input, output),
    }
}

/// Ciphertext goes to the front of `output`, the detached tag right after it.
fn seal<C: AeadInPlace + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    input: &[u8],
    output: &mut [u8],
) -> Result<(), Errno> {
    let cipher = C::new_from_slice(key).map_err(|_| Errno::INVAL)?;
    let (body, tag_out) = output.split_at_mut(input.len());
    body.copy_from_slice(input);
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), b"", body)
        .map_err(|_| Errno::INVAL)?;
    tag_out.copy_from_slice(&tag);
    Ok(())
}

fn open<C: AeadInPlace + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    input: &[u8],
    output: &mut [u8],
) -> Result<(), Errno> {
    let cipher = C::new_from_slice(key).map_err(|_| Errno::INVAL)?;
    let (body, tag) = input.split_at(output.len());
    if tag.len() != <C as AeadCore>::TagSize::to_usize() {
        return Err(Errno::INVAL);
    }
    output.copy_from_slice(body);
    let verified = cipher.decrypt_in_place_detached(
        GenericArray::from_slice(nonce),
        b"",
        output,
        GenericArray::from_slice(tag),
    );
    if verified.is_err() {
        output.fill(0);
        return Err(Errno::BADMSG);
    }
    Ok(())
}

/// 32-byte AES key followed by a 12-byte GCM nonce
fn ecies_key(shared: &[u8], ephemeral: &[u8]) -> Result<Zeroizing<[u8; 44]>, Errno> {
    let hkdf = Hkdf::<Sha256>::new(Some(ephemeral), shared);
    let mut okm = Zeroizing::new([0u8; 44]);
    hkdf.expand(ECIES_INFO, &mut okm[..]).map_err(|_| Errno::IO)?;
    Ok(okm)
}

fn ecies_seal(material: &[u8], input: &[u8], output: &mut [u8]) -> Result<(), Errno> {
    let recipient = decode_ecc_secret(material)?.public_key();
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let point = ephemeral.public_key().to_encoded_point(false);
    let shared = ephemeral.diffie_hellman(&recipient);
    let okm = ecies_key(shared.raw_secret_bytes().as_slice(), point.as_bytes())?;

    let (head, rest) = output.split_at_mut(SEC1_POINT_SIZE);
    head.copy_from_slice(point.as_bytes());
    seal::<Aes256Gcm>(&okm[..32], &okm[32..], input, rest)
}

fn ecies_open(material: &[u8], input: &[u8], output: &mut [u8]) -> Result<(), Errno> {
    let secret = decode_ecc_secret(material)?;
    let (point, rest) = input.split_at(SEC1_POINT_SIZE);
    let ephemeral = PublicKey::from_sec1_bytes(point).map_err(|_| Errno::BADMSG)?;
    let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), ephemeral.as_affine());
    let okm = ecies_key(shared.raw_secret_bytes().as_slice(), point)?;
    open::<Aes256Gcm>(&okm[..32], &okm[32..], rest, output)
}
