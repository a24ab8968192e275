//! End-to-end smoke scenario
//!
//! One case registers a client, generates and loads a key, round-trips a
//! fixed message through the backend and tears everything down again.

use std::fmt;

use ks_core::{AlgoSpec, KeySpec, KeystoreError, KsResult, SeedClass, Transport};

use crate::keys::KeySlot;
use crate::{iv, Keystore};

/// Plaintext every smoke case round-trips
pub const SMOKE_MESSAGE: &[u8] = b"This is a very secret message!";

/// One row of the smoke matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmokeCase {
    pub seed: SeedClass,
    pub key_spec: KeySpec,
    pub algo: AlgoSpec,
}

impl SmokeCase {
    pub const fn new(seed: SeedClass, key_spec: KeySpec, algo: AlgoSpec) -> Self {
        Self {
            seed,
            key_spec,
            algo,
        }
    }
}

impl fmt::Display for SmokeCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seed = match self.seed {
            SeedClass::Device => "Device",
            SeedClass::User => "User",
        };
        let key = match self.key_spec {
            KeySpec::Raw128 => "128",
            KeySpec::Raw256 => "256",
            KeySpec::EccPair => "ECC",
        };
        let algo = match self.algo {
            AlgoSpec::AesCcm => "CCM",
            AlgoSpec::AesGcm => "GCM",
            AlgoSpec::Ecies => "ECIES",
            AlgoSpec::Ecdsa => "ECDSA",
        };
        write!(f, "Seed: {seed}\tKey Length: {key}\tAlgo: {algo}")
    }
}

/// The cases run when none are named explicitly.
pub fn default_matrix() -> [SmokeCase; 3] {
    [
        SmokeCase::new(SeedClass::User, KeySpec::Raw128, AlgoSpec::AesGcm),
        SmokeCase::new(SeedClass::Device, KeySpec::Raw128, AlgoSpec::AesGcm),
        SmokeCase::new(SeedClass::Device, KeySpec::Raw256, AlgoSpec::AesGcm),
    ]
}

/// Run one scenario. The slot and the ticket are released even when a step
/// in between fails; the first error wins.
pub fn run<T: Transport>(
    ks: &Keystore<T>,
    seed: SeedClass,
    key_spec: KeySpec,
    algo: AlgoSpec,
) -> KsResult<()> {
    run_case(ks, SmokeCase::new(seed, key_spec, algo))
}

pub fn run_case<T: Transport>(ks: &Keystore<T>, case: SmokeCase) -> KsResult<()> {
    let ticket = ks.register(case.seed)?;
    let result = with_ticket(ks, &ticket, case);
    let released = ks.unregister(&ticket);
    result.and(released)
}

fn with_ticket<T: Transport>(
    ks: &Keystore<T>,
    ticket: &ks_core::ClientTicket,
    case: SmokeCase,
) -> KsResult<()> {
    let sizes = ks.wrapped_key_size(case.key_spec)?;
    let mut wrapped = ks.generate_key(ticket, case.key_spec)?;
    tracing::debug!(wrapped = sizes.wrapped, unwrapped = sizes.unwrapped, "generated smoke key");

    let slot = ks.load_key(ticket, &mut wrapped)?;
    let result = round_trip(ks, &slot, case.algo);
    let released = ks.unload_key(&slot);
    result.and(released)
}

fn round_trip<T: Transport>(ks: &Keystore<T>, slot: &KeySlot, algo: AlgoSpec) -> KsResult<()> {
    let iv = iv::generate(algo)?;

    let mut cipher = vec![0u8; ks.encrypt_size(algo, SMOKE_MESSAGE.len())?];
    ks.encrypt_raw(slot, algo, &iv, SMOKE_MESSAGE, &mut cipher)?;

    let mut plain = vec![0u8; ks.decrypt_size(algo, cipher.len())?];
    ks.decrypt_raw(slot, algo, &iv, &cipher, &mut plain)?;

    if plain != SMOKE_MESSAGE {
        return Err(KeystoreError::invalid("decrypted message does not match"));
    }
    Ok(())
}
