//! Initialisation vectors for the AES modes

use rand::RngCore;

use ks_core::{AlgoSpec, KeystoreError, KsResult, MAX_IV_SIZE};

/// Reject an IV whose length does not match what `algo` takes.
pub fn validate(algo: AlgoSpec, iv: &[u8]) -> KsResult<()> {
    if iv.len() != algo.iv_len() {
        return Err(KeystoreError::invalid(format!(
            "{algo} takes a {}-byte IV, got {}",
            algo.iv_len(),
            iv.len()
        )));
    }
    Ok(())
}

/// Fresh random IV for `algo`.
///
/// AES-CCM IVs carry the nonce length selector in byte 0 (`1` selects a
/// 13-byte nonce). ECIES takes no IV. ECDSA cannot encrypt.
pub fn generate(algo: AlgoSpec) -> KsResult<Vec<u8>> {
    match algo {
        AlgoSpec::AesGcm | AlgoSpec::AesCcm => {
            let mut iv = vec![0u8; MAX_IV_SIZE];
            rand::thread_rng().fill_bytes(&mut iv);
            if algo == AlgoSpec::AesCcm {
                iv[0] = 1;
            }
            Ok(iv)
        }
        AlgoSpec::Ecies => Ok(Vec::new()),
        AlgoSpec::Ecdsa => Err(KeystoreError::invalid("ecdsa has no encryption IV")),
    }
}
