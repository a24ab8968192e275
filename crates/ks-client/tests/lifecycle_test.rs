//! End-to-end key lifecycle and crypto blob round trips against the
//! software backend.

use ks_client::{
    iv, smoke, AlgoSpec, CryptoBlob, KeySlot, KeySpec, Keystore, KeystoreError, SeedClass,
    HEADER_LEN,
};
use ks_core::{Command, ECC_KEYPAIR_SIZE};
use ks_soft::SoftBackend;

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 5)) as u8)
        .collect()
}

fn load(ks: &Keystore<SoftBackend>, seed: SeedClass, spec: KeySpec) -> KeySlot {
    let ticket = ks.register(seed).unwrap();
    let mut wrapped = ks.generate_key(&ticket, spec).unwrap();
    ks.load_key(&ticket, &mut wrapped).unwrap()
}

#[test]
fn generated_key_matches_reported_size() {
    let ks = Keystore::new(SoftBackend::new());
    let ticket = ks.register(SeedClass::Device).unwrap();
    for spec in KeySpec::ALL {
        let sizes = ks.wrapped_key_size(spec).unwrap();
        let wrapped = ks.generate_key(&ticket, spec).unwrap();
        assert_eq!(wrapped.len(), sizes.wrapped, "{spec}");
        assert!(sizes.wrapped > sizes.unwrapped);
    }
    assert_eq!(
        ks.wrapped_key_size(KeySpec::EccPair).unwrap().unwrapped,
        ECC_KEYPAIR_SIZE
    );
}

#[test]
fn roundtrip_every_encryption_algorithm() {
    let ks = Keystore::new(SoftBackend::new());
    let aes = load(&ks, SeedClass::User, KeySpec::Raw256);
    let ecc = load(&ks, SeedClass::User, KeySpec::EccPair);

    for algo in [AlgoSpec::AesCcm, AlgoSpec::AesGcm, AlgoSpec::Ecies] {
        let slot = if algo.is_aes() { &aes } else { &ecc };
        let mut iv = iv::generate(algo).unwrap();
        if algo == AlgoSpec::AesCcm {
            // 3-byte CCM length field, room for the 1 MiB case
            iv[0] = 2;
        }
        for len in [0usize, 1, 1024, 1 << 20] {
            let plaintext = make_data(len);
            let blob = ks.encrypt(slot, algo, &iv, &plaintext).unwrap();

            let expected = HEADER_LEN + ks.encrypt_size(algo, len).unwrap();
            assert_eq!(blob.len(), expected, "{algo} len {len}");
            assert_eq!(blob.view().algo(), algo);
            assert_eq!(blob.view().iv(), &iv[..]);

            let decrypted = ks.decrypt(slot, blob.as_bytes()).unwrap();
            assert_eq!(decrypted, plaintext, "{algo} len {len}");
        }
    }
}

#[test]
fn roundtrip_with_raw128_keys() {
    let ks = Keystore::new(SoftBackend::new());
    let slot = load(&ks, SeedClass::Device, KeySpec::Raw128);
    for algo in [AlgoSpec::AesCcm, AlgoSpec::AesGcm] {
        let iv = iv::generate(algo).unwrap();
        let blob = ks.encrypt(&slot, algo, &iv, b"short").unwrap();
        assert_eq!(ks.decrypt(&slot, blob.as_bytes()).unwrap(), b"short");
    }
}

#[test]
fn ccm_short_length_field_caps_message_size() {
    let ks = Keystore::new(SoftBackend::new());
    let slot = load(&ks, SeedClass::User, KeySpec::Raw128);
    let iv = iv::generate(AlgoSpec::AesCcm).unwrap();
    assert_eq!(iv[0], 1);

    let fits = make_data(0xFFFF);
    let blob = ks.encrypt(&slot, AlgoSpec::AesCcm, &iv, &fits).unwrap();
    assert_eq!(ks.decrypt(&slot, blob.as_bytes()).unwrap(), fits);

    let err = ks
        .encrypt(&slot, AlgoSpec::AesCcm, &iv, &make_data(0x10000))
        .unwrap_err();
    assert_eq!(err.code(), -libc::EINVAL);
}

#[test]
fn caller_buffers_roundtrip() {
    let ks = Keystore::new(SoftBackend::new());
    let slot = load(&ks, SeedClass::Device, KeySpec::Raw128);
    let iv = iv::generate(AlgoSpec::AesGcm).unwrap();
    let plaintext = make_data(100);

    let mut out = vec![0xEEu8; 512];
    let blob_len = ks
        .encrypt_into(&slot, AlgoSpec::AesGcm, &iv, &plaintext, &mut out)
        .unwrap();
    assert_eq!(blob_len, HEADER_LEN + 100 + 16);
    assert!(out[blob_len..].iter().all(|b| *b == 0xEE));

    let mut plain = vec![0u8; 200];
    let n = ks.decrypt_into(&slot, &out[..blob_len], &mut plain).unwrap();
    assert_eq!(&plain[..n], &plaintext[..]);
}

#[test]
fn stored_blob_decrypts_after_reload() {
    let ks = Keystore::new(SoftBackend::new());
    let ticket = ks.register(SeedClass::Device).unwrap();
    let wrapped = ks.generate_key(&ticket, KeySpec::Raw256).unwrap();
    let stored_key = wrapped.into_bytes();

    let mut first = ks_client::WrappedKey::from_bytes(stored_key.clone());
    let slot = ks.load_key(&ticket, &mut first).unwrap();
    let iv = iv::generate(AlgoSpec::AesCcm).unwrap();
    let stored_blob = ks
        .encrypt(&slot, AlgoSpec::AesCcm, &iv, b"persisted")
        .unwrap()
        .into_bytes();
    ks.unload_key(&slot).unwrap();
    ks.unregister(&ticket).unwrap();

    // a later session with the same seed
    let ticket = ks.register(SeedClass::Device).unwrap();
    let mut again = ks_client::WrappedKey::from_bytes(stored_key);
    let slot = ks.load_key(&ticket, &mut again).unwrap();
    let blob = CryptoBlob::from_bytes(stored_blob).unwrap();
    assert_eq!(blob.algo(), AlgoSpec::AesCcm);
    assert_eq!(ks.decrypt(&slot, blob.as_bytes()).unwrap(), b"persisted");
}

#[test]
fn tampered_blob_fails_authentication() {
    let ks = Keystore::new(SoftBackend::new());
    let slot = load(&ks, SeedClass::User, KeySpec::Raw128);
    let iv = iv::generate(AlgoSpec::AesGcm).unwrap();
    let mut blob = ks
        .encrypt(&slot, AlgoSpec::AesGcm, &iv, b"integrity")
        .unwrap()
        .into_bytes();
    let last = blob.len() - 1;
    blob[last] ^= 0x01;

    match ks.decrypt(&slot, &blob).unwrap_err() {
        KeystoreError::Backend { command, errno } => {
            assert_eq!(command, Command::Decrypt);
            assert_eq!(errno.0, libc::EBADMSG);
        }
        other => panic!("expected backend failure, got: {other:?}"),
    }
}

#[test]
fn smoke_matrix_raw128_and_raw256() {
    let backend = SoftBackend::new();
    let ks = Keystore::new(backend.clone());
    for case in smoke::default_matrix() {
        smoke::run_case(&ks, case).unwrap();
    }
    smoke::run(&ks, SeedClass::User, KeySpec::Raw256, AlgoSpec::AesGcm).unwrap();
    assert_eq!(backend.sessions(), 0);
    assert_eq!(backend.loaded_keys(), 0);
}

#[test]
fn retry_required_hands_back_replacement_key() {
    let backend = SoftBackend::new();
    let ks = Keystore::new(backend.clone());
    let ticket = ks.register(SeedClass::User).unwrap();
    let mut wrapped = ks.generate_key(&ticket, KeySpec::Raw128).unwrap();
    let original = wrapped.clone();

    backend.require_rewrap_on_next_load();
    let err = ks.load_key(&ticket, &mut wrapped).unwrap_err();
    assert!(err.is_retry_required());
    assert_eq!(err.code(), -libc::EAGAIN);
    assert_eq!(wrapped.len(), original.len());
    assert_ne!(wrapped, original, "caller's buffer carries the replacement");
    assert_eq!(backend.loaded_keys(), 0);

    // the client never retries on its own; the caller does
    let slot = ks.load_key(&ticket, &mut wrapped).unwrap();
    let iv = iv::generate(AlgoSpec::AesGcm).unwrap();
    let blob = ks.encrypt(&slot, AlgoSpec::AesGcm, &iv, b"after rewrap").unwrap();
    assert_eq!(ks.decrypt(&slot, blob.as_bytes()).unwrap(), b"after rewrap");
}

#[test]
fn stale_ticket_and_foreign_slot_fail() {
    let ks = Keystore::new(SoftBackend::new());
    let ticket = ks.register(SeedClass::Device).unwrap();
    let mut wrapped = ks.generate_key(&ticket, KeySpec::Raw128).unwrap();
    let slot = ks.load_key(&ticket, &mut wrapped).unwrap();

    // same slot number, different session
    let other = ks.register(SeedClass::Device).unwrap();
    let foreign = KeySlot::new(other, i64::from(slot.id())).unwrap();
    let iv = iv::generate(AlgoSpec::AesGcm).unwrap();
    let err = ks.encrypt(&foreign, AlgoSpec::AesGcm, &iv, b"x").unwrap_err();
    assert_eq!(err.code(), -libc::EINVAL);

    ks.unregister(&ticket).unwrap();
    let err = ks.encrypt(&slot, AlgoSpec::AesGcm, &iv, b"x").unwrap_err();
    assert!(matches!(err, KeystoreError::Backend { .. }));
    assert!(ks.generate_key(&ticket, KeySpec::Raw128).is_err());
    assert!(ks.unregister(&ticket).is_err(), "double unregister");
}

#[test]
fn unload_releases_slot_once() {
    let backend = SoftBackend::new();
    let ks = Keystore::new(backend.clone());
    let slot = load(&ks, SeedClass::User, KeySpec::Raw128);
    assert_eq!(backend.loaded_keys(), 1);

    ks.unload_key(&slot).unwrap();
    assert_eq!(backend.loaded_keys(), 0);
    let err = ks.unload_key(&slot).unwrap_err();
    assert_eq!(err.code(), -libc::EINVAL);
}

#[test]
fn wrapped_app_key_encrypts_like_its_material() {
    let ks = Keystore::new(SoftBackend::new());
    let ticket = ks.register(SeedClass::User).unwrap();
    let app_key = [0x11u8; 32];
    let mut wrapped = ks.wrap_key(&ticket, &app_key, KeySpec::Raw256).unwrap();
    assert_eq!(
        wrapped.len(),
        ks.wrapped_key_size(KeySpec::Raw256).unwrap().wrapped
    );
    assert!(!wrapped.as_bytes().windows(32).any(|w| w == app_key));

    let slot = ks.load_key(&ticket, &mut wrapped).unwrap();
    let iv = [0x22u8; 16];
    let blob = ks.encrypt(&slot, AlgoSpec::AesGcm, &iv, b"app key").unwrap();
    assert_eq!(ks.decrypt(&slot, blob.as_bytes()).unwrap(), b"app key");
}

#[test]
fn every_endpoint_is_released() {
    let backend = SoftBackend::new();
    let ks = Keystore::new(backend.clone());
    let slot = load(&ks, SeedClass::User, KeySpec::Raw128);
    let _ = ks.decrypt(&slot, &[2u8; HEADER_LEN + 4]);
    let _ = ks.unregister_bytes(&[0u8; 8]);
    ks.unload_key(&slot).unwrap();

    assert!(backend.opens() > 0);
    assert_eq!(backend.opens(), backend.closes());
    assert_eq!(backend.requests(), backend.opens());
}
