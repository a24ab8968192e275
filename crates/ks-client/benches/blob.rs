use ks_client::{iv, AlgoSpec, KeySlot, KeySpec, Keystore, SeedClass};
use ks_soft::SoftBackend;

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

fn loaded(spec: KeySpec) -> (Keystore<SoftBackend>, KeySlot) {
    let ks = Keystore::new(SoftBackend::new());
    let ticket = ks.register(SeedClass::Device).unwrap();
    let mut wrapped = ks.generate_key(&ticket, spec).unwrap();
    let slot = ks.load_key(&ticket, &mut wrapped).unwrap();
    (ks, slot)
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt_gcm(bencher: divan::Bencher, size: usize) {
    let (ks, slot) = loaded(KeySpec::Raw256);
    let iv = iv::generate(AlgoSpec::AesGcm).unwrap();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            ks.encrypt(
                &slot,
                AlgoSpec::AesGcm,
                divan::black_box(&iv),
                divan::black_box(&data),
            )
            .unwrap()
        });
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_decrypt_gcm(bencher: divan::Bencher, size: usize) {
    let (ks, slot) = loaded(KeySpec::Raw256);
    let iv = iv::generate(AlgoSpec::AesGcm).unwrap();
    let blob = ks
        .encrypt(&slot, AlgoSpec::AesGcm, &iv, &make_data(size))
        .unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| ks.decrypt(&slot, divan::black_box(blob.as_bytes())).unwrap());
}

#[divan::bench(args = [1024, 65536])]
fn bench_encrypt_ecies(bencher: divan::Bencher, size: usize) {
    let (ks, slot) = loaded(KeySpec::EccPair);
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            ks.encrypt(&slot, AlgoSpec::Ecies, &[], divan::black_box(&data))
                .unwrap()
        });
}

fn main() {
    divan::main();
}
