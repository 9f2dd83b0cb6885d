use dropseal_crypto::chunk::{decrypt_chunk, encrypt_chunk};
use dropseal_crypto::kdf::MIN_ITERATIONS;
use dropseal_crypto::{
    decrypt_chunked, derive_content_keys, encrypt_chunked, BaseNonce, Dek, Salt, SystemProvider,
};
use secrecy::SecretString;

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt_chunk(bencher: divan::Bencher, size: usize) {
    let dek = Dek::generate(&SystemProvider).unwrap();
    let nonce = BaseNonce::generate(&SystemProvider).unwrap();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            encrypt_chunk(
                &SystemProvider,
                divan::black_box(&dek),
                divan::black_box(&nonce),
                0,
                divan::black_box(&data),
            )
            .unwrap()
        });
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_decrypt_chunk(bencher: divan::Bencher, size: usize) {
    let dek = Dek::generate(&SystemProvider).unwrap();
    let nonce = BaseNonce::generate(&SystemProvider).unwrap();
    let data = make_data(size);
    let encrypted = encrypt_chunk(&SystemProvider, &dek, &nonce, 0, &data).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            decrypt_chunk(
                &SystemProvider,
                divan::black_box(&dek),
                divan::black_box(&nonce),
                0,
                divan::black_box(&encrypted),
            )
            .unwrap()
        });
}

#[divan::bench(args = [4 * 1048576, 16 * 1048576])]
fn bench_file_roundtrip(bencher: divan::Bencher, size: usize) {
    let dek = Dek::generate(&SystemProvider).unwrap();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let blob = encrypt_chunked(&SystemProvider, &dek, divan::black_box(&data), 1048576, None)
                .unwrap();
            decrypt_chunked(
                &SystemProvider,
                &dek,
                &blob.ciphertext,
                &blob.base_nonce,
                blob.chunk_size,
                blob.original_size,
                None,
            )
            .unwrap()
        });
}

#[divan::bench(sample_count = 10)]
fn bench_derive_content_keys() -> dropseal_crypto::ContentKeys {
    let passphrase = SecretString::from("correct horse battery staple".to_string());
    let salt = Salt::from_bytes([0x5A; 16]);
    derive_content_keys(
        &SystemProvider,
        divan::black_box(&passphrase),
        &salt,
        MIN_ITERATIONS,
    )
    .unwrap()
}

fn main() {
    divan::main();
}
