use rand::RngCore;
use rand_core::OsRng;

/// Fills a fixed-size array from the OS CSPRNG.
pub fn random_array<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// Random lowercase hex identifier backed by `N` bytes of entropy.
pub fn random_hex_id<const N: usize>() -> String {
    hex::encode(random_array::<N>())
}
