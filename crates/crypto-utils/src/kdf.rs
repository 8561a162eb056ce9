use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::random::random_array;

/// Salt length in bytes for every stored secret.
pub const SALT_LEN: usize = 16;

/// Argon2id cost parameters.
///
/// These are persisted next to each ciphertext, so a secret sealed under one
/// set of parameters keeps opening after the defaults change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// 64 MiB, 3 passes, 4 lanes.
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Smallest parameters Argon2 accepts. Only meant for tests.
    pub const fn insecure_fast() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }

    pub fn validate(&self) -> Result<(), CryptoError> {
        self.to_argon2().map(|_| ())
    }

    fn to_argon2(self) -> Result<Params, CryptoError> {
        Params::new(self.memory_kib, self.iterations, self.parallelism, Some(32))
            .map_err(|e| CryptoError::InvalidParams(e.to_string()))
    }
}

/// Derives a 32-byte key from `password` and `salt` using Argon2id.
///
/// The key is wrapped in [`Zeroizing`] and wiped when it goes out of scope.
pub fn derive_key(
    password: &[u8],
    salt: &[u8; SALT_LEN],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);

    let mut output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password, salt, &mut output[..])
        .map_err(|e| CryptoError::KdfFailed(format!("argon2 hash failed: {e}")))?;

    Ok(output)
}

/// Generates a fresh random salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    random_array::<SALT_LEN>()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: KdfParams = KdfParams::insecure_fast();

    #[test]
    fn same_inputs_same_key() {
        let salt = [0xABu8; SALT_LEN];
        let key1 = derive_key(b"my-strong-password", &salt, &FAST).unwrap();
        let key2 = derive_key(b"my-strong-password", &salt, &FAST).unwrap();
        assert_eq!(*key1, *key2);
    }

    #[test]
    fn password_and_salt_both_matter() {
        let salt = [0x01u8; SALT_LEN];
        let base = derive_key(b"password-a", &salt, &FAST).unwrap();
        let other_password = derive_key(b"password-b", &salt, &FAST).unwrap();
        let other_salt = derive_key(b"password-a", &[0x02u8; SALT_LEN], &FAST).unwrap();

        assert_ne!(*base, *other_password);
        assert_ne!(*base, *other_salt);
    }

    #[test]
    fn params_change_the_key() {
        let salt = [0x07u8; SALT_LEN];
        let slow = KdfParams {
            iterations: 2,
            ..FAST
        };
        let a = derive_key(b"pw", &salt, &FAST).unwrap();
        let b = derive_key(b"pw", &salt, &slow).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn zero_iterations_rejected() {
        let params = KdfParams {
            iterations: 0,
            ..FAST
        };
        assert!(matches!(params.validate(), Err(CryptoError::InvalidParams(_))));
        assert!(derive_key(b"pw", &[0u8; SALT_LEN], &params).is_err());
    }

    #[test]
    fn default_params_are_valid() {
        KdfParams::default().validate().unwrap();
    }

    #[test]
    fn params_serialize_with_field_names() {
        let json = serde_json::to_string(&FAST).unwrap();
        assert!(json.contains("\"memory_kib\":8"));
        let back: KdfParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, FAST);
    }

    #[test]
    fn generated_salts_differ() {
        assert_ne!(generate_salt(), generate_salt());
    }
}
