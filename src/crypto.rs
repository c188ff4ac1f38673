//! Password hashing.

use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Argon2, Params, Version};
use rand::rngs::OsRng;

use crate::config::{Argon2 as ArgonConfig, HashAlgorithm, Password as PasswordConfig};

const BCRYPT_PREFIX: &str = "$2";
const ARGON2_PREFIX: &str = "$argon2";

type Result<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
    #[error(transparent)]
    Bcrypt(#[from] bcrypt::BcryptError),
}

/// One-way salted password hashing.
///
/// New hashes use the configured algorithm. Verification reads the
/// algorithm back from the hash prefix so stored bcrypt and argon2 hashes
/// keep working after a configuration change.
#[derive(Clone)]
pub struct PasswordManager {
    algorithm: HashAlgorithm,
    cost: u32,
    params: Params,
}

impl PasswordManager {
    /// Create a new [`PasswordManager`].
    pub fn new(config: &PasswordConfig) -> Result<Self> {
        let ArgonConfig {
            memory_cost,
            iterations,
            parallelism,
            hash_length,
        } = config.argon2.clone();
        let params = Params::new(memory_cost, iterations, parallelism, Some(hash_length))
            .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        Ok(Self {
            algorithm: config.algorithm,
            cost: config.cost,
            params,
        })
    }

    fn argon2(&self) -> Argon2<'_> {
        Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash `password` with a fresh random salt.
    pub fn hash(&self, password: impl AsRef<[u8]>) -> Result<String> {
        match self.algorithm {
            HashAlgorithm::Bcrypt => Ok(bcrypt::hash(password, self.cost)?),
            HashAlgorithm::Argon2 => {
                let salt = SaltString::generate(&mut OsRng);
                self.argon2()
                    .hash_password(password.as_ref(), &salt)
                    .map(|hash| hash.to_string())
                    .map_err(|err| CryptoError::Argon2(err.to_string()))
            },
        }
    }

    /// Compare `password` with `hash`.
    ///
    /// A mismatch or a malformed hash returns `false`.
    pub fn verify(&self, password: impl AsRef<[u8]>, hash: &str) -> bool {
        if hash.starts_with(ARGON2_PREFIX) {
            PasswordHash::new(hash)
                .map(|parsed| {
                    self.argon2()
                        .verify_password(password.as_ref(), &parsed)
                        .is_ok()
                })
                .unwrap_or(false)
        } else if hash.starts_with(BCRYPT_PREFIX) {
            bcrypt::verify(password, hash).unwrap_or(false)
        } else {
            false
        }
    }
}

impl std::fmt::Debug for PasswordManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordManager")
            .field("algorithm", &self.algorithm)
            .field("cost", &self.cost)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(algorithm: HashAlgorithm) -> PasswordManager {
        PasswordManager::new(&PasswordConfig {
            algorithm,
            cost: 4,
            argon2: ArgonConfig {
                memory_cost: 1024,
                iterations: 1,
                parallelism: 1,
                hash_length: 32,
            },
        })
        .unwrap()
    }

    #[test]
    fn test_bcrypt_round_trip() {
        let pwd = manager(HashAlgorithm::Bcrypt);
        let hash = pwd.hash("password123").unwrap();

        assert_ne!(hash, "password123");
        assert!(hash.starts_with(BCRYPT_PREFIX));
        assert!(pwd.verify("password123", &hash));
        assert!(!pwd.verify("password124", &hash));
    }

    #[test]
    fn test_salt_is_fresh() {
        let pwd = manager(HashAlgorithm::Bcrypt);
        assert_ne!(pwd.hash("password123").unwrap(), pwd.hash("password123").unwrap());
    }

    #[test]
    fn test_argon2_round_trip() {
        let pwd = manager(HashAlgorithm::Argon2);
        let hash = pwd.hash("StRong_PaÂ§$W0rD").unwrap();

        assert!(hash.starts_with(ARGON2_PREFIX));
        assert!(pwd.verify("StRong_PaÂ§$W0rD", &hash));
        assert!(!pwd.verify("strong_password", &hash));
    }

    #[test]
    fn test_verify_detects_algorithm() {
        let bcrypt = manager(HashAlgorithm::Bcrypt);
        let argon = manager(HashAlgorithm::Argon2);

        let hash = bcrypt.hash("password123").unwrap();
        assert!(argon.verify("password123", &hash));

        let hash = argon.hash("password123").unwrap();
        assert!(bcrypt.verify("password123", &hash));
    }

    #[test]
    fn test_malformed_hash_is_false() {
        let pwd = manager(HashAlgorithm::Bcrypt);
        assert!(!pwd.verify("password123", ""));
        assert!(!pwd.verify("password123", "password123"));
        assert!(!pwd.verify("password123", "$2b$10$short"));
        assert!(!pwd.verify("password123", "$argon2id$broken"));
    }
}
