//! Deterministic Ed25519 key derivation for representatives.

use ed25519_dalek::SigningKey;
use orv_types::{KeyPair, PrivateKey, PublicKey};

/// Derive a key pair whose secret key is exactly `seed`.
pub fn keypair_from_seed(seed: &[u8; 32]) -> KeyPair {
    let signing_key = SigningKey::from_bytes(seed);
    KeyPair {
        public: PublicKey(signing_key.verifying_key().to_bytes()),
        private: PrivateKey(*seed),
    }
}

pub fn public_from_private(private: &PrivateKey) -> PublicKey {
    let signing_key = SigningKey::from_bytes(&private.0);
    PublicKey(signing_key.verifying_key().to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_account() {
        let a = keypair_from_seed(&[7u8; 32]);
        let b = keypair_from_seed(&[7u8; 32]);
        assert_eq!(a.account(), b.account());
        assert_eq!(public_from_private(&a.private), a.public);
    }
}
