//! Ed25519 signing and verification.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use orv_types::{PrivateKey, PublicKey, Signature};

pub fn sign_message(message: &[u8], private_key: &PrivateKey) -> Signature {
    let signing_key = SigningKey::from_bytes(&private_key.0);
    Signature(signing_key.sign(message).to_bytes())
}

/// `false` for a malformed public key as well as for a bad signature.
pub fn verify_signature(message: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key.0) else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(&signature.0);
    verifying_key.verify(message, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::keypair_from_seed;

    #[test]
    fn signature_verifies_for_signer_only() {
        let signer = keypair_from_seed(&[1u8; 32]);
        let other = keypair_from_seed(&[2u8; 32]);
        let signature = sign_message(b"confirm", &signer.private);
        assert!(verify_signature(b"confirm", &signature, &signer.public));
        assert!(!verify_signature(b"confirm", &signature, &other.public));
        assert!(!verify_signature(b"reject", &signature, &signer.public));
    }

    #[test]
    fn signing_is_deterministic() {
        let keys = keypair_from_seed(&[3u8; 32]);
        assert_eq!(sign_message(b"x", &keys.private), sign_message(b"x", &keys.private));
    }
}
