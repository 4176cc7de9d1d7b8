//! Transaction signing with Ed25519 keypairs.
//!
//! The signed message is the raw `data` payload. The nonce is covered by
//! the transaction hash but not by the signature.

use super::types::Transaction;
use crate::crypto::Keypair;

impl Transaction {
    /// Sign in place, recording the signer's public key next to the
    /// signature. Re-signing overwrites both.
    pub fn sign(&mut self, keypair: &Keypair) {
        self.signature = Some(keypair.sign(&self.data));
        self.from = Some(keypair.public_key());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_sets_key_and_signature() {
        let kp = Keypair::generate();
        let mut tx = Transaction::new(b"push".to_vec());
        assert!(!tx.is_signed());
        tx.sign(&kp);
        assert!(tx.is_signed());
        assert_eq!(tx.from, Some(kp.public_key()));
    }

    #[test]
    fn signing_does_not_change_hash() {
        let kp = Keypair::generate();
        let mut tx = Transaction::new(b"push".to_vec());
        let before = tx.hash();
        tx.sign(&kp);
        assert_eq!(tx.hash(), before, "signing must not change the hash");
    }

    #[test]
    fn re_signing_overwrites_previous_signature() {
        let kp1 = Keypair::generate();
        let kp2 = Keypair::generate();
        let mut tx = Transaction::with_nonce(b"payload".to_vec(), 7);

        tx.sign(&kp1);
        let sig1 = tx.signature.clone();
        tx.sign(&kp2);

        assert_ne!(sig1, tx.signature);
        assert_eq!(tx.from, Some(kp2.public_key()));
    }
}
