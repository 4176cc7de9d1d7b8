//! Signature verification for transactions and the shared [`VerifyError`]
//! used by block verification.

use thiserror::Error;

use super::types::Transaction;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Why a signed object failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// Signature or signer key missing.
    #[error("object is unsigned")]
    Unsigned,

    /// The Ed25519 signature does not verify against the attached key.
    #[error("invalid signature")]
    SignatureInvalid,

    /// A transaction inside a block failed.
    #[error("transaction {index} invalid: {source}")]
    Transaction {
        index: usize,
        #[source]
        source: Box<VerifyError>,
    },
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

impl Transaction {
    /// Check that the transaction carries a valid signature over its data.
    pub fn verify(&self) -> Result<(), VerifyError> {
        let (Some(from), Some(signature)) = (&self.from, &self.signature) else {
            return Err(VerifyError::Unsigned);
        };
        if !from.verify(&self.data, signature) {
            return Err(VerifyError::SignatureInvalid);
        }
        Ok(())
    }
}
