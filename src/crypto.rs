//! Keccak-256 hashing and secp256k1 identity primitives.
//!
//! Every discovery packet binds a public key to its contents with a
//! recoverable signature; node identities are the Keccak-256 of the compact
//! (uncompressed minus prefix) public key encoding.

use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};

use crate::error::CryptoError;

/// Length of a recoverable signature: r ‖ s ‖ v.
pub const SIGNATURE_LENGTH: usize = 65;
/// Length of a compact public key: X ‖ Y, no SEC1 prefix byte.
pub const PUBLIC_KEY_LENGTH: usize = 64;

/// Keccak-256 (the original padding variant used by Ethereum, not SHA3-256).
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

/// Signs a 32-byte digest, producing a recoverable r ‖ s ‖ v signature with
/// v ∈ {0, 1}.
pub fn sign(key: &SigningKey, digest: &[u8; 32]) -> Result<[u8; SIGNATURE_LENGTH], CryptoError> {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(digest)
        .map_err(|_| CryptoError::SigningFailed)?;
    let mut out = [0u8; SIGNATURE_LENGTH];
    out[..64].copy_from_slice(&signature.to_bytes());
    out[64] = recovery_id.to_byte();
    Ok(out)
}

/// Recovers the public key that produced `sig` over `digest`.
pub fn recover(
    sig: &[u8; SIGNATURE_LENGTH],
    digest: &[u8; 32],
) -> Result<VerifyingKey, CryptoError> {
    let recovery_id =
        RecoveryId::try_from(sig[64]).map_err(|_| CryptoError::InvalidSignature)?;
    let signature =
        Signature::from_slice(&sig[..64]).map_err(|_| CryptoError::InvalidSignature)?;
    VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Verifies a 64-byte r ‖ s signature over a digest. Used for node records,
/// which carry non-recoverable signatures.
pub fn verify(key: &VerifyingKey, sig: &[u8], digest: &[u8; 32]) -> Result<(), CryptoError> {
    let signature = Signature::from_slice(sig).map_err(|_| CryptoError::InvalidSignature)?;
    key.verify_prehash(digest, &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Encodes a public key as 64 bytes: big-endian X ‖ Y without the 0x04
/// uncompressed-point prefix.
pub fn compact_public_key(key: &VerifyingKey) -> [u8; PUBLIC_KEY_LENGTH] {
    let point = key.to_encoded_point(false);
    let mut out = [0u8; PUBLIC_KEY_LENGTH];
    out.copy_from_slice(&point.as_bytes()[1..]);
    out
}

/// Decodes a 64-byte compact public key.
pub fn public_key_from_compact(bytes: &[u8]) -> Result<VerifyingKey, CryptoError> {
    if bytes.len() != PUBLIC_KEY_LENGTH {
        return Err(CryptoError::InvalidPublicKey);
    }
    let mut sec1 = [0u8; PUBLIC_KEY_LENGTH + 1];
    sec1[0] = 0x04;
    sec1[1..].copy_from_slice(bytes);
    VerifyingKey::from_sec1_bytes(&sec1).map_err(|_| CryptoError::InvalidPublicKey)
}

/// Encodes a public key in 33-byte SEC1 compressed form, as node records
/// carry it.
pub fn compressed_public_key(key: &VerifyingKey) -> [u8; 33] {
    let point = key.to_encoded_point(true);
    let mut out = [0u8; 33];
    out.copy_from_slice(point.as_bytes());
    out
}

/// Decodes a 33-byte SEC1 compressed public key.
pub fn public_key_from_compressed(bytes: &[u8]) -> Result<VerifyingKey, CryptoError> {
    if bytes.len() != 33 {
        return Err(CryptoError::InvalidPublicKey);
    }
    VerifyingKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidPublicKey)
}
