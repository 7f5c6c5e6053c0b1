//! Session identifier generation.
//!
//! A session id is two base64url halves joined by a comma. The first 64
//! bytes of entropy form the sticky half, stable across every rotation of
//! one session chain and usable for auditing and bulk revocation. The
//! remaining 192 bytes form the rotating half, regenerated whenever the
//! session id is renewed, so a captured pre-rotation cookie stops matching
//! once the session rolls over.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

/// Total entropy per freshly minted session id.
const ENTROPY_BYTES: usize = 256;

/// Leading bytes that make up the sticky half.
const STICKY_BYTES: usize = 64;

/// Encoded length of the sticky half (64 bytes, base64url, no padding).
pub const STICKY_ID_LENGTH: usize = 86;

/// Wire length of a full session id: sticky + comma + rotating half.
pub const SESSION_ID_LENGTH: usize = 343;

/// Failure to produce a session identifier.
///
/// Randomness failure is fatal to the operation that needed the token:
/// issuing a session from anything weaker than the OS CSPRNG would defeat
/// the whole security model, so there is no fallback source.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("secure randomness unavailable: {0}")]
    Entropy(#[from] rand::Error),
}

/// Generate a fresh session id and its sticky half.
pub fn new_session_id() -> Result<(String, String), TokenError> {
    let mut raw = [0u8; ENTROPY_BYTES];
    OsRng.try_fill_bytes(&mut raw)?;
    let sticky = URL_SAFE_NO_PAD.encode(&raw[..STICKY_BYTES]);
    let id = format!("{},{}", sticky, URL_SAFE_NO_PAD.encode(&raw[STICKY_BYTES..]));
    Ok((id, sticky))
}

/// Generate a new session id for an existing sticky half.
///
/// Only the rotating half is redrawn; the sticky prefix is preserved
/// verbatim. The rotating half gets whatever entropy is left of the 256-byte
/// budget after accounting for the sticky bytes.
pub fn regenerate_id(sticky_id: &str) -> Result<String, TokenError> {
    let mut rotating = vec![0u8; ENTROPY_BYTES - decoded_len(sticky_id.len())];
    OsRng.try_fill_bytes(&mut rotating)?;
    Ok(format!("{},{}", sticky_id, URL_SAFE_NO_PAD.encode(&rotating)))
}

/// Decoded byte length of an unpadded base64 string.
const fn decoded_len(encoded: usize) -> usize {
    encoded * 3 / 4
}
