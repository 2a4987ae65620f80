//! Challenge/response authentication (spec §4.4).
//!
//! The server issues a random 32-byte nonce at session start and sends
//! it base64-encoded in `HELLO_ACK`; the client replies with its own
//! nonce and a MAC over
//! `serverNonce || clientNonce || UTF-8(serverDeviceId) || UTF-8(clientDeviceId)`
//! (raw nonce bytes, no length prefixes) keyed by the shared PSK. The
//! same computation, run on both ends, either matches (session proceeds
//! to `READY`) or doesn't (`AUTH_FAILED`). Constant-time comparison
//! follows the same `hmac`/`sha2`/`subtle` idiom the wider example pack
//! uses for verifying inbound HMAC signatures (Slack request signing);
//! nonces and MACs are base64 on the wire per spec §4.2.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{NetShareError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const NONCE_LEN: usize = 32;

/// Generate a fresh random nonce (raw bytes; callers base64-encode for
/// the wire via [`encode_nonce`]).
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

pub fn encode_nonce(nonce: &[u8]) -> String {
    BASE64.encode(nonce)
}

pub fn decode_nonce(encoded: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(encoded)
        .map_err(|e| NetShareError::BadRequest(format!("invalid nonce encoding: {e}")))
}

fn mac_input(server_nonce: &[u8], client_nonce: &[u8], server_device_id: &str, client_device_id: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        server_nonce.len() + client_nonce.len() + server_device_id.len() + client_device_id.len(),
    );
    buf.extend_from_slice(server_nonce);
    buf.extend_from_slice(client_nonce);
    buf.extend_from_slice(server_device_id.as_bytes());
    buf.extend_from_slice(client_device_id.as_bytes());
    buf
}

/// Compute the base64-encoded MAC a correctly-configured peer would send.
pub fn compute_mac(
    psk: &[u8],
    server_nonce: &[u8],
    client_nonce: &[u8],
    server_device_id: &str,
    client_device_id: &str,
) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(psk)
        .map_err(|e| NetShareError::Internal(format!("invalid psk length: {e}")))?;
    mac.update(&mac_input(server_nonce, client_nonce, server_device_id, client_device_id));
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Verify a peer-supplied base64 MAC in constant time. Returns `Ok(())`
/// on match, `Err(NetShareError::AuthFailed)` otherwise (including
/// malformed base64, treated as a mismatch rather than a protocol error
/// so a probing client can't distinguish the two).
pub fn verify_mac(
    psk: &[u8],
    server_nonce: &[u8],
    client_nonce: &[u8],
    server_device_id: &str,
    client_device_id: &str,
    provided_mac_b64: &str,
) -> Result<()> {
    let expected = compute_mac(psk, server_nonce, client_nonce, server_device_id, client_device_id)?;

    let matches = expected.as_bytes().ct_eq(provided_mac_b64.as_bytes()).unwrap_u8() == 1;
    if matches {
        Ok(())
    } else {
        Err(NetShareError::AuthFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_mac_verifies() {
        let psk = b"shared-secret";
        let sn = generate_nonce();
        let cn = generate_nonce();
        let mac = compute_mac(psk, &sn, &cn, "server-id", "client-id").unwrap();
        assert!(verify_mac(psk, &sn, &cn, "server-id", "client-id", &mac).is_ok());
    }

    #[test]
    fn wrong_psk_fails() {
        let sn = generate_nonce();
        let cn = generate_nonce();
        let mac = compute_mac(b"secret-a", &sn, &cn, "server-id", "client-id").unwrap();
        let err = verify_mac(b"secret-b", &sn, &cn, "server-id", "client-id", &mac).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::AuthFailed);
    }

    #[test]
    fn tampered_nonce_fails() {
        let psk = b"shared-secret";
        let sn = generate_nonce();
        let cn = generate_nonce();
        let mac = compute_mac(psk, &sn, &cn, "server-id", "client-id").unwrap();
        let mut other_sn = sn;
        other_sn[0] ^= 0xFF;
        let err = verify_mac(psk, &other_sn, &cn, "server-id", "client-id", &mac).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::AuthFailed);
    }

    #[test]
    fn swapping_device_ids_changes_mac() {
        let psk = b"shared-secret";
        let sn = generate_nonce();
        let cn = generate_nonce();
        let a = compute_mac(psk, &sn, &cn, "S", "C").unwrap();
        let b = compute_mac(psk, &sn, &cn, "C", "S").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn nonces_are_random_and_right_length_and_round_trip() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_ne!(a, b);
        assert_eq!(a.len(), NONCE_LEN);
        let encoded = encode_nonce(&a);
        let decoded = decode_nonce(&encoded).unwrap();
        assert_eq!(decoded, a.to_vec());
    }
}
