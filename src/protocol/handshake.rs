//! RTMP handshake digests
//!
//! ```text
//! Client                                   Server
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes) -------------->|
//!   |<------ S0 S1 S2 ----------------------|
//!   |------- C2 (1536 bytes, unverified) -->|
//! ```
//!
//! Flash-family clients embed an HMAC-SHA256 digest inside C1 at an offset
//! derived from four header bytes. The server must locate and verify that
//! digest to pick the response scheme: when no digest verifies, the client is
//! using the plain pre-digest handshake and S1/S2 are a simple echo of C1;
//! otherwise S1 carries a fresh server digest at the same offset scheme and
//! S2 signs 1504 random bytes with a key derived from the client's digest.
//! Real clients verify these digests, so the key material and offset
//! arithmetic below must match byte-for-byte.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

const SHA256_DIGEST_LENGTH: usize = 32;

/// Tail bytes appended to the FMS key when signing S2.
const RANDOM_CRUD: [u8; 32] = [
    0xf0, 0xee, 0xc2, 0x4a, 0x80, 0x68, 0xbe, 0xe8, 0x2e, 0x00, 0xd0, 0xd1, 0x02, 0x9e, 0x7e,
    0x57, 0x6e, 0xec, 0x5d, 0x2d, 0x29, 0x80, 0x6f, 0xab, 0x93, 0xb8, 0xe6, 0x36, 0xcf, 0xeb,
    0x31, 0xae,
];

const GENUINE_FMS_CONST: &[u8] = b"Genuine Adobe Flash Media Server 001";
const GENUINE_FP_CONST: &[u8] = b"Genuine Adobe Flash Player 001";

/// Client digest placement scheme detected from C1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    /// No digest found: plain handshake, echo the client payload.
    Simple,
    /// Digest offset derived from bytes 8..12 (base 12).
    Format1,
    /// Digest offset derived from bytes 772..776 (base 776).
    Format2,
}

fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; SHA256_DIGEST_LENGTH] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// Digest offset for the client scheme: checksum of 4 bytes, mod 728, +12.
fn client_digest_offset(sig: &[u8]) -> usize {
    let sum = sig[8] as usize + sig[9] as usize + sig[10] as usize + sig[11] as usize;
    (sum % 728) + 12
}

/// Digest offset for the server scheme: checksum of 4 bytes, mod 728, +776.
fn server_digest_offset(sig: &[u8]) -> usize {
    let sum = sig[772] as usize + sig[773] as usize + sig[774] as usize + sig[775] as usize;
    (sum % 728) + 776
}

/// Verify an embedded digest: HMAC over the 1504 bytes around the 32-byte
/// digest window must equal the window contents.
fn digest_matches(sig: &[u8], offset: usize) -> bool {
    let computed = hmac_sha256(
        GENUINE_FP_CONST,
        &[&sig[..offset], &sig[offset + SHA256_DIGEST_LENGTH..]],
    );
    computed == sig[offset..offset + SHA256_DIGEST_LENGTH]
}

/// Detect which handshake scheme the client used, trying the server-offset
/// placement first, then the client-offset placement.
pub fn detect_client_message_format(clientsig: &[u8]) -> MessageFormat {
    if digest_matches(clientsig, server_digest_offset(clientsig)) {
        return MessageFormat::Format2;
    }
    if digest_matches(clientsig, client_digest_offset(clientsig)) {
        return MessageFormat::Format1;
    }
    MessageFormat::Simple
}

/// Build S1: version prefix, random fill, fresh FMS digest at the offset
/// selected by the detected scheme.
fn generate_s1(format: MessageFormat) -> [u8; HANDSHAKE_SIZE] {
    let mut sig = [0u8; HANDSHAKE_SIZE];
    sig[..8].copy_from_slice(&[0, 0, 0, 0, 1, 2, 3, 4]);
    rand::rng().fill_bytes(&mut sig[8..]);

    let offset = if format == MessageFormat::Format1 {
        client_digest_offset(&sig)
    } else {
        server_digest_offset(&sig)
    };

    let digest = hmac_sha256(
        GENUINE_FMS_CONST,
        &[&sig[..offset], &sig[offset + SHA256_DIGEST_LENGTH..]],
    );
    sig[offset..offset + SHA256_DIGEST_LENGTH].copy_from_slice(&digest);
    sig
}

/// Build S2: 1504 random bytes signed with a key derived from the client's
/// digest window.
fn generate_s2(format: MessageFormat, clientsig: &[u8]) -> [u8; HANDSHAKE_SIZE] {
    let offset = if format == MessageFormat::Format1 {
        client_digest_offset(clientsig)
    } else {
        server_digest_offset(clientsig)
    };
    let challenge = &clientsig[offset..offset + SHA256_DIGEST_LENGTH];

    let mut key = Vec::with_capacity(GENUINE_FMS_CONST.len() + RANDOM_CRUD.len());
    key.extend_from_slice(GENUINE_FMS_CONST);
    key.extend_from_slice(&RANDOM_CRUD);
    let signing_key = hmac_sha256(&key, &[challenge]);

    let mut sig = [0u8; HANDSHAKE_SIZE];
    rand::rng().fill_bytes(&mut sig[..HANDSHAKE_SIZE - SHA256_DIGEST_LENGTH]);
    let signature = hmac_sha256(&signing_key, &[&sig[..HANDSHAKE_SIZE - SHA256_DIGEST_LENGTH]]);
    sig[HANDSHAKE_SIZE - SHA256_DIGEST_LENGTH..].copy_from_slice(&signature);
    sig
}

/// Build the complete S0+S1+S2 response to a client's C1.
pub fn generate_s0s1s2(clientsig: &[u8]) -> Vec<u8> {
    let mut response = Vec::with_capacity(1 + HANDSHAKE_SIZE * 2);
    response.push(RTMP_VERSION);
    match detect_client_message_format(clientsig) {
        MessageFormat::Simple => {
            // No digest: echo the client payload for both S1 and S2
            response.extend_from_slice(clientsig);
            response.extend_from_slice(clientsig);
        }
        format => {
            response.extend_from_slice(&generate_s1(format));
            response.extend_from_slice(&generate_s2(format, clientsig));
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Construct a C1 with a valid client-scheme digest, as Flash-family
    /// encoders send.
    fn digested_c1() -> [u8; HANDSHAKE_SIZE] {
        let mut sig = [0u8; HANDSHAKE_SIZE];
        for (i, b) in sig.iter_mut().enumerate() {
            *b = (i * 7 + 3) as u8;
        }
        let offset = client_digest_offset(&sig);
        let digest = hmac_sha256(
            GENUINE_FP_CONST,
            &[&sig[..offset], &sig[offset + SHA256_DIGEST_LENGTH..]],
        );
        sig[offset..offset + SHA256_DIGEST_LENGTH].copy_from_slice(&digest);
        sig
    }

    #[test]
    fn test_simple_handshake_echoes_client() {
        let mut clientsig = [0u8; HANDSHAKE_SIZE];
        for (i, b) in clientsig.iter_mut().enumerate() {
            *b = i as u8;
        }
        // Plain random-ish payload carries no digest
        assert_eq!(
            detect_client_message_format(&clientsig),
            MessageFormat::Simple
        );

        let response = generate_s0s1s2(&clientsig);
        assert_eq!(response.len(), 1 + HANDSHAKE_SIZE * 2);
        assert_eq!(response[0], RTMP_VERSION);
        assert_eq!(&response[1..1 + HANDSHAKE_SIZE], &clientsig[..]);
        assert_eq!(&response[1 + HANDSHAKE_SIZE..], &clientsig[..]);
    }

    #[test]
    fn test_detect_client_digest_format() {
        let c1 = digested_c1();
        assert_eq!(detect_client_message_format(&c1), MessageFormat::Format1);
    }

    #[test]
    fn test_complex_s1_carries_verifiable_digest() {
        let s1 = generate_s1(MessageFormat::Format1);
        let offset = client_digest_offset(&s1);
        let expected = hmac_sha256(
            GENUINE_FMS_CONST,
            &[&s1[..offset], &s1[offset + SHA256_DIGEST_LENGTH..]],
        );
        assert_eq!(&s1[offset..offset + SHA256_DIGEST_LENGTH], &expected[..]);
        assert_eq!(&s1[..8], &[0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_complex_s2_signature_verifies() {
        let c1 = digested_c1();
        let s2 = generate_s2(MessageFormat::Format1, &c1);

        let offset = client_digest_offset(&c1);
        let mut key = Vec::new();
        key.extend_from_slice(GENUINE_FMS_CONST);
        key.extend_from_slice(&RANDOM_CRUD);
        let signing_key = hmac_sha256(&key, &[&c1[offset..offset + SHA256_DIGEST_LENGTH]]);
        let expected = hmac_sha256(
            &signing_key,
            &[&s2[..HANDSHAKE_SIZE - SHA256_DIGEST_LENGTH]],
        );
        assert_eq!(&s2[HANDSHAKE_SIZE - SHA256_DIGEST_LENGTH..], &expected[..]);
    }

    #[test]
    fn test_complex_response_is_not_an_echo() {
        let c1 = digested_c1();
        let response = generate_s0s1s2(&c1);
        assert_eq!(response.len(), 1 + HANDSHAKE_SIZE * 2);
        assert_ne!(&response[1..1 + HANDSHAKE_SIZE], &c1[..]);
    }

    #[test]
    fn test_digest_offsets_in_window() {
        // Whatever the checksum, the digest window must stay inside the
        // 1536-byte payload for both schemes.
        let max_client = 727 + 12 + SHA256_DIGEST_LENGTH;
        let max_server = 727 + 776 + SHA256_DIGEST_LENGTH;
        assert!(max_client <= HANDSHAKE_SIZE);
        assert!(max_server <= HANDSHAKE_SIZE);
    }
}
