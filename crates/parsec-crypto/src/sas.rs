//! Short Authentication String derivation.
//!
//! During the greeting handshake both humans compare a short code derived
//! from the two conduit nonces. Each side reads its own 20-bit half of the
//! combined digest, rendered as four symbols of a 32-symbol alphabet chosen
//! to avoid ambiguous glyphs.

use crate::hash::HashDigest;

/// Alphabet used to render SAS codes (no 0/O, 1/I ambiguity).
pub const SAS_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of symbols per SAS code.
pub const SAS_CODE_LEN: usize = 4;

/// A rendered SAS code pair: what the claimer reads and what the greeter
/// reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SasCodes {
    pub claimer: String,
    pub greeter: String,
}

fn render(bits: u32) -> String {
    (0..SAS_CODE_LEN)
        .map(|i| {
            let index = ((bits >> (5 * i)) & 0x1f) as usize;
            SAS_ALPHABET[index] as char
        })
        .collect()
}

/// Derive the SAS code pair from the claimer and greeter nonces.
pub fn derive_sas_codes(claimer_nonce: &[u8], greeter_nonce: &[u8]) -> SasCodes {
    let mut combined = Vec::with_capacity(claimer_nonce.len() + greeter_nonce.len());
    combined.extend_from_slice(claimer_nonce);
    combined.extend_from_slice(greeter_nonce);
    let digest = HashDigest::from_data(&combined);
    let bytes = digest.as_bytes();

    let claimer_bits = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]) & 0xfffff;
    let greeter_bits = u32::from_le_bytes([bytes[3], bytes[4], bytes[5], 0]) & 0xfffff;
    SasCodes {
        claimer: render(claimer_bits),
        greeter: render(greeter_bits),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_deterministic() {
        let a = derive_sas_codes(b"claimer nonce", b"greeter nonce");
        let b = derive_sas_codes(b"claimer nonce", b"greeter nonce");
        assert_eq!(a, b);
    }

    #[test]
    fn test_codes_depend_on_both_nonces() {
        let base = derive_sas_codes(b"n1", b"n2");
        assert_ne!(base, derive_sas_codes(b"n1", b"other"));
        assert_ne!(base, derive_sas_codes(b"other", b"n2"));
    }

    #[test]
    fn test_code_shape() {
        let codes = derive_sas_codes(b"x", b"y");
        assert_eq!(codes.claimer.len(), SAS_CODE_LEN);
        assert!(codes
            .claimer
            .bytes()
            .all(|c| SAS_ALPHABET.contains(&c)));
    }
}
