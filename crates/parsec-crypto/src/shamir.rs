//! Shamir secret splitting over GF(256).
//!
//! A recovery setup splits the reveal-token secret into `n` weighted shares
//! with a reconstruction threshold `k`. Each byte of the secret is the
//! constant term of a random degree `k-1` polynomial; share `x` holds the
//! polynomial evaluated at `x`. Recovery is Lagrange interpolation at zero.
//!
//! The field is GF(2^8) with the AES reduction polynomial (0x11b).

use rand::RngCore;

use crate::{CryptoError, Result};

/// One share of a split secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShamirShare {
    /// Evaluation point, in `1..=255`. Never zero (zero is the secret).
    pub x: u8,
    /// One evaluation byte per secret byte.
    pub data: Vec<u8>,
}

fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut out = 0u8;
    while b != 0 {
        if b & 1 != 0 {
            out ^= a;
        }
        let carry = a & 0x80;
        a <<= 1;
        if carry != 0 {
            a ^= 0x1b;
        }
        b >>= 1;
    }
    out
}

fn gf_pow(mut base: u8, mut exp: u8) -> u8 {
    let mut out = 1u8;
    while exp != 0 {
        if exp & 1 != 0 {
            out = gf_mul(out, base);
        }
        base = gf_mul(base, base);
        exp >>= 1;
    }
    out
}

fn gf_inv(a: u8) -> u8 {
    // a^254 == a^-1 in GF(2^8)
    gf_pow(a, 254)
}

/// Split `secret` into `shares` shares requiring `threshold` of them to
/// recover.
pub fn split(secret: &[u8], threshold: u8, shares: u8) -> Result<Vec<ShamirShare>> {
    if threshold == 0 || shares == 0 {
        return Err(CryptoError::InvalidInput(
            "threshold and share count must be non-zero".to_string(),
        ));
    }
    if threshold > shares {
        return Err(CryptoError::InvalidInput(format!(
            "threshold {threshold} exceeds share count {shares}"
        )));
    }

    // One random polynomial per secret byte; coefficients[0] is the secret.
    let mut coefficients = vec![vec![0u8; threshold as usize]; secret.len()];
    for (byte_index, polynomial) in coefficients.iter_mut().enumerate() {
        polynomial[0] = secret[byte_index];
        if threshold > 1 {
            rand::rngs::OsRng.fill_bytes(&mut polynomial[1..]);
        }
    }

    let mut out = Vec::with_capacity(shares as usize);
    for x in 1..=shares {
        let mut data = Vec::with_capacity(secret.len());
        for polynomial in &coefficients {
            // Horner evaluation at x
            let mut y = 0u8;
            for &coefficient in polynomial.iter().rev() {
                y = gf_mul(y, x) ^ coefficient;
            }
            data.push(y);
        }
        out.push(ShamirShare { x, data });
    }
    Ok(out)
}

/// Recover the secret from any quorum of shares.
///
/// The caller is responsible for providing at least `threshold` distinct
/// shares; with fewer the output is garbage (by design of the scheme), with
/// duplicated evaluation points recovery is rejected.
pub fn recover(shares: &[ShamirShare]) -> Result<Vec<u8>> {
    let Some(first) = shares.first() else {
        return Err(CryptoError::ShamirRecovery("no share provided".to_string()));
    };
    let secret_len = first.data.len();
    for share in shares {
        if share.data.len() != secret_len {
            return Err(CryptoError::ShamirRecovery(
                "shares have inconsistent lengths".to_string(),
            ));
        }
        if share.x == 0 {
            return Err(CryptoError::ShamirRecovery(
                "share evaluation point cannot be zero".to_string(),
            ));
        }
    }
    let mut seen = [false; 256];
    for share in shares {
        if seen[share.x as usize] {
            return Err(CryptoError::ShamirRecovery(format!(
                "duplicated share point {}",
                share.x
            )));
        }
        seen[share.x as usize] = true;
    }

    let mut secret = vec![0u8; secret_len];
    for (i, share_i) in shares.iter().enumerate() {
        // Lagrange basis polynomial evaluated at zero
        let mut basis = 1u8;
        for (j, share_j) in shares.iter().enumerate() {
            if i == j {
                continue;
            }
            let numerator = share_j.x;
            let denominator = share_i.x ^ share_j.x;
            basis = gf_mul(basis, gf_mul(numerator, gf_inv(denominator)));
        }
        for (byte_index, &y) in share_i.data.iter().enumerate() {
            secret[byte_index] ^= gf_mul(y, basis);
        }
    }
    Ok(secret)
}
