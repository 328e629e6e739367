//! Berger code integrity checks
//!
//! NVM3 protects its page and object headers with a Berger code: the number
//! of unset bits in the protected field. Interrupted flash writes can only
//! clear bits, so any such corruption lowers the popcount and changes the code.

use crate::error::{NvmError, Result};

/// Counts the unset bits in the lowest `num_bits` bits of `word`
pub fn compute_berger_code(word: u32, num_bits: u32) -> u32 {
    let masked = if num_bits < 32 {
        word & ((1u32 << num_bits) - 1)
    } else {
        word
    };
    num_bits - masked.count_ones()
}

pub fn validate_berger_code(word: u32, code: u32, num_bits: u32) -> Result<()> {
    let actual = compute_berger_code(word, num_bits);
    if actual != code {
        return Err(NvmError::InvalidFormat(format!(
            "Berger code validation failed (expected {}, got {})",
            code, actual
        )));
    }
    Ok(())
}

/// Berger code over a field spanning several words
///
/// The first `num_bits` bits are protected; whole words are consumed first,
/// the last word contributes only its low bits.
pub fn compute_berger_code_multi(words: &[u32], num_bits: u32) -> u32 {
    let mut remaining = num_bits;
    let mut result = 0;
    for &word in words {
        if remaining == 0 {
            break;
        }
        if remaining < 32 {
            result += compute_berger_code(word, remaining);
            break;
        }
        result += compute_berger_code(word, 32);
        remaining -= 32;
    }
    result
}

/// Validates a multi-word field whose code is stored in the bits above
/// `num_bits` of the last word
pub fn validate_berger_code_multi(words: &[u32], num_bits: u32) -> Result<()> {
    let mut remaining = num_bits;
    let mut actual = 0;
    let mut expected = None;
    for &word in words {
        if remaining < 32 {
            expected = Some(word >> remaining);
            actual += compute_berger_code(word, remaining);
            break;
        }
        actual += compute_berger_code(word, 32);
        remaining -= 32;
    }

    match expected {
        Some(code) if code == actual => Ok(()),
        Some(code) => Err(NvmError::InvalidFormat(format!(
            "Berger code validation failed (expected {}, got {})",
            code, actual
        ))),
        None => Err(NvmError::InvalidFormat(
            "Berger code field is missing its code bits".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_unset_bits() {
        assert_eq!(compute_berger_code(0, 27), 27);
        assert_eq!(compute_berger_code(0xffff_ffff, 27), 0);
        assert_eq!(compute_berger_code(0b1011, 4), 1);
        // Bits above the field are ignored
        assert_eq!(compute_berger_code(0xf000_0000, 27), 27);
    }

    #[test]
    fn test_validate_rejects_cleared_bit() {
        let word = 0x0123_4567 & 0x07ff_ffff;
        let code = compute_berger_code(word, 27);
        assert!(validate_berger_code(word, code, 27).is_ok());
        assert!(validate_berger_code(word & !0x4, code, 27).is_err());
    }

    #[test]
    fn test_multi_word_roundtrip() {
        let hdr1 = 0x1234_5680u32;
        let hdr2 = 500u32;
        let code = compute_berger_code_multi(&[hdr1, hdr2], 58);
        let hdr2 = hdr2 | (code << 26);
        assert!(validate_berger_code_multi(&[hdr1, hdr2], 58).is_ok());
        assert!(validate_berger_code_multi(&[hdr1 ^ 0x100, hdr2], 58).is_err());
        assert!(validate_berger_code_multi(&[hdr1, hdr2 ^ (1 << 27)], 58).is_err());
    }
}
