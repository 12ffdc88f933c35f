//! Random registration and verification code generation

use std::collections::HashSet;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::Error;

/// Verification codes are rendered with exactly this many digits
pub const VERIFICATION_CODE_DIGITS: usize = 8;

/// Exclusive upper bound of the verification code space
pub const VERIFICATION_CODE_SPACE: u32 = 100_000_000;

/// Random draws allowed per requested registration code
const DRAWS_PER_CODE: usize = 8;

/// Source of fresh codes
pub trait CodeGenerator: Send + Sync {
    /// Generate up to `count` distinct registration codes of `length`
    /// characters. Fewer come back when the code space is too small.
    fn registration_codes(&self, count: usize, length: usize) -> Vec<String>;

    /// Generate a verification code in `[1, VERIFICATION_CODE_SPACE)`
    fn verification_code(&self) -> u32;
}

/// Generator backed by the thread-local RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodeGenerator;

impl RandomCodeGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl CodeGenerator for RandomCodeGenerator {
    fn registration_codes(&self, count: usize, length: usize) -> Vec<String> {
        if length == 0 {
            return Vec::new();
        }

        let mut rng = rand::thread_rng();
        let mut seen = HashSet::with_capacity(count);
        let mut codes = Vec::with_capacity(count);

        let max_draws = count.saturating_mul(DRAWS_PER_CODE);
        for _ in 0..max_draws {
            if codes.len() == count {
                break;
            }
            let code: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(length)
                .map(char::from)
                .collect();
            if seen.insert(code.clone()) {
                codes.push(code);
            }
        }

        if codes.len() < count {
            tracing::warn!(requested = count, generated = codes.len(), length, "Registration code space exhausted");
        }
        codes
    }

    fn verification_code(&self) -> u32 {
        rand::thread_rng().gen_range(1..VERIFICATION_CODE_SPACE)
    }
}

/// Render a verification code as its document key
pub fn format_verification_code(code: u32) -> String {
    format!("{:0width$}", code, width = VERIFICATION_CODE_DIGITS)
}

/// Parse user input into a canonical verification code key.
///
/// Rejects anything that is not 1 to 8 ASCII digits or that evaluates to zero.
pub fn parse_verification_code(input: &str) -> Result<String, Error> {
    let trimmed = input.trim();
    if trimmed.is_empty()
        || trimmed.len() > VERIFICATION_CODE_DIGITS
        || !trimmed.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(Error::VerificationFormat);
    }

    let value: u32 = trimmed.parse().map_err(|_| Error::VerificationFormat)?;
    if value == 0 {
        return Err(Error::VerificationFormat);
    }

    Ok(format_verification_code(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_codes_unique_and_sized() {
        let codes = RandomCodeGenerator::new().registration_codes(500, 6);
        assert_eq!(codes.len(), 500);

        let distinct: HashSet<_> = codes.iter().collect();
        assert_eq!(distinct.len(), 500);

        for code in &codes {
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_registration_codes_stop_when_space_is_exhausted() {
        // Only 62 single-character codes exist
        let codes = RandomCodeGenerator::new().registration_codes(100, 1);
        assert!(!codes.is_empty());
        assert!(codes.len() <= 62);

        let distinct: HashSet<_> = codes.iter().collect();
        assert_eq!(distinct.len(), codes.len());
        assert!(codes.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn test_verification_code_range() {
        let gen = RandomCodeGenerator::new();
        for _ in 0..1000 {
            let code = gen.verification_code();
            assert!(code >= 1 && code < VERIFICATION_CODE_SPACE);
            assert_eq!(format_verification_code(code).len(), 8);
        }
    }

    #[test]
    fn test_parse_verification_code() {
        assert_eq!(parse_verification_code("00001234").unwrap(), "00001234");
        assert_eq!(parse_verification_code(" 1234 ").unwrap(), "00001234");
        assert!(parse_verification_code("0").is_err());
        assert!(parse_verification_code("00000000").is_err());
        assert!(parse_verification_code("-5").is_err());
        assert!(parse_verification_code("12ab").is_err());
        assert!(parse_verification_code("123456789").is_err());
        assert!(parse_verification_code("").is_err());
    }
}
