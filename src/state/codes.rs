//! Short human-typable codes drawn from `A-Z0-9`.

use std::fmt;

use rand::Rng;
use thiserror::Error;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of a partner pairing code.
pub const PAIR_CODE_LEN: usize = 4;
/// Length of a chat session identifier.
pub const SESSION_CODE_LEN: usize = 6;

/// Code handed to a partner to establish a relationship.
pub type PairCode = Code<PAIR_CODE_LEN>;
/// Identifier of a chat session, shared out of band to invite participants.
pub type SessionCode = Code<SESSION_CODE_LEN>;

/// Fixed-length upper-case alphanumeric code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Code<const LEN: usize>(String);

/// Rejection reason for user-supplied codes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    /// Wrong number of characters after trimming.
    #[error("code must be {expected} characters long")]
    Length { expected: usize },
    /// A character outside `A-Z0-9`.
    #[error("code may only contain letters A-Z and digits")]
    Alphabet,
}

impl<const LEN: usize> Code<LEN> {
    /// Draw a fresh random code.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let code = (0..LEN)
            .map(|_| char::from(ALPHABET[rng.random_range(0..ALPHABET.len())]))
            .collect();
        Self(code)
    }

    /// Normalise user input (trim, upper-case) and validate it.
    pub fn parse(input: &str) -> Result<Self, CodeError> {
        let normalised = input.trim().to_ascii_uppercase();
        if normalised.chars().count() != LEN {
            return Err(CodeError::Length { expected: LEN });
        }
        if !normalised.bytes().all(|byte| ALPHABET.contains(&byte)) {
            return Err(CodeError::Alphabet);
        }
        Ok(Self(normalised))
    }

    /// Borrow the normalised code.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwrap into the normalised string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl<const LEN: usize> fmt::Display for Code<LEN> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_use_the_alphabet() {
        for _ in 0..100 {
            let code = SessionCode::generate();
            assert_eq!(code.as_str().len(), SESSION_CODE_LEN);
            assert!(code.as_str().bytes().all(|b| ALPHABET.contains(&b)));
            assert_eq!(SessionCode::parse(code.as_str()), Ok(code));
        }
    }

    #[test]
    fn parse_normalises_input() {
        let code = PairCode::parse("  ab1z ").unwrap();
        assert_eq!(code.as_str(), "AB1Z");
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!(
            PairCode::parse("ABC"),
            Err(CodeError::Length {
                expected: PAIR_CODE_LEN
            })
        );
        assert_eq!(PairCode::parse("AB-1"), Err(CodeError::Alphabet));
        assert_eq!(PairCode::parse("ÄB12"), Err(CodeError::Alphabet));
        assert!(SessionCode::parse("ABCD").is_err());
    }
}
