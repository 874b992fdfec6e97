//! Short code generation
//!
//! Codes are drawn uniformly from a fixed alphabet. Uniqueness is not decided
//! here: every candidate is handed to a `claim` callback (normally an atomic
//! insert in storage) and a collision triggers a fresh draw, up to a fixed
//! number of attempts.

use rand::RngExt;
use std::future::Future;
use thiserror::Error;
use tracing::debug;

pub const BASE62_ALPHABET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

pub const ALIAS_MIN_LEN: usize = 3;
pub const ALIAS_MAX_LEN: usize = 32;

/// Path segments owned by the service itself
pub const RESERVED_ALIASES: &[&str] = &["api", "health"];

#[derive(Debug, Error)]
pub enum CodeGenError {
    #[error("could not allocate a unique short code after {attempts} attempts")]
    Exhausted { attempts: usize },
    #[error(transparent)]
    Claim(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct CodeGenerator {
    alphabet: Vec<char>,
    length: usize,
    max_attempts: usize,
}

impl CodeGenerator {
    /// Base62 generator
    pub fn new(length: usize, max_attempts: usize) -> Self {
        Self::with_alphabet(BASE62_ALPHABET, length, max_attempts)
    }

    pub fn with_alphabet(alphabet: &str, length: usize, max_attempts: usize) -> Self {
        let mut alphabet: Vec<char> = alphabet.chars().collect();
        alphabet.sort_unstable();
        alphabet.dedup();
        if alphabet.is_empty() {
            alphabet = BASE62_ALPHABET.chars().collect();
        }
        Self {
            alphabet,
            length: length.max(1),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Draw one random candidate
    pub fn candidate(&self) -> String {
        let mut rng = rand::rng();
        (0..self.length)
            .map(|_| self.alphabet[rng.random_range(0..self.alphabet.len())])
            .collect()
    }

    /// Draw candidates until `claim` accepts one.
    ///
    /// `claim` returns `Ok(Some(_))` when the code was taken for the caller and
    /// `Ok(None)` when it collided with an active record.
    pub async fn generate<T, F, Fut>(&self, mut claim: F) -> Result<T, CodeGenError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        for attempt in 1..=self.max_attempts {
            let code = self.candidate();
            match claim(code.clone()).await? {
                Some(claimed) => return Ok(claimed),
                None => debug!(%code, attempt, "short code collision, drawing again"),
            }
        }

        Err(CodeGenError::Exhausted {
            attempts: self.max_attempts,
        })
    }
}

/// Check a user-chosen alias against the alias rules
pub fn validate_alias(alias: &str) -> Result<(), String> {
    let len = alias.chars().count();
    if !(ALIAS_MIN_LEN..=ALIAS_MAX_LEN).contains(&len) {
        return Err(format!(
            "Custom alias must be {ALIAS_MIN_LEN}-{ALIAS_MAX_LEN} characters"
        ));
    }

    if !alias
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(
            "Custom alias may only contain letters, digits, '-' and '_'".to_string(),
        );
    }

    if RESERVED_ALIASES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(alias))
    {
        return Err(format!("Custom alias '{alias}' is reserved"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[test]
    fn test_candidate_shape() {
        let generator = CodeGenerator::new(6, 5);
        for _ in 0..100 {
            let code = generator.candidate();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[tokio::test]
    async fn test_generate_retries_on_collision() {
        let generator = CodeGenerator::with_alphabet("ab", 1, 50);
        let taken = Mutex::new(HashSet::from(["a".to_string()]));

        let code = generator
            .generate(|code| {
                let accepted = taken.lock().unwrap().insert(code.clone());
                async move { Ok(accepted.then_some(code)) }
            })
            .await
            .unwrap();

        assert_eq!(code, "b");
    }

    #[tokio::test]
    async fn test_generate_exhausts() {
        let generator = CodeGenerator::with_alphabet("a", 1, 5);
        let mut calls = 0;

        let result: Result<String, _> = generator
            .generate(|_| {
                calls += 1;
                async { Ok(None) }
            })
            .await;

        assert!(matches!(result, Err(CodeGenError::Exhausted { attempts: 5 })));
        assert_eq!(calls, 5);
    }

    #[tokio::test]
    async fn test_generate_propagates_claim_errors() {
        let generator = CodeGenerator::new(6, 5);
        let result: Result<String, _> = generator
            .generate(|_| async { Err(anyhow::anyhow!("disk on fire")) })
            .await;

        assert!(matches!(result, Err(CodeGenError::Claim(_))));
    }

    #[test]
    fn test_validate_alias() {
        assert!(validate_alias("my-link_1").is_ok());
        assert!(validate_alias("ab").is_err());
        assert!(validate_alias(&"x".repeat(33)).is_err());
        assert!(validate_alias("has space").is_err());
        assert!(validate_alias("slash/y").is_err());
        assert!(validate_alias("API").is_err());
        assert!(validate_alias("health").is_err());
    }
}
