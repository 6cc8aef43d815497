use crate::{clamp_length, Generator, ALPHABET, DEFAULT_CODE_LENGTH};
use rand::rngs::OsRng;
use rand::TryRngCore;
use snip_core::{GenerationError, ShortCode};

/// Largest multiple of the alphabet size that fits in a byte. Bytes at or
/// above it are rejected so every symbol is equally likely.
const REJECTION_LIMIT: u8 = (256 / ALPHABET.len() * ALPHABET.len()) as u8;

/// A source of cryptographically secure random bytes.
pub trait EntropySource: Send + Sync + 'static {
    fn fill(&self, buf: &mut [u8]) -> Result<(), GenerationError>;
}

/// The operating system's CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEntropy;

impl EntropySource for SystemEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<(), GenerationError> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| GenerationError::Entropy(e.to_string()))
    }
}

/// Draws each symbol independently and uniformly from [`ALPHABET`].
#[derive(Debug, Clone)]
pub struct RandomGenerator<S = SystemEntropy> {
    length: usize,
    entropy: S,
}

impl RandomGenerator<SystemEntropy> {
    /// Creates a generator producing codes of `length` symbols, clamped to
    /// the supported range.
    pub fn new(length: usize) -> Self {
        Self::with_entropy(length, SystemEntropy)
    }
}

impl Default for RandomGenerator<SystemEntropy> {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_LENGTH)
    }
}

impl<S: EntropySource> RandomGenerator<S> {
    pub fn with_entropy(length: usize, entropy: S) -> Self {
        Self {
            length: clamp_length(length),
            entropy,
        }
    }

    /// The effective (clamped) code length.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Generates a code of `length` symbols, clamped to the supported range.
    pub fn generate_with_length(&self, length: usize) -> Result<ShortCode, GenerationError> {
        let length = clamp_length(length);
        let mut code = String::with_capacity(length);
        // Twice the target length covers the ~3% rejection rate in one draw
        // almost always.
        let mut buf = vec![0u8; length * 2];

        while code.len() < length {
            self.entropy.fill(&mut buf)?;
            for &byte in &buf {
                if byte >= REJECTION_LIMIT {
                    continue;
                }
                code.push(char::from(ALPHABET[byte as usize % ALPHABET.len()]));
                if code.len() == length {
                    break;
                }
            }
        }

        Ok(ShortCode::new_unchecked(code))
    }
}

impl<S: EntropySource> Generator for RandomGenerator<S> {
    fn generate(&self) -> Result<ShortCode, GenerationError> {
        self.generate_with_length(self.length)
    }
}
