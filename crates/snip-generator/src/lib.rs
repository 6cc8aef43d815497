//! Short code generators.
//!
//! Generators are pure: they never consult storage, so a generated code is
//! only a candidate. Collision handling belongs to the caller.

pub mod random;
pub mod sequence;

pub use random::RandomGenerator;
pub use sequence::{SequenceGenerator, SequenceSettings};

use snip_core::{GenerationError, ShortCode};

/// Symbols every generator draws from.
pub const ALPHABET: &[u8; 62] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub const MIN_CODE_LENGTH: usize = 4;
pub const DEFAULT_CODE_LENGTH: usize = 7;
pub const MAX_CODE_LENGTH: usize = 12;

/// Trait for generating short codes.
///
/// Implementations can vary from random generators to instance-partitioned
/// sequence generators.
pub trait Generator: Send + Sync + 'static {
    /// Produces a candidate short code. Uniqueness is not guaranteed.
    fn generate(&self) -> Result<ShortCode, GenerationError>;
}

impl<G: Generator + ?Sized> Generator for std::sync::Arc<G> {
    fn generate(&self) -> Result<ShortCode, GenerationError> {
        (**self).generate()
    }
}

/// Clamps a requested code length into `[MIN_CODE_LENGTH, MAX_CODE_LENGTH]`.
pub fn clamp_length(length: usize) -> usize {
    length.clamp(MIN_CODE_LENGTH, MAX_CODE_LENGTH)
}

/// Encodes `value` with [`ALPHABET`], left-padding to at least `min_len` symbols.
pub(crate) fn encode(mut value: u64, min_len: usize) -> String {
    let base = ALPHABET.len() as u64;
    let mut digits = Vec::with_capacity(min_len.max(11));
    while value > 0 {
        digits.push(ALPHABET[(value % base) as usize]);
        value /= base;
    }
    while digits.len() < min_len {
        digits.push(ALPHABET[0]);
    }
    digits.reverse();
    digits.into_iter().map(char::from).collect()
}
