use crate::{clamp_length, encode, Generator, DEFAULT_CODE_LENGTH};
use jiff::Timestamp;
use snip_core::{GenerationError, ShortCode};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use typed_builder::TypedBuilder;

const TIMESTAMP_BITS: u32 = 32;
const INSTANCE_BITS: u32 = 4;
const SEQUENCE_BITS: u32 = 10;
const ID_BITS: u32 = TIMESTAMP_BITS + INSTANCE_BITS + SEQUENCE_BITS;
const ID_MASK: u64 = (1_u64 << ID_BITS) - 1;

const MAX_ELAPSED_SECONDS: i64 = (1_i64 << TIMESTAMP_BITS) - 1;
pub const MAX_INSTANCE_ID: u16 = (1 << INSTANCE_BITS) - 1;
const MAX_SEQUENCE: u16 = (1 << SEQUENCE_BITS) - 1;

pub trait Clock: Send + Sync + 'static {
    /// Returns the current time of the clock
    fn now(&self) -> Timestamp;
    /// Block and wait until the clock reaches the target time.
    fn wait_until(&self, target: Timestamp);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    fn wait_until(&self, target: Timestamp) {
        loop {
            let now = Timestamp::now();
            if now >= target {
                return;
            }
            let remaining = now.duration_until(target).unsigned_abs();
            std::thread::sleep(remaining.max(Duration::from_millis(1)));
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SequenceConfigError {
    #[error("invalid instance id {instance_id}; expected 0..={max}")]
    InvalidInstanceId { instance_id: u16, max: u16 },
    #[error("epoch is ahead of current clock time: epoch={epoch}, now={now}")]
    EpochAhead { epoch: Timestamp, now: Timestamp },
}

/// Configures a [`SequenceGenerator`].
#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct SequenceSettings {
    /// Partition of the id space owned by this process, in `[0, 15]`.
    /// Concurrently running instances must use distinct values.
    pub instance_id: u16,
    /// Zero point of the 32-bit seconds field.
    pub epoch: Timestamp,
    /// Minimum code length; shorter encodings are left-padded.
    #[builder(default = DEFAULT_CODE_LENGTH)]
    pub length: usize,
    /// Odd multiplier used to scatter consecutive ids across the code space.
    #[builder(default = 0x5_DEEC_E66D)]
    pub multiplier: u64,
    #[builder(default = 0x2B5F_3C1A_9E47)]
    pub mask: u64,
}

#[derive(Debug, Default)]
struct SequenceState {
    last_second: Option<i64>,
    sequence: u16,
}

/// A process-local sequence generator partitioned by instance id.
///
/// Each id packs `(elapsed seconds, instance id, per-second sequence)`, so
/// two instances with distinct ids never produce the same value. If the clock
/// moves backwards the generator waits for it to catch up instead of reusing
/// a sequence value. Ids are scrambled with a bijective multiply-xor before
/// encoding so consecutive codes do not look consecutive.
pub struct SequenceGenerator<C: Clock = SystemClock> {
    epoch_second: i64,
    instance_id: u16,
    length: usize,
    multiplier: u64,
    mask: u64,
    clock: C,
    state: Mutex<SequenceState>,
}

impl SequenceGenerator<SystemClock> {
    pub fn new(settings: SequenceSettings) -> Result<Self, SequenceConfigError> {
        Self::with_clock(settings, SystemClock)
    }
}

impl<C: Clock> SequenceGenerator<C> {
    pub fn with_clock(settings: SequenceSettings, clock: C) -> Result<Self, SequenceConfigError> {
        if settings.instance_id > MAX_INSTANCE_ID {
            return Err(SequenceConfigError::InvalidInstanceId {
                instance_id: settings.instance_id,
                max: MAX_INSTANCE_ID,
            });
        }

        let now = clock.now();
        if settings.epoch > now {
            return Err(SequenceConfigError::EpochAhead {
                epoch: settings.epoch,
                now,
            });
        }

        Ok(Self {
            epoch_second: settings.epoch.as_second(),
            instance_id: settings.instance_id,
            length: clamp_length(settings.length),
            // An even multiplier would not be invertible modulo 2^ID_BITS.
            multiplier: settings.multiplier | 1,
            mask: settings.mask & ID_MASK,
            clock,
            state: Mutex::new(SequenceState::default()),
        })
    }

    /// Returns the next raw (unscrambled) id.
    pub fn next_id(&self) -> Result<u64, GenerationError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| GenerationError::StatePoisoned)?;

        let mut now = self.clock.now().as_second();

        match state.last_second {
            None => state.sequence = 0,
            Some(last) => {
                if now < last {
                    // Clock regression: block until we are back at `last`
                    // so no (second, sequence) pair is handed out twice.
                    self.clock.wait_until(second_to_timestamp(last)?);
                    now = self.clock.now().as_second().max(last);
                }

                if now == last {
                    if state.sequence < MAX_SEQUENCE {
                        state.sequence += 1;
                    } else {
                        self.clock.wait_until(second_to_timestamp(last + 1)?);
                        now = self.clock.now().as_second().max(last + 1);
                        state.sequence = 0;
                    }
                } else {
                    state.sequence = 0;
                }
            }
        }

        let elapsed = now - self.epoch_second;
        if !(0..=MAX_ELAPSED_SECONDS).contains(&elapsed) {
            return Err(GenerationError::SequenceExhausted);
        }

        state.last_second = Some(now);

        Ok(((elapsed as u64) << (INSTANCE_BITS + SEQUENCE_BITS))
            | (u64::from(self.instance_id) << SEQUENCE_BITS)
            | u64::from(state.sequence))
    }

    fn scramble(&self, id: u64) -> u64 {
        (id.wrapping_mul(self.multiplier) ^ self.mask) & ID_MASK
    }
}

fn second_to_timestamp(second: i64) -> Result<Timestamp, GenerationError> {
    Timestamp::from_second(second).map_err(|_| GenerationError::SequenceExhausted)
}

impl<C: Clock> Generator for SequenceGenerator<C> {
    fn generate(&self) -> Result<ShortCode, GenerationError> {
        let id = self.next_id()?;
        Ok(ShortCode::new_unchecked(encode(
            self.scramble(id),
            self.length,
        )))
    }
}
