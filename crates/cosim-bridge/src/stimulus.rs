//! Stimulus generation for the simulator.
//!
//! Every `print_frequency` cycles the bridge loads a random byte into the
//! simulator's counter; on the other cycles the counter just advances. The random
//! source is injected so a fixed seed yields a fixed command sequence.

use std::num::NonZeroU64;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::bridge::protocol::Command;

/// Seeded command generator owned by one bridge.
pub struct Stimulus {
    print_frequency: NonZeroU64,
    rng: ChaCha8Rng,
}

impl Stimulus {
    /// Create a generator, seeded from OS entropy when `seed` is `None`.
    #[must_use]
    pub fn new(print_frequency: NonZeroU64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self::with_rng(print_frequency, rng)
    }

    #[must_use]
    pub fn with_rng(print_frequency: NonZeroU64, rng: ChaCha8Rng) -> Self {
        Self {
            print_frequency,
            rng,
        }
    }

    /// Command for `cycle`: a load of a fresh random byte on multiples of
    /// `print_frequency`, a no-op otherwise.
    pub fn encode_command(&mut self, cycle: u64) -> Command {
        if cycle % self.print_frequency.get() == 0 {
            Command::Load(self.rng.gen_range(0..=u8::MAX))
        } else {
            Command::Noop
        }
    }
}
