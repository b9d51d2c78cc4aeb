//! Injectable shuffling, so matcher-queue ordering can be made deterministic
//! in tests.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::matcher::MatcherHandle;

/// A source of randomness for shuffling matcher queues.
///
/// Not generic over the element type: a trait object (`Arc<dyn
/// RandomSource>`) is stored on the processor, and trait objects cannot
/// carry generic methods. Since the only thing this crate ever shuffles is
/// a list of [`MatcherHandle`]s, that's the concrete signature.
pub trait RandomSource: Send + Sync {
    fn shuffle(&self, items: &mut [MatcherHandle]);
}

/// Shuffles using the thread-local RNG. The default in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngSource;

impl RandomSource for ThreadRngSource {
    fn shuffle(&self, items: &mut [MatcherHandle]) {
        items.shuffle(&mut rand::thread_rng());
    }
}

/// Shuffles using a fixed seed, for tests that want randomized-but-
/// reproducible matcher ordering.
pub struct SeededSource {
    seed: u64,
}

impl SeededSource {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl RandomSource for SeededSource {
    fn shuffle(&self, items: &mut [MatcherHandle]) {
        let mut rng = StdRng::seed_from_u64(self.seed);
        items.shuffle(&mut rng);
    }
}

/// Leaves ordering untouched. Useful when a test asserts on exact matcher
/// call order and shuffling would make the assertion flaky.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoShuffleSource;

impl RandomSource for NoShuffleSource {
    fn shuffle(&self, _items: &mut [MatcherHandle]) {}
}
