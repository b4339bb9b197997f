//! Weighted selection.
//!
//! Model groups inside a rule set compete for traffic by weight. Selection
//! uses a discrete cumulative law: with weights `[2, 3]` seeds `0..=1` pick
//! the first entry and seeds `2..=4` pick the second. Declaration order is the
//! tie-break, so a fixed seed always selects the same entry.

use rand::Rng;

use crate::error::ConfigError;

/// Source of uniformly distributed seeds.
///
/// Compiled rules share one source across concurrent requests, so
/// implementations must be safe to call from many threads.
pub trait SeedSource: Send + Sync {
    /// Draw a seed in `[0, max_seed]`.
    fn draw(&self, max_seed: u64) -> u64;
}

/// [`SeedSource`] backed by the thread-local generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngSource;

impl SeedSource for ThreadRngSource {
    fn draw(&self, max_seed: u64) -> u64 {
        rand::thread_rng().gen_range(0..=max_seed)
    }
}

/// Always returns the same seed (clamped to the requested range).
#[derive(Debug, Clone, Copy)]
pub struct ConstantSeed(pub u64);

impl SeedSource for ConstantSeed {
    fn draw(&self, max_seed: u64) -> u64 {
        self.0.min(max_seed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightedEntry<T> {
    pub weight: u32,
    pub item: T,
}

impl<T> WeightedEntry<T> {
    pub fn new(weight: u32, item: T) -> Self {
        WeightedEntry { weight, item }
    }
}

#[derive(Debug, Clone)]
pub struct WeightedList<T> {
    entries: Vec<WeightedEntry<T>>,
    total: u64,
}

impl<T> WeightedList<T> {
    /// Entries keep their declaration order. Weights must be positive and the
    /// list non-empty.
    pub fn new(entries: Vec<WeightedEntry<T>>) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::EmptyWeightedList);
        }
        if let Some(entry) = entries.iter().find(|entry| entry.weight == 0) {
            return Err(ConfigError::NonPositiveWeight(i64::from(entry.weight)));
        }

        let total = entries.iter().map(|entry| u64::from(entry.weight)).sum();
        Ok(WeightedList { entries, total })
    }

    /// Largest seed accepted by [`WeightedList::pick`].
    pub fn max_seed(&self) -> u64 {
        self.total - 1
    }

    /// First entry whose cumulative weight exceeds `seed`.
    pub fn pick(&self, seed: u64) -> Option<&T> {
        let mut cumulative = 0u64;
        for entry in &self.entries {
            cumulative += u64::from(entry.weight);
            if cumulative > seed {
                return Some(&entry.item);
            }
        }
        None
    }

    pub fn entries(&self) -> &[WeightedEntry<T>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
