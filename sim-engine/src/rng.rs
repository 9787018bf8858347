//! Deterministic RNG service (spec §4.1). A single seeded stream used by
//! every entity in a simulation; every output is a pure function of the
//! seed and the call sequence, which is what makes two runs with the same
//! seed/config/Δ bitwise-identical (spec §8 property 2).

use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;

use crate::time::Delta;

pub struct DeterministicRng {
    rng: ChaCha12Rng,
    delta_seconds: f64,
    // rate (as bit pattern, since f64 isn't Hash/Eq) -> 1 - exp(-rate * delta_seconds).
    // Justified because delta_seconds is constant for the simulation's lifetime
    // and the same handful of rates are reused by every entity every tick.
    poisson_event_cache: HashMap<u64, f64>,
}

impl DeterministicRng {
    pub fn new(seed: u64, delta: Delta) -> Self {
        Self {
            rng: ChaCha12Rng::seed_from_u64(seed),
            delta_seconds: delta.seconds(),
            poisson_event_cache: HashMap::new(),
        }
    }

    /// Uniformly chooses one element of `seq`.
    pub fn choice<'a, T>(&mut self, seq: &'a [T]) -> &'a T {
        let idx = self.rng.gen_range(0..seq.len());
        &seq[idx]
    }

    /// Linear scan consuming a single uniform draw over `sum(weights)`;
    /// ties are broken by the first entry whose cumulative weight is reached.
    pub fn choice_with_weights<'a, T>(&mut self, seq: &'a [T], weights: &[f64]) -> &'a T {
        debug_assert_eq!(seq.len(), weights.len());
        let total: f64 = weights.iter().sum();
        let mut r = self.rng.gen::<f64>() * total;
        for (idx, &w) in weights.iter().enumerate() {
            r -= w;
            if r <= 0.0 {
                return &seq[idx];
            }
        }
        // Floating-point rounding can leave r slightly positive after the
        // last subtraction; fall back to the last element.
        &seq[seq.len() - 1]
    }

    /// Samples `k` elements without replacement.
    pub fn sample<T: Clone>(&mut self, population: &[T], k: usize) -> Vec<T> {
        use rand::seq::SliceRandom;
        population
            .choose_multiple(&mut self.rng, k)
            .cloned()
            .collect()
    }

    /// Returns a freshly shuffled copy of `seq`; the input is left untouched.
    pub fn shuffle<T: Clone>(&mut self, seq: &[T]) -> Vec<T> {
        use rand::seq::SliceRandom;
        let mut result = seq.to_vec();
        result.shuffle(&mut self.rng);
        result
    }

    /// Bernoulli trial with success probability `p`.
    pub fn coin(&mut self, p: f64) -> bool {
        self.rng.gen::<f64>() < p
    }

    /// True with probability `1 - exp(-rate * delta_seconds)` (spec glossary
    /// "Poisson event"). `rate` is expected events per second.
    pub fn poisson_event(&mut self, rate: f64) -> bool {
        let key = rate.to_bits();
        let threshold = *self
            .poisson_event_cache
            .entry(key)
            .or_insert_with(|| 1.0 - (-rate * self.delta_seconds).exp());
        self.rng.gen::<f64>() < threshold
    }

    /// An exponential inter-arrival sample converted to whole milliseconds
    /// (spec glossary "Poisson delay"). `rate` is expected events per second.
    pub fn poisson_delay(&mut self, rate: f64) -> u64 {
        // Mirrors Python's random.expovariate: -ln(u) / rate, with u drawn
        // from (0, 1] so the log is always finite.
        let u: f64 = 1.0 - self.rng.gen::<f64>();
        let sample_seconds = -u.ln() / rate;
        (1_000.0 * sample_seconds).floor() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let delta = Delta::from_millis(1);
        let mut a = DeterministicRng::new(42, delta);
        let mut b = DeterministicRng::new(42, delta);
        let seq = [1, 2, 3, 4, 5];
        for _ in 0..20 {
            assert_eq!(a.choice(&seq), b.choice(&seq));
            assert_eq!(a.poisson_delay(2.0), b.poisson_delay(2.0));
            assert_eq!(a.poisson_event(1.5), b.poisson_event(1.5));
        }
    }

    #[test]
    fn poisson_delay_is_never_negative() {
        let mut rng = DeterministicRng::new(7, Delta::from_millis(5));
        for _ in 0..1_000 {
            // u64 is unsigned; this just checks it doesn't panic/overflow.
            let _ = rng.poisson_delay(3.0);
        }
    }

    #[test]
    fn choice_with_weights_picks_the_only_nonzero_weight() {
        let mut rng = DeterministicRng::new(1, Delta::from_millis(1));
        let seq = ["a", "b", "c"];
        let weights = [0.0, 1.0, 0.0];
        for _ in 0..50 {
            assert_eq!(*rng.choice_with_weights(&seq, &weights), "b");
        }
    }

    #[test]
    fn sample_without_replacement_has_no_duplicates() {
        let mut rng = DeterministicRng::new(3, Delta::from_millis(1));
        let population: Vec<u32> = (0..10).collect();
        let sampled = rng.sample(&population, 4);
        assert_eq!(sampled.len(), 4);
        let mut unique = sampled.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn shuffle_does_not_mutate_input() {
        let mut rng = DeterministicRng::new(9, Delta::from_millis(1));
        let original = vec![1, 2, 3, 4, 5];
        let shuffled = rng.shuffle(&original);
        assert_eq!(original, vec![1, 2, 3, 4, 5]);
        let mut sorted = shuffled;
        sorted.sort_unstable();
        assert_eq!(sorted, original);
    }
}
