//! Weighted random selection
//!
//! A [`WeightedSelector`] is built once from a snapshot of (item, weight)
//! pairs and answers draws proportional to weight. The directory rebuilds
//! its selectors from scratch after every rescoring instead of mutating them.
//!
//! Items with a zero, negative, or non-finite weight are dropped at
//! construction, so a peer whose score fell to zero is never chosen.

use rand::Rng;

use crate::error::SelectionError;

/// Summary of a selector's weights, for logging
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolStats {
    pub count: usize,
    pub total: f64,
    pub max: f64,
    pub mean: f64,
}

/// Immutable weighted sampling structure
#[derive(Debug, Clone)]
pub struct WeightedSelector<T> {
    items: Vec<T>,
    weights: Vec<f64>,
    cumulative: Vec<f64>,
    total: f64,
}

impl<T> Default for WeightedSelector<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> WeightedSelector<T> {
    /// Build from (item, weight) pairs
    pub fn new<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (T, f64)>,
    {
        let mut items = Vec::new();
        let mut weights = Vec::new();
        let mut cumulative = Vec::new();
        let mut total = 0.0;

        for (item, weight) in pairs {
            if !(weight.is_finite() && weight > 0.0) {
                continue;
            }
            total += weight;
            items.push(item);
            weights.push(weight);
            cumulative.push(total);
        }

        Self {
            items,
            weights,
            cumulative,
            total,
        }
    }

    /// A selector with nothing to choose from
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            weights: Vec::new(),
            cumulative: Vec::new(),
            total: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.total
    }

    /// Draw one item
    pub fn sample(&self) -> Result<&T, SelectionError> {
        self.sample_with(&mut rand::rng())
    }

    /// Draw one item using the given generator
    pub fn sample_with<R: Rng>(&self, rng: &mut R) -> Result<&T, SelectionError> {
        if self.items.is_empty() {
            return Err(SelectionError::EmptyPool);
        }
        let point = rng.random_range(0.0..self.total);
        let index = self
            .cumulative
            .partition_point(|c| *c <= point)
            .min(self.items.len() - 1);
        Ok(&self.items[index])
    }

    /// Draw up to `n` items
    ///
    /// With `distinct`, items are drawn without replacement and at most
    /// [`Self::len`] items are returned.
    pub fn sample_many(&self, n: usize, distinct: bool) -> Vec<&T> {
        self.sample_many_with(&mut rand::rng(), n, distinct)
    }

    pub fn sample_many_with<R: Rng>(
        &self,
        rng: &mut R,
        n: usize,
        distinct: bool,
    ) -> Vec<&T> {
        if self.items.is_empty() || n == 0 {
            return Vec::new();
        }

        if !distinct {
            return (0..n).filter_map(|_| self.sample_with(rng).ok()).collect();
        }

        // Weighted sampling without replacement: each item gets the key
        // ln(u) / w and the n largest keys win.
        let mut keyed: Vec<(f64, usize)> = self
            .weights
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let u: f64 = 1.0 - rng.random::<f64>();
                (u.ln() / w, i)
            })
            .collect();
        keyed.sort_by(|a, b| b.0.total_cmp(&a.0));
        keyed
            .into_iter()
            .take(n)
            .map(|(_, i)| &self.items[i])
            .collect()
    }

    pub fn stats(&self) -> PoolStats {
        let count = self.items.len();
        let max = self.weights.iter().copied().fold(0.0, f64::max);
        let mean = if count == 0 { 0.0 } else { self.total / count as f64 };
        PoolStats {
            count,
            total: self.total,
            max,
            mean,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn test_empty_pool_fails() {
        let selector: WeightedSelector<u32> = WeightedSelector::new(Vec::new());
        assert_eq!(selector.sample(), Err(SelectionError::EmptyPool));
        assert!(selector.sample_many(3, false).is_empty());
    }

    #[test]
    fn test_only_zero_weights_is_empty() {
        let selector = WeightedSelector::new(vec![(1, 0.0), (2, 0.0), (3, -1.0), (4, f64::NAN)]);
        assert!(selector.is_empty());
        assert_eq!(selector.sample(), Err(SelectionError::EmptyPool));
    }

    #[test]
    fn test_single_positive_weight_always_chosen() {
        let mut pairs: Vec<(u32, f64)> = (0..20).map(|i| (i, 0.0)).collect();
        pairs.push((99, 0.5));
        let selector = WeightedSelector::new(pairs);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            assert_eq!(*selector.sample_with(&mut rng).unwrap(), 99);
        }
        assert_eq!(selector.sample_many(5, true), vec![&99]);
    }

    #[test]
    fn test_draws_follow_weights() {
        let selector = WeightedSelector::new(vec![("light", 1.0), ("heavy", 3.0)]);
        let mut rng = StdRng::seed_from_u64(42);
        let draws = 20_000;
        let heavy = (0..draws)
            .filter(|_| *selector.sample_with(&mut rng).unwrap() == "heavy")
            .count();
        let share = heavy as f64 / draws as f64;
        assert!((0.72..0.78).contains(&share), "heavy share {share}");
    }

    #[test]
    fn test_no_insertion_order_bias() {
        let selector = WeightedSelector::new(vec![(1, 1.0), (2, 1.0), (3, 1.0), (4, 1.0)]);
        let mut rng = StdRng::seed_from_u64(3);
        let mut counts = [0usize; 5];
        for _ in 0..8_000 {
            counts[*selector.sample_with(&mut rng).unwrap()] += 1;
        }
        for count in &counts[1..] {
            assert!((1_700..2_300).contains(count), "counts {counts:?}");
        }
    }

    #[test]
    fn test_distinct_draws_have_no_repeats() {
        let selector = WeightedSelector::new((0..10).map(|i| (i, 1.0 + i as f64)));
        let mut rng = StdRng::seed_from_u64(11);
        let picked = selector.sample_many_with(&mut rng, 6, true);
        assert_eq!(picked.len(), 6);
        let unique: HashSet<_> = picked.iter().collect();
        assert_eq!(unique.len(), 6);

        let all = selector.sample_many_with(&mut rng, 50, true);
        assert_eq!(all.len(), 10);
    }

    #[test]
    fn test_repeated_draws_allow_repeats() {
        let selector = WeightedSelector::new(vec![(1, 1.0)]);
        assert_eq!(selector.sample_many(4, false), vec![&1, &1, &1, &1]);
    }

    #[test]
    fn test_stats() {
        let selector = WeightedSelector::new(vec![(1, 1.0), (2, 3.0), (3, 0.0)]);
        let stats = selector.stats();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total, 4.0);
        assert_eq!(stats.max, 3.0);
        assert_eq!(stats.mean, 2.0);
    }
}
