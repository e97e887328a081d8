//! Boost seed and mixed-batch construction
//!
//! The boost seed is a small labeled target subset drawn once, without
//! replacement, before adaptation starts. Every step it is concatenated with a
//! random draw from that step's pseudo-labels; the draw size grows with the
//! step index following [`MixSchedule`].

use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::pseudo_label::PseudoLabelSet;
use crate::dataset::{ImageSet, OneHotLabels};
use crate::utils::error::{AdaptationError, Result};

/// Fixed labeled target subset
#[derive(Debug, Clone)]
pub struct BoostSeed {
    pub images: ImageSet,
    pub labels: OneHotLabels,
    /// Pool indices the seed was drawn from
    pub indices: Vec<usize>,
}

impl BoostSeed {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Draw `n` distinct examples uniformly from the labeled pool
pub fn draw_boost_seed<R: Rng + ?Sized>(
    pool: &ImageSet,
    labels: &[usize],
    n: usize,
    num_classes: usize,
    rng: &mut R,
) -> Result<BoostSeed> {
    if pool.len() != labels.len() {
        return Err(AdaptationError::InvalidInput(format!(
            "{} pool images but {} labels",
            pool.len(),
            labels.len()
        )));
    }
    if n > pool.len() {
        return Err(AdaptationError::Config(format!(
            "n_boost = {} exceeds the target pool size {}",
            n,
            pool.len()
        )));
    }

    let indices = index::sample(rng, pool.len(), n).into_vec();
    let seed_labels: Vec<usize> = indices.iter().map(|&i| labels[i]).collect();

    Ok(BoostSeed {
        images: pool.select(&indices),
        labels: OneHotLabels::from_indices(&seed_labels, num_classes)?,
        indices,
    })
}

/// How many pseudo-labels to mix in per step:
/// `max(floor((step + 1) * pool_size / scale), floor_min)`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MixSchedule {
    pub scale: usize,
    pub floor_min: usize,
}

impl Default for MixSchedule {
    fn default() -> Self {
        Self {
            scale: 20,
            floor_min: 1000,
        }
    }
}

impl MixSchedule {
    /// Requested candidate count before clamping to the available pool
    pub fn target_count(&self, step: usize, pool_size: usize) -> usize {
        ((step + 1) * pool_size / self.scale).max(self.floor_min)
    }

    /// Requested count clamped to `available` candidates
    pub fn sample_count(&self, step: usize, pool_size: usize, available: usize) -> usize {
        self.target_count(step, pool_size).min(available)
    }
}

/// How candidates are drawn from the pseudo-label pool
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SamplingPolicy {
    /// Uniform with replacement; duplicates are possible
    #[default]
    WithReplacement,
    /// Uniform without replacement
    WithoutReplacement,
}

impl SamplingPolicy {
    /// `n` indices into `0..available`
    pub fn draw<R: Rng + ?Sized>(&self, available: usize, n: usize, rng: &mut R) -> Vec<usize> {
        if available == 0 || n == 0 {
            return Vec::new();
        }
        match self {
            SamplingPolicy::WithReplacement => (0..n).map(|_| rng.gen_range(0..available)).collect(),
            SamplingPolicy::WithoutReplacement => index::sample(rng, available, n.min(available)).into_vec(),
        }
    }
}

/// Boost seed plus the sampled pseudo-labels for one step
#[derive(Debug, Clone)]
pub struct MixedTrainingBatch {
    pub images: ImageSet,
    pub labels: OneHotLabels,
    /// Pseudo-labeled examples drawn this step (the rest is the boost seed)
    pub sampled: usize,
}

impl MixedTrainingBatch {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Build the step's training batch: boost seed first, then the drawn candidates
pub fn mix<R: Rng + ?Sized>(
    seed: &BoostSeed,
    candidates: &PseudoLabelSet,
    step: usize,
    pool_size: usize,
    schedule: &MixSchedule,
    policy: SamplingPolicy,
    rng: &mut R,
) -> Result<MixedTrainingBatch> {
    let n = schedule.sample_count(step, pool_size, candidates.len());
    let rows = policy.draw(candidates.len(), n, rng);

    let sampled_labels: Vec<usize> = rows.iter().map(|&r| candidates.labels[r]).collect();
    let sampled_labels = OneHotLabels::from_indices(&sampled_labels, seed.labels.num_classes())?;

    let images = if rows.is_empty() {
        seed.images.clone()
    } else {
        seed.images.concat(&candidates.images.select(&rows))?
    };
    let labels = seed.labels.concat(&sampled_labels)?;

    Ok(MixedTrainingBatch {
        images,
        labels,
        sampled: rows.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;

    fn pool(n: usize) -> ImageSet {
        ImageSet::new((0..n).map(|i| i as f32).collect(), n, 1, 1, 1).unwrap()
    }

    #[test]
    fn test_boost_seed_has_unique_indices() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let labels: Vec<usize> = (0..5000).map(|i| i % 10).collect();
        let seed = draw_boost_seed(&pool(5000), &labels, 500, 10, &mut rng).unwrap();

        assert_eq!(seed.len(), 500);
        let unique: HashSet<usize> = seed.indices.iter().copied().collect();
        assert_eq!(unique.len(), 500);

        // Images and labels follow the drawn indices
        for (row, &idx) in seed.indices.iter().enumerate() {
            assert_eq!(seed.images.image(row)[0], idx as f32);
            assert_eq!(seed.labels.argmax(row), idx % 10);
        }
    }

    #[test]
    fn test_boost_seed_larger_than_pool() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!(draw_boost_seed(&pool(10), &[0; 10], 11, 10, &mut rng).is_err());
    }

    #[test]
    fn test_schedule_floor_and_growth() {
        let schedule = MixSchedule::default();
        assert_eq!(schedule.target_count(1, 2000), 1000);
        assert_eq!(schedule.target_count(1, 60000), 6000);
        assert_eq!(schedule.target_count(19, 60000), 60000);
        assert_eq!(schedule.sample_count(1, 60000, 250), 250);
    }

    #[test]
    fn test_schedule_is_monotone() {
        let schedule = MixSchedule::default();
        for pool_size in [0, 999, 2000, 12345, 60000] {
            let mut previous = 0;
            for step in 1..60 {
                let n = schedule.target_count(step, pool_size);
                assert!(n >= previous);
                assert!(n >= 1000);
                previous = n;
            }
        }
    }

    #[test]
    fn test_policy_draws() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let with = SamplingPolicy::WithReplacement.draw(3, 50, &mut rng);
        assert_eq!(with.len(), 50);
        assert!(with.iter().all(|&i| i < 3));

        let without = SamplingPolicy::WithoutReplacement.draw(3, 50, &mut rng);
        let unique: HashSet<usize> = without.iter().copied().collect();
        assert_eq!(without.len(), 3);
        assert_eq!(unique.len(), 3);

        assert!(SamplingPolicy::WithReplacement.draw(0, 10, &mut rng).is_empty());
    }

    #[test]
    fn test_mix_with_empty_candidates_is_seed_only() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let labels: Vec<usize> = (0..20).map(|i| i % 2).collect();
        let seed = draw_boost_seed(&pool(20), &labels, 4, 2, &mut rng).unwrap();
        let empty = PseudoLabelSet::empty(1, 1, 1);

        let batch = mix(
            &seed,
            &empty,
            1,
            20,
            &MixSchedule::default(),
            SamplingPolicy::WithReplacement,
            &mut rng,
        )
        .unwrap();
        assert_eq!(batch.len(), 4);
        assert_eq!(batch.sampled, 0);
        assert_eq!(batch.labels.len(), 4);
    }
}
