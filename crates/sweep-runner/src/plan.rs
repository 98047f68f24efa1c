//! Configuration enumeration and run identifier allocation.

use std::fmt;
use std::ops::RangeInclusive;

use serde::Serialize;

use crate::error::SweepError;

/// One parameter pair under test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Configuration {
    pub population_size: u64,
    pub crossover_probability: f64,
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "population={}, crossover={}",
            self.population_size, self.crossover_probability
        )
    }
}

/// The validated parameter grid plus the repetition count.
///
/// Enumeration is a pure function of the two lists, so calling
/// [`SweepPlan::configurations`] again always reproduces the same order and
/// therefore the same run identifier range per configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    population_sizes: Vec<u64>,
    crossover_probs: Vec<f64>,
    repetitions: u32,
}

impl SweepPlan {
    pub fn new(
        population_sizes: Vec<u64>,
        crossover_probs: Vec<f64>,
        repetitions: u32,
    ) -> Result<Self, SweepError> {
        if population_sizes.is_empty() {
            return Err(SweepError::InvalidConfig(
                "population_sizes must not be empty".to_string(),
            ));
        }
        if crossover_probs.is_empty() {
            return Err(SweepError::InvalidConfig(
                "crossover_probs must not be empty".to_string(),
            ));
        }
        if let Some(bad) = population_sizes.iter().find(|p| **p == 0) {
            return Err(SweepError::InvalidConfig(format!(
                "population size must be positive (got {})",
                bad
            )));
        }
        if let Some(bad) = crossover_probs
            .iter()
            .find(|c| !c.is_finite() || **c < 0.0 || **c > 1.0)
        {
            return Err(SweepError::InvalidConfig(format!(
                "crossover probability must lie in [0, 1] (got {})",
                bad
            )));
        }
        if repetitions == 0 {
            return Err(SweepError::InvalidConfig(
                "repetitions must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            population_sizes,
            crossover_probs,
            repetitions,
        })
    }

    pub fn population_sizes(&self) -> &[u64] {
        &self.population_sizes
    }

    pub fn crossover_probs(&self) -> &[f64] {
        &self.crossover_probs
    }

    pub fn repetitions(&self) -> u32 {
        self.repetitions
    }

    /// Cartesian product in order: outer population sizes, inner crossover
    /// probabilities.
    pub fn configurations(&self) -> impl Iterator<Item = Configuration> + '_ {
        self.population_sizes.iter().flat_map(move |&population_size| {
            self.crossover_probs
                .iter()
                .map(move |&crossover_probability| Configuration {
                    population_size,
                    crossover_probability,
                })
        })
    }

    /// Number of configurations.
    pub fn len(&self) -> usize {
        self.population_sizes.len() * self.crossover_probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_trials(&self) -> u64 {
        self.len() as u64 * u64::from(self.repetitions)
    }

    /// Identifiers the configuration at `index` receives when the sweep
    /// starts allocating at `first_run_id`. `None` if the range does not fit
    /// in `u64`.
    pub fn id_range(&self, index: usize, first_run_id: u64) -> Option<RangeInclusive<u64>> {
        let reps = u64::from(self.repetitions);
        let start = (index as u64)
            .checked_mul(reps)
            .and_then(|offset| first_run_id.checked_add(offset))?;
        let end = start.checked_add(reps - 1)?;
        Some(start..=end)
    }

    /// Identifier of the last trial, or `None` if the sweep would run past
    /// `u64::MAX`.
    pub fn last_run_id(&self, first_run_id: u64) -> Option<u64> {
        first_run_id.checked_add(self.total_trials().checked_sub(1)?)
    }
}

/// Hands out run identifiers in strictly increasing order. Once `u64::MAX`
/// has been handed out the allocator is exhausted and never wraps.
#[derive(Debug)]
pub struct RunIdAllocator {
    next: Option<u64>,
}

impl RunIdAllocator {
    pub fn new() -> Self {
        Self { next: Some(1) }
    }

    pub fn starting_at(first: u64) -> Self {
        Self { next: Some(first) }
    }

    pub fn allocate(&mut self) -> Option<u64> {
        let id = self.next?;
        self.next = id.checked_add(1);
        Some(id)
    }

    pub fn peek(&self) -> Option<u64> {
        self.next
    }
}

impl Default for RunIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configurations_follow_cartesian_order() {
        let plan = SweepPlan::new(vec![64, 1024, 16384], vec![0.2, 0.01, 0.8], 10)
            .expect("valid plan");
        let p = plan.population_sizes().to_vec();
        let c = plan.crossover_probs().to_vec();
        let configs: Vec<Configuration> = plan.configurations().collect();
        assert_eq!(configs.len(), p.len() * c.len());
        for (k, config) in configs.iter().enumerate() {
            assert_eq!(config.population_size, p[k / c.len()]);
            assert_eq!(config.crossover_probability, c[k % c.len()]);
        }
        assert_eq!(plan.len(), 9);
        assert_eq!(plan.total_trials(), 90);
    }

    #[test]
    fn enumeration_is_repeatable() {
        let plan = SweepPlan::new(vec![5, 3], vec![0.5, 0.1, 0.9], 1).expect("valid plan");
        let first: Vec<Configuration> = plan.configurations().collect();
        let second: Vec<Configuration> = plan.configurations().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn id_range_matches_enumeration_position() {
        let plan = SweepPlan::new(vec![64, 1024], vec![0.2, 0.8], 2).expect("valid plan");
        assert_eq!(plan.id_range(0, 1), Some(1..=2));
        assert_eq!(plan.id_range(3, 1), Some(7..=8));
        assert_eq!(plan.id_range(1, 41), Some(43..=44));
        assert_eq!(plan.last_run_id(1), Some(8));
    }

    #[test]
    fn id_range_near_u64_max_does_not_overflow() {
        let plan = SweepPlan::new(vec![64, 1024, 16384], vec![0.2, 0.01, 0.8], 10)
            .expect("valid plan");
        let first = u64::MAX - 5;
        assert_eq!(plan.id_range(0, first), Some(first..=u64::MAX));
        assert_eq!(plan.id_range(8, first), None);
        assert_eq!(plan.last_run_id(first), None);
        assert_eq!(plan.last_run_id(u64::MAX - 89), Some(u64::MAX));
    }

    #[test]
    fn plan_rejects_bad_inputs() {
        assert!(SweepPlan::new(vec![], vec![0.2], 1).is_err());
        assert!(SweepPlan::new(vec![64], vec![], 1).is_err());
        assert!(SweepPlan::new(vec![0], vec![0.2], 1).is_err());
        assert!(SweepPlan::new(vec![64], vec![1.5], 1).is_err());
        assert!(SweepPlan::new(vec![64], vec![f64::NAN], 1).is_err());
        assert!(SweepPlan::new(vec![64], vec![0.2], 0).is_err());
        assert!(SweepPlan::new(vec![64], vec![0.0, 1.0], 1).is_ok());
    }

    #[test]
    fn allocator_counts_up_from_one() {
        let mut ids = RunIdAllocator::new();
        let got: Vec<u64> = (0..7).map(|_| ids.allocate().expect("id")).collect();
        assert_eq!(got, (1..=7).collect::<Vec<_>>());
        assert_eq!(ids.peek(), Some(8));
    }

    #[test]
    fn allocator_honors_first_id() {
        let mut ids = RunIdAllocator::starting_at(41);
        assert_eq!(ids.allocate(), Some(41));
        assert_eq!(ids.allocate(), Some(42));
    }

    #[test]
    fn allocator_is_exhausted_after_u64_max() {
        let mut ids = RunIdAllocator::starting_at(u64::MAX - 1);
        assert_eq!(ids.allocate(), Some(u64::MAX - 1));
        assert_eq!(ids.allocate(), Some(u64::MAX));
        assert_eq!(ids.peek(), None);
        assert_eq!(ids.allocate(), None);
    }

    #[test]
    fn configuration_display_names_both_parameters() {
        let config = Configuration {
            population_size: 64,
            crossover_probability: 0.2,
        };
        assert_eq!(config.to_string(), "population=64, crossover=0.2");
    }
}
