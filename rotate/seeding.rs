use crate::cayley::{identity_parameters, parameter_count, skew_parameter_count};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedStrategy {
    Exhaustive,
    Light,
    Single,
}

#[derive(Clone, Copy, Debug)]
pub struct SeedConfig {
    pub strategy: SeedStrategy,
    pub bounds: (f64, f64),
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            strategy: SeedStrategy::Light,
            bounds: (-1.0, 1.0),
        }
    }
}

fn clamp_to_bounds(value: f64, bounds: (f64, f64)) -> f64 {
    let (lo, hi) = if bounds.0 <= bounds.1 {
        bounds
    } else {
        (bounds.1, bounds.0)
    };
    value.clamp(lo, hi)
}

/// Offsets tried along each skew axis, as fractions of a half-turn in tangent space.
fn single_axis_values(strategy: SeedStrategy) -> Vec<f64> {
    match strategy {
        SeedStrategy::Single => Vec::new(),
        SeedStrategy::Light => vec![0.5, -0.5],
        SeedStrategy::Exhaustive => vec![1.0, 0.5, 0.25, -0.25, -0.5, -1.0],
    }
}

fn pairwise_templates(strategy: SeedStrategy) -> Vec<(f64, f64)> {
    match strategy {
        SeedStrategy::Exhaustive => vec![(0.5, 0.5), (0.5, -0.5)],
        SeedStrategy::Light | SeedStrategy::Single => Vec::new(),
    }
}

/// Deterministic starting points for the rotation search over `num_factors` factors.
///
/// The identity parameters always come first. Every other seed is a single-axis skew offset, a
/// pairwise skew template, or a single reflected column, and duplicates are dropped.
pub fn generate_rotation_seeds(num_factors: usize, config: &SeedConfig) -> Vec<Array1<f64>> {
    let identity = identity_parameters(num_factors);
    let skew_len = skew_parameter_count(num_factors);
    let mut seeds = vec![identity.clone()];

    let axis_values: Vec<f64> = single_axis_values(config.strategy)
        .into_iter()
        .map(|v| clamp_to_bounds(v, config.bounds))
        .collect();
    for idx in 0..skew_len {
        for &val in &axis_values {
            let mut seed = identity.clone();
            seed[idx] = val;
            seeds.push(seed);
        }
    }

    if skew_len >= 2 {
        let templates: Vec<(f64, f64)> = pairwise_templates(config.strategy)
            .into_iter()
            .map(|(a, b)| (clamp_to_bounds(a, config.bounds), clamp_to_bounds(b, config.bounds)))
            .collect();
        for i in 0..skew_len {
            for j in (i + 1)..skew_len {
                for &(a, b) in &templates {
                    let mut seed_ij = identity.clone();
                    seed_ij[i] = a;
                    seed_ij[j] = b;
                    seeds.push(seed_ij);

                    let mut seed_ji = identity.clone();
                    seed_ji[i] = b;
                    seed_ji[j] = a;
                    seeds.push(seed_ji);
                }
            }
        }
    }

    if config.strategy != SeedStrategy::Single {
        let flip = clamp_to_bounds(-1.0, config.bounds);
        for idx in skew_len..parameter_count(num_factors) {
            let mut seed = identity.clone();
            seed[idx] = flip;
            seeds.push(seed);
        }
    }

    let mut seen: HashSet<Vec<u64>> = HashSet::new();
    let mut unique: Vec<Array1<f64>> = Vec::with_capacity(seeds.len());
    for s in seeds.into_iter() {
        let key: Vec<u64> = s.iter().map(|&v| v.to_bits()).collect();
        if seen.insert(key) {
            unique.push(s);
        }
    }

    unique
}
