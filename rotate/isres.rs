//! # Free-Form Rotation Search
//!
//! Improved Stochastic Ranking Evolution Strategy over the rotation parameter space. The search
//! maximizes an objective subject to the equality constraints `x_d² - 1 = 0` on every reflection
//! parameter, within box bounds, until a wall-clock deadline (or an optional generation cap) is
//! reached. It always returns the best feasible point seen, and the identity parameters are
//! evaluated before anything else, so the result never scores below "no rotation".
//!
//! All randomness comes from one `StdRng` owned by the call. Each generation is scored in parallel
//! with rayon, and results are consumed in population order, so a run is reproducible whenever
//! the deadline does not cut a generation short.

use crate::cayley::{identity_parameters, parameter_count, project_feasible, skew_parameter_count};
use crate::seeding::{SeedConfig, SeedStrategy, generate_rotation_seeds};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use std::time::{Duration, Instant};

/// Probability of ranking infeasible neighbours by objective rather than penalty.
const RANKING_PROBABILITY: f64 = 0.45;
/// Step of the differential variation toward the best parent.
const DIFFERENTIAL_GAMMA: f64 = 0.85;
/// Exponential smoothing of the step sizes.
const SIGMA_SMOOTHING: f64 = 0.2;
const MAX_RESAMPLES: usize = 10;
const SURVIVOR_FRACTION: f64 = 1.0 / 7.0;

#[derive(Clone, Debug)]
pub struct IsresSettings {
    /// Offspring per generation is this factor times the number of parameters.
    pub population_factor: usize,
    pub bounds: (f64, f64),
    /// Equality violations at or below this magnitude carry no penalty.
    pub constraint_tolerance: f64,
    pub max_time: Duration,
    pub seed: u64,
    pub seed_strategy: SeedStrategy,
    pub max_generations: Option<usize>,
}

impl Default for IsresSettings {
    fn default() -> Self {
        Self {
            population_factor: 200,
            bounds: (-1.0, 1.0),
            constraint_tolerance: 1e-3,
            max_time: Duration::from_secs(300),
            seed: 1,
            seed_strategy: SeedStrategy::Light,
            max_generations: None,
        }
    }
}

/// Best feasible point of one search.
#[derive(Clone, Debug)]
pub struct SearchOutcome {
    /// Best parameters with reflection entries snapped to exactly `±1`.
    pub params: Array1<f64>,
    /// Objective at `params`, or `None` when no evaluated point had a computable score.
    pub score: Option<f64>,
    pub evaluations: usize,
    pub generations: usize,
    pub stopped_by_deadline: bool,
}

#[derive(Clone, Debug)]
struct Individual {
    x: Array1<f64>,
    sigma: Array1<f64>,
}

/// Minimization view of one evaluated point.
#[derive(Clone, Copy, Debug)]
struct Evaluation {
    value: f64,
    penalty: f64,
}

fn in_bounds(v: f64, bounds: (f64, f64)) -> bool {
    v >= bounds.0 && v <= bounds.1
}

fn constraint_penalty(x: &[f64], skew_len: usize, tolerance: f64) -> f64 {
    x[skew_len..]
        .iter()
        .map(|&d| d * d - 1.0)
        .filter(|h| h.abs() > tolerance)
        .map(|h| h * h)
        .sum()
}

fn evaluate<F, E>(
    objective: &F,
    x: &Array1<f64>,
    skew_len: usize,
    tolerance: f64,
) -> Result<(Evaluation, Option<f64>), E>
where
    F: Fn(&[f64]) -> Result<Option<f64>, E>,
{
    let owned;
    let slice = match x.as_slice() {
        Some(slice) => slice,
        None => {
            owned = x.to_vec();
            &owned
        }
    };
    let score = objective(slice)?.filter(|s| s.is_finite());
    let value = score.map_or(f64::INFINITY, |s| -s);
    Ok((
        Evaluation {
            value,
            penalty: constraint_penalty(slice, skew_len, tolerance),
        },
        score,
    ))
}

/// Ranks the population by bubble-sorting with stochastic comparisons.
fn stochastic_rank(evaluations: &[Evaluation], rng: &mut StdRng) -> Vec<usize> {
    let n = evaluations.len();
    let mut rank: Vec<usize> = (0..n).collect();
    for _ in 0..n {
        let mut swapped = false;
        for i in 0..n.saturating_sub(1) {
            let a = evaluations[rank[i]];
            let b = evaluations[rank[i + 1]];
            let both_feasible = a.penalty == 0.0 && b.penalty == 0.0;
            let out_of_order = if both_feasible || rng.gen_range(0.0..1.0) < RANKING_PROBABILITY {
                a.value > b.value
            } else {
                a.penalty > b.penalty
            };
            if out_of_order {
                rank.swap(i, i + 1);
                swapped = true;
            }
        }
        if !swapped {
            break;
        }
    }
    rank
}

/// Log-normal self-adaptive mutation with bounded resampling.
fn mutate(parent: &Individual, settings: &IsresSettings, rng: &mut StdRng) -> Individual {
    let n = parent.x.len() as f64;
    let tau_global = 1.0 / (2.0 * n).sqrt();
    let tau_local = 1.0 / (2.0 * n.sqrt()).sqrt();
    let global: f64 = tau_global * rng.sample::<f64, _>(StandardNormal);

    let trial_sigma = parent
        .sigma
        .mapv(|s| s * (global + tau_local * rng.sample::<f64, _>(StandardNormal)).exp());

    let (lo, hi) = settings.bounds;
    let mut x = parent.x.clone();
    for (j, xj) in x.iter_mut().enumerate() {
        let mut attempts = 0;
        *xj = loop {
            let candidate = parent.x[j] + trial_sigma[j] * rng.sample::<f64, _>(StandardNormal);
            attempts += 1;
            if in_bounds(candidate, settings.bounds) {
                break candidate;
            }
            if attempts == MAX_RESAMPLES {
                break candidate.clamp(lo, hi);
            }
        };
    }

    let sigma = &parent.sigma + &(SIGMA_SMOOTHING * (&trial_sigma - &parent.sigma));
    Individual { x, sigma }
}

fn next_generation(
    population: &[Individual],
    rank: &[usize],
    survivors: usize,
    settings: &IsresSettings,
    rng: &mut StdRng,
) -> Vec<Individual> {
    let parents: Vec<&Individual> = rank.iter().take(survivors).map(|&k| &population[k]).collect();
    let best = &parents[0].x;
    let mut offspring = Vec::with_capacity(population.len());
    for k in 0..population.len() {
        let parent = parents[k % survivors];
        if k + 1 < survivors {
            let candidate = &parent.x + &(DIFFERENTIAL_GAMMA * (best - &parents[k + 1].x));
            if candidate.iter().all(|&v| in_bounds(v, settings.bounds)) {
                offspring.push(Individual {
                    x: candidate,
                    sigma: parent.sigma.clone(),
                });
                continue;
            }
        }
        offspring.push(mutate(parent, settings, rng));
    }
    offspring
}

fn initial_population(
    num_factors: usize,
    population_size: usize,
    settings: &IsresSettings,
    rng: &mut StdRng,
) -> Vec<Individual> {
    let dim = parameter_count(num_factors);
    let (lo, hi) = settings.bounds;
    let sigma = Array1::from_elem(dim, (hi - lo) / (dim as f64).sqrt());
    let seed_config = SeedConfig {
        strategy: settings.seed_strategy,
        bounds: settings.bounds,
    };

    let mut population: Vec<Individual> = generate_rotation_seeds(num_factors, &seed_config)
        .into_iter()
        .take(population_size)
        .map(|x| Individual {
            x,
            sigma: sigma.clone(),
        })
        .collect();
    while population.len() < population_size {
        let x = Array1::from_shape_fn(dim, |_| rng.gen_range(lo..=hi));
        population.push(Individual {
            x,
            sigma: sigma.clone(),
        });
    }
    population
}

/// Maximizes `objective` over rotation parameters for `num_factors` factors.
///
/// `objective` returns `Ok(None)` for a candidate whose score is not computable; such candidates
/// rank as unattainable. An `Err` aborts the search and is returned unchanged.
pub fn maximize<F, E>(
    num_factors: usize,
    settings: &IsresSettings,
    objective: F,
) -> Result<SearchOutcome, E>
where
    F: Fn(&[f64]) -> Result<Option<f64>, E> + Sync,
    E: Send,
{
    let start = Instant::now();
    // A budget too large for the clock means no deadline.
    let deadline = start.checked_add(settings.max_time);
    let expired = || deadline.is_some_and(|end| Instant::now() >= end);
    let dim = parameter_count(num_factors);
    let skew_len = skew_parameter_count(num_factors);
    let tolerance = settings.constraint_tolerance;
    let population_size = (settings.population_factor * dim).max(2);
    let survivors = ((population_size as f64 * SURVIVOR_FRACTION).ceil() as usize).max(1);
    let mut rng = StdRng::seed_from_u64(settings.seed);

    let identity = identity_parameters(num_factors);
    let (identity_eval, identity_score) = evaluate(&objective, &identity, skew_len, tolerance)?;
    let mut best_params = identity;
    let mut best_value = identity_eval.value;
    let mut best_score = identity_score;
    let mut evaluations = 1;
    let mut generations = 0;
    let mut stopped_by_deadline = false;

    let mut population = initial_population(num_factors, population_size, settings, &mut rng);
    loop {
        if settings
            .max_generations
            .is_some_and(|cap| generations >= cap)
        {
            break;
        }
        if expired() {
            stopped_by_deadline = true;
            break;
        }

        let results: Vec<Option<(Evaluation, Option<f64>)>> = population
            .par_iter()
            .map(|individual| {
                if expired() {
                    return Ok(None);
                }
                evaluate(&objective, &individual.x, skew_len, tolerance).map(Some)
            })
            .collect::<Result<_, E>>()?;

        let complete = results.iter().all(Option::is_some);
        for (individual, result) in population.iter().zip(&results) {
            let Some((evaluation, score)) = result else {
                continue;
            };
            evaluations += 1;
            if evaluation.penalty == 0.0 && evaluation.value < best_value {
                best_value = evaluation.value;
                best_score = *score;
                best_params = individual.x.clone();
            }
        }
        if !complete {
            stopped_by_deadline = true;
            break;
        }
        generations += 1;
        log::debug!(
            "ISRES generation {}: best score {:?} after {} evaluations ({:.2?} elapsed)",
            generations,
            best_score,
            evaluations,
            start.elapsed()
        );

        let ranked: Vec<Evaluation> = results.iter().flatten().map(|(e, _)| *e).collect();
        let rank = stochastic_rank(&ranked, &mut rng);
        population = next_generation(&population, &rank, survivors, settings, &mut rng);
    }

    Ok(SearchOutcome {
        params: project_feasible(&best_params.to_vec(), num_factors),
        score: best_score,
        evaluations,
        generations,
        stopped_by_deadline,
    })
}
