//! Synthetic count data with known ground truth.
//!
//! Counts are drawn from a gamma-Poisson mixture, i.e. a negative binomial
//! with mean `mu` and dispersion `alpha`.

use crate::data::{CountMatrix, SampleMetadata};
use crate::error::{FameError, Result};
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Gamma, Poisson};
use std::collections::HashMap;

/// Configuration of a two-group experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TwoGroupConfig {
    pub n_genes: usize,
    /// Total samples, split evenly into `control` and `treatment`.
    pub n_samples: usize,
    /// The first `n_differential` genes change between groups.
    pub n_differential: usize,
    /// Absolute log2 fold change of differential genes; signs alternate.
    pub log2_fold_change: f64,
    pub dispersion: f64,
    /// Typical mean count; per-gene means spread over a 4-fold range around it.
    pub base_mean: f64,
    /// Size factors drawn uniformly from `[1 - depth_spread, 1 + depth_spread]`.
    pub depth_spread: f64,
    pub seed: u64,
}

impl Default for TwoGroupConfig {
    fn default() -> Self {
        Self {
            n_genes: 100,
            n_samples: 20,
            n_differential: 10,
            log2_fold_change: 2.0,
            dispersion: 0.1,
            base_mean: 200.0,
            depth_spread: 0.0,
            seed: 42,
        }
    }
}

/// Simulated counts, phenotype table and truth.
#[derive(Debug, Clone)]
pub struct SimulatedData {
    pub counts: CountMatrix,
    pub metadata: SampleMetadata,
    /// Genes with a true effect.
    pub differential: Vec<String>,
    /// True log2 fold change of each differential gene, per unit of the
    /// predictor when it is continuous.
    pub log2_fold_changes: HashMap<String, f64>,
    pub size_factors: Vec<f64>,
}

impl SimulatedData {
    /// True log2 fold change, 0 for null genes.
    pub fn true_log2fc(&self, gene_id: &str) -> f64 {
        self.log2_fold_changes.get(gene_id).copied().unwrap_or(0.0)
    }
}

/// Negative binomial sampler over a seeded RNG.
struct NbSampler {
    rng: StdRng,
}

impl NbSampler {
    fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn draw(&mut self, mu: f64, alpha: f64) -> Result<u64> {
        if mu <= 0.0 {
            return Ok(0);
        }
        // shape 1/alpha, rate 1/(mu alpha)
        let gamma = Gamma::new(1.0 / alpha, 1.0 / (mu * alpha))
            .map_err(|e| FameError::InvalidParameter(format!("gamma({}, {}): {}", mu, alpha, e)))?;
        let lambda = gamma.sample(&mut self.rng);
        if lambda <= 0.0 {
            return Ok(0);
        }
        let poisson = Poisson::new(lambda)
            .map_err(|e| FameError::Numerical(format!("poisson({}): {}", lambda, e)))?;
        let draw = poisson.sample(&mut self.rng);
        Ok(draw as u64)
    }

    fn uniform(&mut self, low: f64, high: f64) -> f64 {
        if high > low {
            self.rng.gen_range(low..high)
        } else {
            low
        }
    }
}

fn gene_ids(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("gene{:04}", i)).collect()
}

fn sample_ids(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("S{:03}", i)).collect()
}

fn validate(dispersion: f64, base_mean: f64) -> Result<()> {
    if !(dispersion > 0.0 && dispersion.is_finite()) {
        return Err(FameError::InvalidParameter(format!(
            "dispersion must be positive, got {}",
            dispersion
        )));
    }
    if !(base_mean > 0.0 && base_mean.is_finite()) {
        return Err(FameError::InvalidParameter(format!(
            "base mean must be positive, got {}",
            base_mean
        )));
    }
    Ok(())
}

/// Simulate a two-group experiment with `n_differential` changed genes.
///
/// Null genes reuse one set of draws for both groups, shuffled across
/// samples, so the groups are exchangeable for them.
pub fn simulate_two_group(config: &TwoGroupConfig) -> Result<SimulatedData> {
    validate(config.dispersion, config.base_mean)?;
    if config.n_samples < 4 {
        return Err(FameError::InvalidParameter(
            "at least 4 samples are needed for two groups".to_string(),
        ));
    }
    let mut sampler = NbSampler::new(config.seed);
    let n = config.n_samples;
    let n_control = n / 2;
    let genes = gene_ids(config.n_genes);
    let samples = sample_ids(n);

    let spread = config.depth_spread.clamp(0.0, 0.9);
    let size_factors: Vec<f64> = (0..n)
        .map(|_| sampler.uniform(1.0 - spread, 1.0 + spread))
        .collect();

    let mut differential = Vec::new();
    let mut log2_fold_changes = HashMap::new();
    let mut rows = Vec::with_capacity(config.n_genes);

    for (g, gene) in genes.iter().enumerate() {
        let mean = config.base_mean * 2f64.powf(sampler.uniform(-1.0, 1.0));
        let row = if g < config.n_differential {
            let lfc = if g % 2 == 0 {
                config.log2_fold_change
            } else {
                -config.log2_fold_change
            };
            differential.push(gene.clone());
            log2_fold_changes.insert(gene.clone(), lfc);
            (0..n)
                .map(|j| {
                    let effect = if j < n_control { 1.0 } else { 2f64.powf(lfc) };
                    sampler.draw(mean * effect * size_factors[j], config.dispersion)
                })
                .collect::<Result<Vec<u64>>>()?
        } else {
            let mut draws = (0..n)
                .map(|_| sampler.draw(mean, config.dispersion))
                .collect::<Result<Vec<u64>>>()?;
            draws.shuffle(&mut sampler.rng);
            if spread > 0.0 {
                draws
                    .iter()
                    .zip(&size_factors)
                    .map(|(&c, &s)| (c as f64 * s).round() as u64)
                    .collect()
            } else {
                draws
            }
        };
        rows.push(row);
    }

    let counts = CountMatrix::from_rows(&rows, genes, samples.clone())?;
    let mut metadata = SampleMetadata::new(samples)?;
    metadata.add_categorical(
        "group",
        (0..n)
            .map(|j| Some(if j < n_control { "control" } else { "treatment" }.to_string()))
            .collect(),
    )?;

    Ok(SimulatedData {
        counts,
        metadata,
        differential,
        log2_fold_changes,
        size_factors,
    })
}

/// Configuration of an experiment with a continuous predictor (age) and a
/// two-level batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuousConfig {
    pub n_genes: usize,
    pub n_samples: usize,
    /// The first `n_differential` genes change with age.
    pub n_differential: usize,
    /// log2 change per unit of age.
    pub slope: f64,
    /// Ages are evenly spaced over this interval.
    pub age_range: (f64, f64),
    /// log2 shift of every gene in the second batch.
    pub batch_log2_effect: f64,
    pub dispersion: f64,
    pub base_mean: f64,
    pub seed: u64,
}

impl Default for ContinuousConfig {
    fn default() -> Self {
        Self {
            n_genes: 100,
            n_samples: 24,
            n_differential: 10,
            slope: 0.05,
            age_range: (20.0, 70.0),
            batch_log2_effect: 0.5,
            dispersion: 0.05,
            base_mean: 300.0,
            seed: 11,
        }
    }
}

/// Simulate log-linear age effects with a batch covariate.
///
/// Samples alternate between batches `b1` and `b2`, so batch is nearly
/// orthogonal to age. `log2_fold_changes` holds the per-year slope.
pub fn simulate_continuous(config: &ContinuousConfig) -> Result<SimulatedData> {
    validate(config.dispersion, config.base_mean)?;
    let n = config.n_samples;
    let (low, high) = config.age_range;
    if n < 4 || !(high > low) {
        return Err(FameError::InvalidParameter(
            "need at least 4 samples and a non-empty age range".to_string(),
        ));
    }
    let mut sampler = NbSampler::new(config.seed);
    let genes = gene_ids(config.n_genes);
    let samples = sample_ids(n);
    let ages: Vec<f64> = (0..n)
        .map(|j| low + (high - low) * j as f64 / (n - 1) as f64)
        .collect();
    let centre = (low + high) / 2.0;
    let batch_shift = |j: usize| if j % 2 == 1 { config.batch_log2_effect } else { 0.0 };

    let mut differential = Vec::new();
    let mut log2_fold_changes = HashMap::new();
    let mut rows = Vec::with_capacity(config.n_genes);
    for (g, gene) in genes.iter().enumerate() {
        let mean = config.base_mean * 2f64.powf(sampler.uniform(-1.0, 1.0));
        let slope = if g < config.n_differential {
            differential.push(gene.clone());
            log2_fold_changes.insert(gene.clone(), config.slope);
            config.slope
        } else {
            0.0
        };
        let row = (0..n)
            .map(|j| {
                let log2_mu = slope * (ages[j] - centre) + batch_shift(j);
                sampler.draw(mean * 2f64.powf(log2_mu), config.dispersion)
            })
            .collect::<Result<Vec<u64>>>()?;
        rows.push(row);
    }

    let counts = CountMatrix::from_rows(&rows, genes, samples.clone())?;
    let mut metadata = SampleMetadata::new(samples)?;
    metadata.add_continuous("age", ages.into_iter().map(Some).collect())?;
    metadata.add_categorical(
        "batch",
        (0..n)
            .map(|j| Some(if j % 2 == 0 { "b1" } else { "b2" }.to_string()))
            .collect(),
    )?;

    Ok(SimulatedData {
        counts,
        metadata,
        differential,
        log2_fold_changes,
        size_factors: vec![1.0; n],
    })
}

/// Configuration of an ordered-group (trajectory) experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryConfig {
    /// Ordered group labels, e.g. age classes.
    pub groups: Vec<String>,
    pub samples_per_group: usize,
    /// log2 mean profile across `groups`, one per pattern.
    pub patterns: Vec<Vec<f64>>,
    pub genes_per_pattern: usize,
    /// Genes with a flat profile.
    pub n_flat: usize,
    pub dispersion: f64,
    pub base_mean: f64,
    pub seed: u64,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            groups: ["young", "middle", "old"].iter().map(|s| s.to_string()).collect(),
            samples_per_group: 6,
            patterns: vec![vec![0.0, 1.5, 3.0], vec![3.0, 1.5, 0.0], vec![0.0, 3.0, 0.0]],
            genes_per_pattern: 20,
            n_flat: 0,
            dispersion: 0.02,
            base_mean: 300.0,
            seed: 7,
        }
    }
}

/// Simulated trajectories with the true pattern of every gene.
#[derive(Debug, Clone)]
pub struct SimulatedTrajectories {
    pub counts: CountMatrix,
    /// Carries `group` as an ordered categorical column.
    pub metadata: SampleMetadata,
    /// Pattern index per gene, `None` for flat genes.
    pub pattern_of: HashMap<String, Option<usize>>,
}

/// Simulate genes that follow a set of log2 profiles across ordered groups.
pub fn simulate_trajectories(config: &TrajectoryConfig) -> Result<SimulatedTrajectories> {
    validate(config.dispersion, config.base_mean)?;
    let n_groups = config.groups.len();
    if n_groups < 2 || config.samples_per_group == 0 {
        return Err(FameError::InvalidParameter(
            "need at least two groups with samples".to_string(),
        ));
    }
    if let Some(p) = config.patterns.iter().find(|p| p.len() != n_groups) {
        return Err(FameError::DimensionMismatch {
            expected: n_groups,
            actual: p.len(),
        });
    }

    let mut sampler = NbSampler::new(config.seed);
    let n = n_groups * config.samples_per_group;
    let n_genes = config.patterns.len() * config.genes_per_pattern + config.n_flat;
    let genes = gene_ids(n_genes);
    let samples = sample_ids(n);
    let flat = vec![0.0; n_groups];

    let mut pattern_of = HashMap::new();
    let mut rows = Vec::with_capacity(n_genes);
    for (g, gene) in genes.iter().enumerate() {
        let pattern = g / config.genes_per_pattern.max(1);
        let (profile, label) = if g < config.patterns.len() * config.genes_per_pattern {
            (&config.patterns[pattern], Some(pattern))
        } else {
            (&flat, None)
        };
        pattern_of.insert(gene.clone(), label);
        let mean = config.base_mean * 2f64.powf(sampler.uniform(-0.5, 0.5));
        let row = (0..n)
            .map(|j| {
                let level = profile[j / config.samples_per_group];
                sampler.draw(mean * 2f64.powf(level), config.dispersion)
            })
            .collect::<Result<Vec<u64>>>()?;
        rows.push(row);
    }

    let counts = CountMatrix::from_rows(&rows, genes, samples.clone())?;
    let mut metadata = SampleMetadata::new(samples)?;
    metadata.add_categorical(
        "group",
        (0..n)
            .map(|j| Some(config.groups[j / config.samples_per_group].clone()))
            .collect(),
    )?;
    let metadata = metadata.with_level_order("group", &config.groups)?;

    Ok(SimulatedTrajectories {
        counts,
        metadata,
        pattern_of,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_group_shape_and_truth() {
        let data = simulate_two_group(&TwoGroupConfig::default()).unwrap();
        assert_eq!(data.counts.n_genes(), 100);
        assert_eq!(data.counts.n_samples(), 20);
        assert_eq!(data.differential.len(), 10);
        assert_eq!(data.differential[0], "gene0001");
        assert_eq!(data.true_log2fc("gene0001"), 2.0);
        assert_eq!(data.true_log2fc("gene0002"), -2.0);
        assert_eq!(data.true_log2fc("gene0050"), 0.0);
        assert_eq!(data.metadata.levels("group").unwrap(), vec!["control", "treatment"]);
    }

    #[test]
    fn test_seed_reproducible() {
        let a = simulate_two_group(&TwoGroupConfig::default()).unwrap();
        let b = simulate_two_group(&TwoGroupConfig::default()).unwrap();
        assert_eq!(a.counts.to_dense(), b.counts.to_dense());
    }

    #[test]
    fn test_nb_mean_close_to_target() {
        let mut sampler = NbSampler::new(3);
        let draws: Vec<u64> = (0..4000).map(|_| sampler.draw(100.0, 0.1).unwrap()).collect();
        let mean = draws.iter().sum::<u64>() as f64 / draws.len() as f64;
        assert!((mean - 100.0).abs() < 5.0, "mean {}", mean);
        let var = draws.iter().map(|&d| (d as f64 - mean).powi(2)).sum::<f64>() / 3999.0;
        // mu + alpha mu^2 = 1100
        assert!(var > 850.0 && var < 1400.0, "variance {}", var);
    }

    #[test]
    fn test_trajectories_ordered_groups() {
        let sim = simulate_trajectories(&TrajectoryConfig::default()).unwrap();
        assert_eq!(sim.counts.n_genes(), 60);
        assert_eq!(sim.counts.n_samples(), 18);
        assert_eq!(
            sim.metadata.levels("group").unwrap(),
            vec!["young", "middle", "old"]
        );
        assert_eq!(sim.pattern_of["gene0001"], Some(0));
        assert_eq!(sim.pattern_of["gene0041"], Some(2));
    }

    #[test]
    fn test_continuous_ages_and_batches() {
        let data = simulate_continuous(&ContinuousConfig::default()).unwrap();
        assert_eq!(data.counts.n_samples(), 24);
        assert_eq!(data.differential.len(), 10);
        assert_eq!(data.true_log2fc("gene0003"), 0.05);
        assert_eq!(data.true_log2fc("gene0011"), 0.0);
        let ages = data.metadata.column("age").unwrap();
        assert_eq!(ages[0].as_continuous(), Some(20.0));
        assert_eq!(ages[23].as_continuous(), Some(70.0));
        assert_eq!(data.metadata.levels("batch").unwrap(), vec!["b1", "b2"]);
    }

    #[test]
    fn test_invalid_dispersion() {
        let config = TwoGroupConfig {
            dispersion: 0.0,
            ..Default::default()
        };
        assert!(simulate_two_group(&config).is_err());
    }
}
