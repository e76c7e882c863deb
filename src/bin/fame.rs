//! fame - FAMe study transcriptome analysis CLI
//!
//! Differential expression, enrichment and trajectory clustering from
//! count and phenotype tables.

use clap::{Parser, Subcommand};
use fame_omics::annotate::GeneAnnotator;
use fame_omics::data::{CountMatrix, SampleMetadata};
use fame_omics::enrich::GeneSetCollection;
use fame_omics::error::{FameError, Result};
use fame_omics::merge::{merge_cohorts, Cohort};
use fame_omics::pipeline::{run_analysis, AnalysisConfig};
use fame_omics::simulate::{simulate_two_group, TwoGroupConfig};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// FAMe transcriptome analysis
#[derive(Parser)]
#[command(name = "fame")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an analysis from a YAML configuration file
    Run {
        /// Path to analysis configuration YAML
        #[arg(long)]
        config: PathBuf,

        /// Path to count matrix TSV
        #[arg(short = 'c', long)]
        counts: PathBuf,

        /// Path to phenotype TSV
        #[arg(short, long)]
        phenotype: PathBuf,

        /// Output directory
        #[arg(short, long)]
        out: PathBuf,

        /// Annotation TSV, overrides the configured path
        #[arg(long)]
        annotation: Option<PathBuf>,

        /// Gene-set GMT or TSV, overrides the configured path
        #[arg(long)]
        gene_sets: Option<PathBuf>,

        /// Skip SVG figures
        #[arg(long)]
        no_figures: bool,
    },

    /// Merge cohorts (count TSV and phenotype TSV pairs) into one dataset
    Merge {
        /// Count matrix TSVs, one per cohort
        #[arg(short = 'c', long, required = true, num_args = 1..)]
        counts: Vec<PathBuf>,

        /// Phenotype TSVs, in the same order as the count files
        #[arg(short, long, required = true, num_args = 1..)]
        phenotype: Vec<PathBuf>,

        /// Add a column holding the cohort name (the count file stem)
        #[arg(long)]
        batch_column: Option<String>,

        /// Output path for merged counts
        #[arg(long)]
        out_counts: PathBuf,

        /// Output path for merged phenotypes
        #[arg(long)]
        out_phenotype: PathBuf,
    },

    /// Write an example analysis configuration
    ExampleConfig {
        /// Output path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Simulate a two-group dataset with known differential genes
    Simulate {
        /// Output directory
        #[arg(short, long)]
        out: PathBuf,

        #[arg(long, default_value = "1000")]
        genes: usize,

        #[arg(long, default_value = "20")]
        samples: usize,

        #[arg(long, default_value = "50")]
        differential: usize,

        /// Absolute log2 fold change of differential genes
        #[arg(long, default_value = "2.0")]
        lfc: f64,

        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            counts,
            phenotype,
            out,
            annotation,
            gene_sets,
            no_figures,
        } => cmd_run(
            &config,
            &counts,
            &phenotype,
            &out,
            annotation.as_deref(),
            gene_sets.as_deref(),
            no_figures,
        ),

        Commands::Merge {
            counts,
            phenotype,
            batch_column,
            out_counts,
            out_phenotype,
        } => cmd_merge(
            &counts,
            &phenotype,
            batch_column.as_deref(),
            &out_counts,
            &out_phenotype,
        ),

        Commands::ExampleConfig { output } => cmd_example_config(output.as_deref()),

        Commands::Simulate {
            out,
            genes,
            samples,
            differential,
            lfc,
            seed,
        } => cmd_simulate(
            &out,
            &TwoGroupConfig {
                n_genes: genes,
                n_samples: samples,
                n_differential: differential,
                log2_fold_change: lfc,
                seed,
                ..TwoGroupConfig::default()
            },
        ),
    }
}

fn cmd_run(
    config_path: &Path,
    counts_path: &Path,
    phenotype_path: &Path,
    out: &Path,
    annotation: Option<&Path>,
    gene_sets: Option<&Path>,
    no_figures: bool,
) -> Result<()> {
    let mut config = AnalysisConfig::from_path(config_path)?;
    if no_figures {
        config.figures = false;
    }

    let counts = CountMatrix::from_tsv(counts_path)?;
    let metadata = SampleMetadata::from_tsv(phenotype_path)?;
    info!(
        genes = counts.n_genes(),
        samples = counts.n_samples(),
        "inputs loaded"
    );

    let annotator = match annotation.or(config.annotation.as_ref().map(|a| a.path.as_path())) {
        Some(path) => {
            let options = config
                .annotation
                .as_ref()
                .map(|a| a.options.clone())
                .unwrap_or_default();
            Some(GeneAnnotator::from_tsv(path, &options)?)
        }
        None => None,
    };
    let collection = match gene_sets.or(config.enrichment.gene_sets.as_deref()) {
        Some(path) => Some(GeneSetCollection::from_path(path)?),
        None => None,
    };

    let output = run_analysis(
        &counts,
        &metadata,
        &config,
        annotator.as_ref(),
        collection.as_ref(),
    )?;
    output.write_to_dir(out, &config)?;

    for outcome in &output.outcomes {
        match &outcome.result {
            Ok(set) => eprint!("{}", set.summary(config.alpha)),
            Err(e) => eprintln!("Predictor: {}\n  failed: {}", outcome.label(), e),
        }
    }
    Ok(())
}

fn cmd_merge(
    counts: &[PathBuf],
    phenotype: &[PathBuf],
    batch_column: Option<&str>,
    out_counts: &Path,
    out_phenotype: &Path,
) -> Result<()> {
    if counts.len() != phenotype.len() {
        return Err(FameError::DimensionMismatch {
            expected: counts.len(),
            actual: phenotype.len(),
        });
    }
    let cohorts = counts
        .iter()
        .zip(phenotype)
        .map(|(c, p)| {
            let name = c
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| c.display().to_string());
            Ok(Cohort::new(
                &name,
                CountMatrix::from_tsv(c)?,
                SampleMetadata::from_tsv(p)?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    let merged = merge_cohorts(&cohorts, batch_column)?;
    merged.counts.to_tsv(out_counts)?;
    merged.metadata.to_tsv(out_phenotype)?;
    info!(
        cohorts = cohorts.len(),
        genes = merged.counts.n_genes(),
        samples = merged.counts.n_samples(),
        "cohorts merged"
    );
    Ok(())
}

fn cmd_example_config(output: Option<&Path>) -> Result<()> {
    let yaml = AnalysisConfig::example().to_yaml()?;
    match output {
        Some(path) => {
            std::fs::write(path, yaml)?;
            info!(path = %path.display(), "example configuration written");
        }
        None => print!("{}", yaml),
    }
    Ok(())
}

fn cmd_simulate(out: &Path, config: &TwoGroupConfig) -> Result<()> {
    let data = simulate_two_group(config)?;
    std::fs::create_dir_all(out)?;
    data.counts.to_tsv(out.join("counts.tsv"))?;
    data.metadata.to_tsv(out.join("phenotype.tsv"))?;
    std::fs::write(out.join("differential.txt"), data.differential.join("\n") + "\n")?;
    info!(
        genes = config.n_genes,
        samples = config.n_samples,
        differential = data.differential.len(),
        dir = %out.display(),
        "simulated dataset written"
    );
    Ok(())
}
