// ========================================================================================
//
//                      The command-line front end of interpfa
//
// ========================================================================================
//
// Reads factor solutions and priors from CSV files, hands them to the study store, and
// prints JSON reports. The binary owns no numerical logic: every index, rotation and
// tournament lives in the library. Solutions are fitted elsewhere and served through a
// `PrecomputedExtractor`.

use clap::{Args, CommandFactory, Parser, Subcommand};
use interpfa::catalog::ObliqueRotation;
use interpfa::config::RotationConfig;
use interpfa::indices::prior::PriorMatrix;
use interpfa::study::io::{
    LabeledMatrix, read_matrix, read_optional_matrix, read_vector, write_optional_matrix,
};
use interpfa::study::model::default_names;
use interpfa::study::report::DEFAULT_RADII;
use interpfa::study::store::{ModelSelection, parse_procedure, parse_rotation};
use interpfa::study::{
    Dataset, FactorSolution, PrecomputedExtractor, RotationMethod, SamplingAdequacy, Study,
};
use serde::Serialize;
use std::error::Error;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

// ========================================================================================
//                         Command-line interface definition
// ========================================================================================

#[derive(Parser)]
#[command(
    name = "interpfa",
    version,
    about = "Prior-guided factor rotation and interpretability indices",
    long_about = "Rotates exploratory factor solutions toward the structure a prior expects, \
                 and scores solutions with agreement, horizontal, overall and composite indices."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Inputs shared by every command that builds a study.
#[derive(Args)]
struct StudyArgs {
    /// CSV of unrotated loadings (variables by factors); a `variable` column names the rows
    loadings: PathBuf,

    /// CSV prior matrix; `NA` or empty cells are unconstrained pairs
    #[arg(long)]
    prior: Option<PathBuf>,

    /// CSV of item embeddings (one row per variable). Without a prior, the prior is derived
    /// from these.
    #[arg(long)]
    embeddings: Option<PathBuf>,

    /// Single-column CSV of per-variable scaling (standard deviations). Defaults to unit scale.
    #[arg(long)]
    scaling: Option<PathBuf>,

    /// Factor correlation matrix, required for oblique rotations
    #[arg(long)]
    phi: Option<PathBuf>,

    /// JSON file with KMO and Bartlett statistics to include in the report
    #[arg(long)]
    adequacy: Option<PathBuf>,

    /// Number of observations behind the solution
    #[arg(long, default_value = "0")]
    n_obs: usize,

    /// Write the JSON report here instead of standard output
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the rotation tournament on a solution and report the winner
    #[command(about = "Rotate loadings by an interpretability index (outputs: JSON report)")]
    Rotate {
        #[command(flatten)]
        study: StudyArgs,

        /// TOML rotation config; flags below override its values
        #[arg(long)]
        config: Option<PathBuf>,

        /// Procedure: priorimax, interpmax or composite
        #[arg(long)]
        procedure: Option<String>,

        /// Wall-clock budget of the free-form search in seconds
        #[arg(long)]
        max_time: Option<f64>,

        /// Seed of the free-form search
        #[arg(long)]
        seed: Option<u64>,

        /// Skip the free-form search
        #[arg(long)]
        no_search: bool,
    },

    /// Score a solution without running the tournament
    #[command(about = "Compute interpretability indices (outputs: JSON report)")]
    Indices {
        #[command(flatten)]
        study: StudyArgs,

        /// Rotation applied before scoring: none, a catalog rotation, or an oblique rotation
        /// whose solution is given by --phi
        #[arg(long, default_value = "none")]
        rotation: String,

        /// Procedure whose index ranks the solution: priorimax, interpmax or composite
        #[arg(long, default_value = "priorimax")]
        procedure: String,

        /// Also report the V/H point and isoquants (needs --embeddings)
        #[arg(long)]
        vh: bool,
    },

    /// Build a prior that expects items in the same group to be related
    #[command(about = "Generate a grouping prior (outputs: CSV)")]
    GrouperPrior {
        /// Number of variables
        #[arg(long)]
        size: usize,

        /// Groups of 1-based item indices, e.g. "1,2,3;4,5"
        #[arg(long)]
        groups: String,

        /// Write the CSV here instead of standard output
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Write the default rotation config as TOML
    #[command(about = "Write a rotation config template (outputs: rotation.toml)")]
    Config {
        #[arg(default_value = "rotation.toml")]
        path: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Rotate {
            study,
            config,
            procedure,
            max_time,
            seed,
            no_search,
        }) => run_rotate(study, config, procedure, max_time, seed, no_search),
        Some(Commands::Indices {
            study,
            rotation,
            procedure,
            vh,
        }) => run_indices(study, &rotation, &procedure, vh),
        Some(Commands::GrouperPrior {
            size,
            groups,
            output,
        }) => run_grouper_prior(size, &groups, output),
        Some(Commands::Config { path }) => run_config(&path),
        None => Cli::command().print_help().map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

// ========================================================================================
//                                  Commands
// ========================================================================================

const MODEL_NAME: &str = "solution";

fn run_rotate(
    args: StudyArgs,
    config_path: Option<PathBuf>,
    procedure: Option<String>,
    max_time: Option<f64>,
    seed: Option<u64>,
    no_search: bool,
) -> Result<(), Box<dyn Error>> {
    let mut config = match &config_path {
        Some(path) => RotationConfig::load(&path.to_string_lossy())?,
        None => RotationConfig::default(),
    };
    if let Some(name) = procedure {
        config.objective = parse_procedure(&name)?;
    }
    if let Some(secs) = max_time {
        config.max_time_secs = secs;
    }
    if let Some(seed) = seed {
        config.seed = seed;
    }
    if no_search {
        config.search_enabled = false;
    }

    let (mut study, extractor, n_factors) = load_study(&args, None)?;
    let objective = config.objective;
    let outcome = study
        .fit_model(
            MODEL_NAME,
            &extractor,
            n_factors,
            RotationMethod::IndexDriven(objective),
            &config,
        )?
        .ok_or("the index-driven fit produced no tournament outcome")?;

    #[derive(Serialize)]
    struct RotateReport {
        procedure: &'static str,
        family_scores: [Option<f64>; 3],
        search_evaluations: Option<usize>,
        search_generations: Option<usize>,
        summary: interpfa::study::ModelSummary,
    }
    let report = RotateReport {
        procedure: objective.procedure_name(),
        family_scores: outcome.family_scores(),
        search_evaluations: outcome.free_form.as_ref().map(|f| f.evaluations),
        search_generations: outcome.free_form.as_ref().map(|f| f.generations),
        summary: study.summarize_model(MODEL_NAME, objective, true)?,
    };
    write_json(&report, args.output.as_deref())
}

fn run_indices(
    args: StudyArgs,
    rotation: &str,
    procedure: &str,
    vh: bool,
) -> Result<(), Box<dyn Error>> {
    let method = parse_rotation(rotation)?;
    let objective = parse_procedure(procedure)?;
    let oblique = match method {
        RotationMethod::Oblique(kind) => Some(kind),
        RotationMethod::IndexDriven(_) => {
            return Err(format!(
                "'{rotation}' runs the rotation tournament; use the rotate command instead"
            )
            .into());
        }
        _ => None,
    };

    let (mut study, extractor, n_factors) = load_study(&args, oblique)?;
    let config = RotationConfig {
        search_enabled: false,
        ..RotationConfig::default()
    };
    study.fit_model(MODEL_NAME, &extractor, n_factors, method, &config)?;

    #[derive(Serialize)]
    struct IndicesReport {
        summary: interpfa::study::ModelSummary,
        analysis: Vec<interpfa::study::VariableAnalysis>,
        #[serde(skip_serializing_if = "Option::is_none")]
        vh_plot: Option<interpfa::study::report::VhPlot>,
    }
    let report = IndicesReport {
        summary: study.summarize_model(MODEL_NAME, objective, true)?,
        analysis: study.analyze_model(MODEL_NAME, true)?,
        vh_plot: if vh {
            Some(study.vh_plot(&ModelSelection::All, &DEFAULT_RADII)?)
        } else {
            None
        },
    };
    write_json(&report, args.output.as_deref())
}

fn run_grouper_prior(
    size: usize,
    groups: &str,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let groupings = parse_groups(groups)?;
    let prior = PriorMatrix::grouper(size, &groupings)?;
    let names = default_names(size);
    let cells = prior.to_cells();
    match output {
        Some(path) => {
            let file = BufWriter::new(fs::File::create(&path)?);
            write_optional_matrix(file, &names, Some(&names), cells.view())?;
            log::info!("Prior written to {}", path.display());
        }
        None => write_optional_matrix(io::stdout().lock(), &names, Some(&names), cells.view())?,
    }
    Ok(())
}

fn run_config(path: &Path) -> Result<(), Box<dyn Error>> {
    RotationConfig::default().save(&path.to_string_lossy())?;
    log::info!("Default rotation config written to {}", path.display());
    Ok(())
}

// ========================================================================================
//                                   Helpers
// ========================================================================================

/// Parses `"1,2,3;4,5"` into 1-based groups.
fn parse_groups(text: &str) -> Result<Vec<Vec<usize>>, Box<dyn Error>> {
    let mut groups = Vec::new();
    for group in text.split(';').map(str::trim).filter(|g| !g.is_empty()) {
        let mut items = Vec::new();
        for item in group.split(',').map(str::trim) {
            let index = item
                .parse::<usize>()
                .map_err(|e| format!("invalid item '{item}' in group '{group}': {e}"))?;
            items.push(index);
        }
        groups.push(items);
    }
    Ok(groups)
}

/// Builds the study and an extractor serving the loadings (with `phi` for oblique solutions).
/// Also returns the number of factors.
fn load_study(
    args: &StudyArgs,
    oblique: Option<ObliqueRotation>,
) -> Result<(Study, PrecomputedExtractor, usize), Box<dyn Error>> {
    let LabeledMatrix {
        row_names,
        values: loadings,
        ..
    } = read_matrix(&args.loadings)?;
    let (n_variables, n_factors) = loadings.dim();
    log::info!(
        "Loaded {} variables and {} factors from {}",
        n_variables,
        n_factors,
        args.loadings.display()
    );

    let scaling = args.scaling.as_deref().map(read_vector).transpose()?;
    let dataset = Dataset::from_correlation(
        row_names.unwrap_or_default(),
        n_variables,
        scaling,
        args.n_obs,
    )?;
    let embeddings = args
        .embeddings
        .as_deref()
        .map(|path| read_matrix(path).map(|m| m.values))
        .transpose()?;

    let mut study = match (&args.prior, embeddings) {
        (Some(path), embeddings) => {
            let cells = read_optional_matrix(path)?.values;
            let study = Study::new(dataset, PriorMatrix::from_cells(cells.view())?)?;
            match embeddings {
                Some(e) => study.with_embeddings(e)?,
                None => study,
            }
        }
        (None, Some(embeddings)) => Study::semantic(dataset, embeddings)?,
        (None, None) => return Err("either --prior or --embeddings is required".into()),
    };
    if let Some(path) = &args.adequacy {
        let adequacy: SamplingAdequacy = serde_json::from_str(&fs::read_to_string(path)?)?;
        study = study.with_adequacy(adequacy);
    }

    let solution = match oblique {
        Some(kind) => {
            let phi_path = args
                .phi
                .as_deref()
                .ok_or_else(|| format!("the oblique rotation '{kind}' needs --phi"))?;
            let phi = read_matrix(phi_path)?.values;
            FactorSolution::oblique(loadings, phi)?
        }
        None => FactorSolution::orthogonal(loadings),
    };
    let extractor = PrecomputedExtractor::new().with_solution(oblique, solution);
    Ok((study, extractor, n_factors))
}

fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<(), Box<dyn Error>> {
    match output {
        Some(path) => {
            let mut file = BufWriter::new(fs::File::create(path)?);
            serde_json::to_writer_pretty(&mut file, value)?;
            file.write_all(b"\n")?;
            log::info!("Report written to {}", path.display());
        }
        None => {
            let mut stdout = io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, value)?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}
