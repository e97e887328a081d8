//! Embedded ATDA CLI
//!
//! Builds MNIST-M, runs source pretraining plus tri-training adaptation, and
//! evaluates saved checkpoints.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use embedded_atda::backend::{backend_name, default_device, TrainingBackend};
use embedded_atda::config::AdaptationConfig;
use embedded_atda::dataset::{build_mnistm, load_mnist, load_mnistm, MnistmBuildConfig};
use embedded_atda::model::{FeatureBackboneClassifier, HeadId, LossSpec, TriHeadClassifier, TriHeadConfig};
use embedded_atda::training::{load_adaptation_model, pretrain_source, TriTrainingController};
use embedded_atda::utils::logging::{init_logging, LogConfig};
use embedded_atda::utils::metrics::EvaluationHead;
use embedded_atda::utils::{format_duration, format_number};

/// Embedded asymmetric tri-training for unsupervised domain adaptation
#[derive(Parser, Debug)]
#[command(name = "embedded_atda")]
#[command(version = "0.1.0")]
#[command(about = "MNIST -> MNIST-M domain adaptation with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false")]
    quiet: bool,

    /// Log level (trace, debug, info, warn, error); overrides -v/-q
    #[arg(long)]
    log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build MNIST-M from MNIST and a folder of background photographs
    BuildMnistm {
        /// Directory with the MNIST IDX files
        #[arg(long, default_value = "data/mnist")]
        mnist_dir: PathBuf,

        /// Directory with background images (e.g. BSDS500)
        #[arg(long, default_value = "data/BSR/BSDS500/data/images/train")]
        backgrounds_dir: PathBuf,

        /// Output directory for the MNIST-M IDX files
        #[arg(short, long, default_value = "data/mnistm")]
        output_dir: PathBuf,

        /// Random seed for patch selection
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Pretrain on MNIST (optionally) and adapt to MNIST-M
    Adapt {
        #[arg(long, default_value = "data/mnist")]
        mnist_dir: PathBuf,

        #[arg(long, default_value = "data/mnistm")]
        mnistm_dir: PathBuf,

        /// JSON configuration file; flags below override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Train on the source domain first instead of loading w.mpk
        #[arg(long)]
        train_fresh: bool,

        /// Write charts and pseudo-label previews
        #[arg(long)]
        plot: bool,

        #[arg(long)]
        n_boost: Option<usize>,

        #[arg(long)]
        label_threshold: Option<f64>,

        #[arg(long)]
        lr_source: Option<f64>,

        #[arg(long)]
        lr_target: Option<f64>,

        #[arg(long)]
        epoch_source: Option<usize>,

        /// Number of domain adaptation steps
        #[arg(long)]
        steps: Option<usize>,

        #[arg(short, long)]
        output_folder: Option<PathBuf>,

        #[arg(long)]
        seed: Option<u64>,

        /// Head reported as validation accuracy (head1, head2, head3, mean)
        #[arg(long)]
        evaluation_head: Option<EvaluationHead>,
    },

    /// Per-head accuracy of a checkpoint on the MNIST-M validation split
    Evaluate {
        /// Checkpoint (.mpk, extension optional)
        #[arg(short, long, default_value = "output/da_w")]
        model: PathBuf,

        #[arg(long, default_value = "data/mnistm")]
        mnistm_dir: PathBuf,

        #[arg(long, default_value = "10")]
        num_classes: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_flags(cli.verbose, cli.quiet, cli.log_level.as_deref());

    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::BuildMnistm {
            mnist_dir,
            backgrounds_dir,
            output_dir,
            seed,
        } => {
            cmd_build_mnistm(MnistmBuildConfig {
                mnist_dir,
                backgrounds_dir,
                output_dir,
                seed,
            })?;
        }

        Commands::Adapt {
            mnist_dir,
            mnistm_dir,
            config,
            train_fresh,
            plot,
            n_boost,
            label_threshold,
            lr_source,
            lr_target,
            epoch_source,
            steps,
            output_folder,
            seed,
            evaluation_head,
        } => {
            let mut cfg = match config {
                Some(path) => AdaptationConfig::load(&path)
                    .with_context(|| format!("reading config {}", path.display()))?,
                None => AdaptationConfig::default(),
            };
            cfg.train_fresh |= train_fresh;
            cfg.enable_plot |= plot;
            if let Some(v) = n_boost {
                cfg.n_boost = v;
            }
            if let Some(v) = label_threshold {
                cfg.label_threshold = v;
            }
            if let Some(v) = lr_source {
                cfg.lr_source = v;
            }
            if let Some(v) = lr_target {
                cfg.lr_target = v;
            }
            if let Some(v) = epoch_source {
                cfg.epoch_source = v;
            }
            if let Some(v) = steps {
                cfg.domain_adaptation_steps = v;
            }
            if let Some(v) = output_folder {
                cfg.output_folder = v;
            }
            if let Some(v) = seed {
                cfg.seed = v;
            }
            if let Some(v) = evaluation_head {
                cfg.evaluation_head = v;
            }
            cfg.validate()?;

            cmd_adapt(&cfg, &mnist_dir, &mnistm_dir)?;
        }

        Commands::Evaluate {
            model,
            mnistm_dir,
            num_classes,
        } => {
            cmd_evaluate(&model, &mnistm_dir, num_classes)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +--------------------------------------------------------------+
 |   Embedded Asymmetric Tri-Training (MNIST -> MNIST-M)        |
 |   Unsupervised domain adaptation with Burn + Rust            |
 +--------------------------------------------------------------+
  "#
        .green()
    );
}

fn cmd_build_mnistm(config: MnistmBuildConfig) -> Result<()> {
    info!("Building MNIST-M into {}", config.output_dir.display());
    let start = std::time::Instant::now();

    let (train, test) = build_mnistm(&config)?;

    println!();
    println!("{}", "MNIST-M ready".green().bold());
    println!("  Train images: {}", format_number(train));
    println!("  Test images:  {}", format_number(test));
    println!("  Output:       {}", config.output_dir.display());
    println!("  Took:         {}", format_duration(start.elapsed().as_secs_f64()));
    Ok(())
}

fn cmd_adapt(config: &AdaptationConfig, mnist_dir: &Path, mnistm_dir: &Path) -> Result<()> {
    let start = std::time::Instant::now();
    println!("  Backend: {}", backend_name().cyan());
    println!("  Output:  {}", config.output_folder.display());
    println!();

    std::fs::create_dir_all(&config.output_folder)?;
    config.save(&config.output_folder.join("config.json"))?;

    if config.train_fresh {
        println!("{}", "Pretraining on the source domain (MNIST)...".green().bold());
        let source = load_mnist(mnist_dir)?;
        let (_, report) = pretrain_source::<TrainingBackend>(&source, config, default_device())?;
        println!("  Source test accuracy: {}", report.test);
        println!();
    }

    let target = load_mnistm(mnistm_dir)?;
    let model = load_adaptation_model::<TrainingBackend>(config, default_device())?;

    println!(
        "{} {} steps, n_boost = {}, threshold = {}",
        "Adapting to MNIST-M:".green().bold(),
        config.executed_steps().len(),
        config.n_boost,
        config.label_threshold
    );

    let mut controller = TriTrainingController::new(model, config, &target)?;
    let report = controller.run()?;

    println!();
    println!("{}", "Adaptation complete".green().bold());
    if let Some(baseline) = &report.baseline {
        println!("  Source-only: {}", baseline);
    }
    if let Some(final_accuracy) = &report.final_accuracy {
        println!("  Adapted:     {}", final_accuracy);
    }
    if report.degenerate_steps() > 0 {
        println!(
            "  {} {} step(s) found no consensus pseudo-labels",
            "Warning:".yellow(),
            report.degenerate_steps()
        );
    }
    println!("  Weights:     {}.mpk", config.adapted_weights_path().display());
    println!("  Report:      {}", config.report_path().display());
    println!("  Took:        {}", format_duration(start.elapsed().as_secs_f64()));

    Ok(())
}

fn cmd_evaluate(model_path: &Path, mnistm_dir: &Path, num_classes: usize) -> Result<()> {
    let target = load_mnistm(mnistm_dir)?;
    let classifier = TriHeadClassifier::<TrainingBackend>::load(
        model_path,
        TriHeadConfig::adaptation().with_num_classes(num_classes),
        LossSpec::adaptation(),
        1e-4,
        64,
        0,
        default_device(),
    )?;

    let accuracy = classifier.evaluate(&target.validation, &target.validation_labels)?;

    println!("{}", "Target validation accuracy".green().bold());
    for head in HeadId::ALL {
        println!("  {}: {:.2}%", head, accuracy.head(head) * 100.0);
    }
    println!("  mean:  {:.2}%", accuracy.mean() * 100.0);
    Ok(())
}
