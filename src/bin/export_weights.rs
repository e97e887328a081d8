//! Export adapted weights for microcontroller deployment
//!
//! Writes the backbone plus one head as float JSON and as a Q7 C header.
//!
//! Usage: cargo run --release --bin export_weights -- --model output/da_w --head 3

use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use burn::module::AutodiffModule;
use clap::Parser;

use embedded_atda::backend::{default_device, TrainingBackend};
use embedded_atda::model::export::{extract, write_c_header, write_json};
use embedded_atda::model::{HeadId, LossSpec, TriHeadClassifier, TriHeadConfig};

#[derive(Parser, Debug)]
#[command(name = "export_weights")]
#[command(about = "Export backbone + one head as JSON and a Q7 C header")]
struct Args {
    /// Checkpoint to export (.mpk, extension optional)
    #[arg(short, long, default_value = "output/da_w")]
    model: PathBuf,

    /// Output directory
    #[arg(short, long, default_value = "output/export")]
    output: PathBuf,

    /// Head to deploy (1, 2 or 3)
    #[arg(long, default_value = "3")]
    head: usize,

    #[arg(long, default_value = "10")]
    num_classes: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let head = args
        .head
        .checked_sub(1)
        .and_then(HeadId::from_index)
        .ok_or_else(|| anyhow!("--head must be 1, 2 or 3, got {}", args.head))?;

    println!("=== Weight Export ===");
    println!("Model: {}", args.model.display());
    println!("Head:  {}", head);
    println!();

    let classifier = TriHeadClassifier::<TrainingBackend>::load(
        &args.model,
        TriHeadConfig::adaptation().with_num_classes(args.num_classes),
        LossSpec::adaptation(),
        1e-4,
        1,
        0,
        default_device(),
    )?;
    let net = classifier.net().valid();
    let exported = extract(&net, head)?;

    fs::create_dir_all(&args.output)?;
    let json_path = args.output.join("weights.json");
    let header_path = args.output.join("weights.h");
    write_json(&exported, &json_path)?;
    write_c_header(&exported, &header_path)?;

    let params: usize = exported.tensors.iter().map(|t| t.values.len()).sum();
    println!("Exported {} tensors ({} parameters)", exported.tensors.len(), params);
    println!("  {}", json_path.display());
    println!("  {}", header_path.display());

    Ok(())
}
