use anyhow::{Context, Result};
use clap::Parser;
use emosense_train::{train, AugmentConfig, TrainConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "emosense-train", about = "Train the Emosense emotion network")]
struct Cli {
    /// Directory with `train/<emotion>/` and `test/<emotion>/` image folders
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
    /// Weights to continue from (ignored if the file does not exist)
    #[arg(long)]
    base_model: Option<PathBuf>,
    /// Where to write the trained weights
    #[arg(long)]
    output_model: Option<PathBuf>,
    #[arg(long, default_value_t = 50)]
    epochs: usize,
    #[arg(long, default_value_t = 32)]
    batch_size: usize,
    #[arg(long, default_value_t = 1e-4)]
    learning_rate: f64,
    /// Seed for shuffling, augmentation and weight initialisation
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Train on the images as-is
    #[arg(long)]
    no_augment: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let model_dir = emosense_core::default_model_dir();

    let mut config = TrainConfig::new(
        cli.data_dir,
        cli.base_model
            .unwrap_or_else(|| model_dir.join(emosense_core::BASE_MODEL_FILE)),
        cli.output_model
            .unwrap_or_else(|| model_dir.join(emosense_core::SERVING_MODEL_FILE)),
    );
    config.epochs = cli.epochs;
    config.batch_size = cli.batch_size;
    config.learning_rate = cli.learning_rate;
    config.seed = cli.seed;
    if cli.no_augment {
        config.augment = AugmentConfig::none();
    }

    let report = train(&config).context("training failed")?;

    for label in &report.missing_train_labels {
        println!("warning: no training folder for '{label}'");
    }
    match report.test {
        Some(m) => println!(
            "Test loss: {:.4}, test accuracy: {:.2}%",
            m.loss,
            m.accuracy * 100.0
        ),
        None => println!("No test data; model was not evaluated"),
    }
    println!("Model saved to {}", report.output_model.display());

    Ok(())
}
