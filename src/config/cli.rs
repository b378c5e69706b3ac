//! Command-line types

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::schema::RunConfig;

/// cuantizar: quantization-aware training and mobile export
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "cuantizar")]
#[command(author = "PAIML")]
#[command(version)]
#[command(about = "Quantization-aware training, post-training quantization and detection export")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Quantization-aware training, post-training quantization or evaluation
    Train(TrainArgs),

    /// Build the detection recipe and write the mobile artifact
    Export(ExportArgs),
}

/// Arguments for the train command
///
/// Every value flag is optional so that unset flags leave the config file alone.
#[derive(Parser, Debug, Clone, PartialEq, Default)]
pub struct TrainArgs {
    /// YAML or JSON run configuration
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Dataset root with train/ and val/
    #[arg(long)]
    pub data_path: Option<PathBuf>,

    /// Model name
    #[arg(long)]
    pub model: Option<String>,

    /// Quantization backend (fbgemm, qnnpack)
    #[arg(long)]
    pub backend: Option<String>,

    /// Device to run on
    #[arg(long)]
    pub device: Option<String>,

    /// Training batch size
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Evaluation batch size
    #[arg(long)]
    pub eval_batch_size: Option<usize>,

    /// Number of total epochs to run
    #[arg(long)]
    pub epochs: Option<usize>,

    /// Epochs before observers are frozen
    #[arg(long, alias = "num_observer_update_epochs")]
    pub num_observer_update_epochs: Option<usize>,

    /// Epochs before batch-norm statistics are frozen
    #[arg(long, alias = "num_batch_norm_update_epochs")]
    pub num_batch_norm_update_epochs: Option<usize>,

    /// Batches per worker used for post-training calibration
    #[arg(long, alias = "num_calibration_batches")]
    pub num_calibration_batches: Option<usize>,

    /// Number of data loading workers
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,

    /// Initial learning rate
    #[arg(long)]
    pub lr: Option<f32>,

    /// SGD momentum
    #[arg(long)]
    pub momentum: Option<f32>,

    /// Weight decay
    #[arg(long = "weight-decay", visible_alias = "wd")]
    pub weight_decay: Option<f32>,

    /// Decrease lr every step-size epochs
    #[arg(long)]
    pub lr_step_size: Option<usize>,

    /// Decrease lr by this factor every lr-step-size epochs
    #[arg(long)]
    pub lr_gamma: Option<f32>,

    /// Print frequency in steps
    #[arg(long)]
    pub print_freq: Option<usize>,

    /// Where to save checkpoints; an empty value disables saving
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<String>,

    /// Resume from checkpoint
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// Start epoch
    #[arg(long)]
    pub start_epoch: Option<usize>,

    /// Cache the dataset index for quicker initialization
    #[arg(long)]
    pub cache_dataset: bool,

    /// Use cross-process batch-norm statistics
    #[arg(long)]
    pub sync_bn: bool,

    /// Only evaluate pretrained quantized weights
    #[arg(long)]
    pub test_only: bool,

    /// Post-training quantize the pretrained model and evaluate it
    #[arg(long, alias = "post_training_quantize")]
    pub post_training_quantize: bool,

    /// Pretrained weights file
    #[arg(long)]
    pub weights: Option<PathBuf>,

    /// Random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of distributed processes
    #[arg(long)]
    pub world_size: Option<usize>,

    /// Url used to set up distributed training
    #[arg(long)]
    pub dist_url: Option<String>,

    /// Validate and print the configuration without running
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the export command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ExportArgs {
    /// Artifact path
    #[arg(short, long, default_value = crate::detection::DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Seed for the randomly initialised heads
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

/// Parse CLI arguments from a string slice (for testing)
pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}

/// Apply command-line overrides to a RunConfig
pub fn apply_overrides(config: &mut RunConfig, args: &TrainArgs) {
    if let Some(data_path) = &args.data_path {
        config.data_path = data_path.clone();
    }
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(backend) = &args.backend {
        config.backend = backend.clone();
    }
    if let Some(device) = &args.device {
        config.device = device.clone();
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(eval_batch_size) = args.eval_batch_size {
        config.eval_batch_size = eval_batch_size;
    }
    if let Some(epochs) = args.epochs {
        config.epochs = epochs;
    }
    if let Some(n) = args.num_observer_update_epochs {
        config.num_observer_update_epochs = n;
    }
    if let Some(n) = args.num_batch_norm_update_epochs {
        config.num_batch_norm_update_epochs = n;
    }
    if let Some(n) = args.num_calibration_batches {
        config.num_calibration_batches = n;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(lr) = args.lr {
        config.lr = lr;
    }
    if let Some(momentum) = args.momentum {
        config.momentum = momentum;
    }
    if let Some(weight_decay) = args.weight_decay {
        config.weight_decay = weight_decay;
    }
    if let Some(step) = args.lr_step_size {
        config.lr_step_size = step;
    }
    if let Some(gamma) = args.lr_gamma {
        config.lr_gamma = gamma;
    }
    if let Some(print_freq) = args.print_freq {
        config.print_freq = print_freq;
    }
    if let Some(output_dir) = &args.output_dir {
        config.output_dir = (!output_dir.is_empty()).then(|| PathBuf::from(output_dir));
    }
    if let Some(resume) = &args.resume {
        config.resume = Some(resume.clone());
    }
    if let Some(start_epoch) = args.start_epoch {
        config.start_epoch = start_epoch;
    }
    if let Some(weights) = &args.weights {
        config.weights = Some(weights.clone());
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(world_size) = args.world_size {
        config.world_size = world_size;
    }
    if let Some(dist_url) = &args.dist_url {
        config.dist_url = dist_url.clone();
    }
    // Switches only ever turn a setting on
    config.cache_dataset |= args.cache_dataset;
    config.sync_bn |= args.sync_bn;
    config.test_only |= args.test_only;
    config.post_training_quantize |= args.post_training_quantize;
    config.dry_run |= args.dry_run;
}
