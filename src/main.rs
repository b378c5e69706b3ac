//! cuantizar CLI
//!
//! # Usage
//!
//! ```bash
//! # Quantization-aware training
//! cuantizar train --data-path ./imagenette --epochs 10 --output-dir ./checkpoints
//!
//! # Post-training quantization
//! cuantizar train --data-path ./imagenette --post-training-quantize --backend fbgemm
//!
//! # Evaluate quantized weights
//! cuantizar train --test-only --weights quantized_post_train_model.pth
//!
//! # Export the detection recipe for the mobile runtime
//! cuantizar export --output app/src/main/assets/frcnn.pt
//! ```

use clap::Parser;
use cuantizar::cli::{run_command, Cli};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
