//! cuantizar: quantization-aware training and mobile export
//!
//! Two procedures live in this crate:
//!
//! - `cuantizar train`: QAT, post-training quantization or evaluation of an
//!   image classifier, with data-parallel training and per-epoch checkpoints.
//! - `cuantizar export`: builds the Faster R-CNN detection recipe and writes a
//!   graph-captured artifact for the mobile runtime.
//!
//! # Example
//!
//! ```no_run
//! use cuantizar::config::RunConfig;
//! use cuantizar::train;
//!
//! let mut config = RunConfig::default();
//! config.data_path = "data/imagenette".into();
//! config.post_training_quantize = true;
//!
//! let outcome = train::run(config).unwrap();
//! println!("{outcome:?}");
//! ```

pub mod cli;
pub mod config;
pub mod data;
pub mod detection;
pub mod distributed;
mod error;
pub mod io;
pub mod models;
pub mod nn;
pub mod optim;
pub mod quant;
pub mod train;

pub use error::{Error, Result};
