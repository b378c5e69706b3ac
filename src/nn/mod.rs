//! Float building blocks shared by the classifier and detection models
//!
//! - `Linear` and `BatchNorm1d` layers with torch-compatible initialisation
//! - ReLU helpers
//! - Batched cross-entropy with top-k accuracy
//! - Named tensor records for state dicts

mod activation;
mod batch_norm;
mod linear;
mod loss;
mod state;

pub use activation::{relu, relu_backward};
pub use batch_norm::BatchNorm1d;
pub use linear::Linear;
pub use loss::{topk_correct, CrossEntropyLoss};
pub(crate) use state::require;
pub use state::{StateDict, TensorRecord};
