//! Checkpoint and artifact persistence
//!
//! All files are JSON written atomically: the payload goes to a sibling
//! temporary file which is then renamed over the destination, so readers
//! never observe a half-written checkpoint.

mod checkpoint;
mod save;

pub use checkpoint::{
    epoch_checkpoint_path, latest_checkpoint_path, load_checkpoint, Checkpoint,
    LATEST_CHECKPOINT, PTQ_ARTIFACT,
};
pub use save::{read_json, write_json_atomic};
