//! Sanity checks run before any work starts

use super::schema::RunConfig;
use crate::quant::Backend;
use crate::{Error, Result};

impl RunConfig {
    /// Reject settings that cannot produce a run
    pub fn validate(&self) -> Result<()> {
        if self.device != "cpu" {
            return Err(Error::UnsupportedDevice(self.device.clone()));
        }
        self.backend.parse::<Backend>()?;

        if self.batch_size == 0 {
            return Err(invalid("batch_size must be at least 1"));
        }
        if self.eval_batch_size == 0 {
            return Err(invalid("eval_batch_size must be at least 1"));
        }
        if self.epochs < self.start_epoch {
            return Err(invalid(format!(
                "epochs ({}) is below start_epoch ({})",
                self.epochs, self.start_epoch
            )));
        }
        if self.lr_step_size == 0 {
            return Err(invalid("lr_step_size must be at least 1"));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(invalid(format!("lr must be positive, got {}", self.lr)));
        }
        if self.world_size == 0 {
            return Err(invalid("world_size must be at least 1"));
        }
        if self.print_freq == 0 {
            return Err(invalid("print_freq must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidConfig(message.into())
}
