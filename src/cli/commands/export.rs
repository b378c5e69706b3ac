//! Export command implementation

use tracing::info;

use crate::config::ExportArgs;
use crate::detection::{export_detection_model, DetectionConfig};
use crate::Result;

pub fn run_export(args: ExportArgs) -> Result<()> {
    let summary = export_detection_model(&DetectionConfig::default(), args.seed, &args.output)?;
    info!(
        "Wrote {} ({} tensors, {} parameters)",
        summary.path.display(),
        summary.num_tensors,
        summary.num_parameters
    );
    Ok(())
}
