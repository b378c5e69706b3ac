//! SafeTensors persistence for float classifier weights.

use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;
use std::collections::HashMap;
use std::path::Path;

use super::classifier::FloatClassifier;
use crate::nn::{StateDict, TensorRecord};
use crate::{Error, Result};

/// Decode every F32 tensor of a SafeTensors buffer
pub fn read_float_tensors(bytes: &[u8]) -> Result<StateDict> {
    let tensors = SafeTensors::deserialize(bytes)?;
    let mut state = StateDict::new();
    for (name, view) in tensors.tensors() {
        if view.dtype() != Dtype::F32 {
            tracing::debug!(tensor = %name, dtype = ?view.dtype(), "skipping non-f32 tensor");
            continue;
        }
        let data: Vec<f32> = view
            .data()
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        state.insert(
            name,
            TensorRecord {
                shape: view.shape().to_vec(),
                data,
            },
        );
    }
    Ok(state)
}

/// Serialize named records (plus metadata) into a SafeTensors buffer
pub(crate) fn serialize_records(
    records: &[(String, &TensorRecord)],
    metadata: HashMap<String, String>,
) -> Result<Vec<u8>> {
    let bytes: Vec<(&str, &[u8], &[usize])> = records
        .iter()
        .map(|(name, record)| {
            (
                name.as_str(),
                bytemuck::cast_slice::<f32, u8>(&record.data),
                record.shape.as_slice(),
            )
        })
        .collect();

    let mut views = Vec::with_capacity(bytes.len());
    for (name, data, shape) in bytes {
        views.push((name, TensorView::new(Dtype::F32, shape.to_vec(), data)?));
    }
    Ok(safetensors::serialize(views, Some(metadata))?)
}

/// Write the model's float weights
pub fn save_weights(model: &FloatClassifier, path: impl AsRef<Path>) -> Result<()> {
    let state = model.state_dict();
    let records: Vec<(String, &TensorRecord)> =
        state.iter().map(|(k, v)| (k.clone(), v)).collect();

    let mut metadata = HashMap::new();
    metadata.insert("arch".to_string(), model.arch.clone());
    metadata.insert("image_size".to_string(), model.image_size.to_string());

    let bytes = serialize_records(&records, metadata)?;
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Load pretrained float weights into `model`
pub fn load_weights(model: &mut FloatClassifier, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read weights {}: {e}", path.display()),
        ))
    })?;
    let state = read_float_tensors(&bytes)?;
    model.load_state_dict(&state)
}
