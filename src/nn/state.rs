//! Named tensor records used by checkpoints and quantized model files.

use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered map of tensor name to record
pub type StateDict = BTreeMap<String, TensorRecord>;

/// Shape plus row-major data of a single f32 tensor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    /// Tensor dimensions
    pub shape: Vec<usize>,
    /// Row-major values
    pub data: Vec<f32>,
}

impl TensorRecord {
    /// Record a 1-D array
    pub fn from_array1(array: &Array1<f32>) -> Self {
        Self {
            shape: vec![array.len()],
            data: array.to_vec(),
        }
    }

    /// Record a 2-D array
    pub fn from_array2(array: &Array2<f32>) -> Self {
        Self {
            shape: array.shape().to_vec(),
            data: array.iter().copied().collect(),
        }
    }

    /// Record an n-D array
    pub fn from_arrayd(array: &ArrayD<f32>) -> Self {
        Self {
            shape: array.shape().to_vec(),
            data: array.iter().copied().collect(),
        }
    }

    /// Record a scalar
    pub fn scalar(value: f32) -> Self {
        Self {
            shape: vec![],
            data: vec![value],
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the record holds no elements
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Convert to a 1-D array, checking the expected length
    pub fn to_array1(&self, name: &str, len: usize) -> Result<Array1<f32>> {
        if self.shape != [len] {
            return Err(Error::ShapeMismatch {
                name: name.to_string(),
                expected: vec![len],
                actual: self.shape.clone(),
            });
        }
        Ok(Array1::from_vec(self.data.clone()))
    }

    /// Convert to a 2-D array, checking the expected shape
    pub fn to_array2(&self, name: &str, rows: usize, cols: usize) -> Result<Array2<f32>> {
        let mismatch = || Error::ShapeMismatch {
            name: name.to_string(),
            expected: vec![rows, cols],
            actual: self.shape.clone(),
        };
        if self.shape != [rows, cols] {
            return Err(mismatch());
        }
        Array2::from_shape_vec((rows, cols), self.data.clone()).map_err(|_| mismatch())
    }

    /// Convert to an n-D array with the recorded shape
    pub fn to_arrayd(&self, name: &str) -> Result<ArrayD<f32>> {
        ArrayD::from_shape_vec(IxDyn(&self.shape), self.data.clone()).map_err(|_| {
            Error::ShapeMismatch {
                name: name.to_string(),
                expected: self.shape.clone(),
                actual: vec![self.data.len()],
            }
        })
    }

    /// Read back a scalar
    pub fn to_scalar(&self, name: &str) -> Result<f32> {
        match self.data.as_slice() {
            [value] => Ok(*value),
            _ => Err(Error::ShapeMismatch {
                name: name.to_string(),
                expected: vec![],
                actual: self.shape.clone(),
            }),
        }
    }
}

/// Look up a required entry
pub(crate) fn require<'a>(state: &'a StateDict, name: &str) -> Result<&'a TensorRecord> {
    state
        .get(name)
        .ok_or_else(|| Error::MissingTensor(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_array2_record_keeps_row_major_order() {
        let a = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let record = TensorRecord::from_array2(&a);
        assert_eq!(record.shape, vec![2, 3]);
        assert_eq!(record.data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(record.to_array2("w", 2, 3).unwrap(), a);
    }

    #[test]
    fn test_wrong_shape_is_reported() {
        let record = TensorRecord::from_array1(&array![1.0, 2.0]);
        let err = record.to_array1("bias", 3).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_scalar_record() {
        let record = TensorRecord::scalar(0.5);
        assert!(record.shape.is_empty());
        assert_eq!(record.to_scalar("s").unwrap(), 0.5);
    }

    #[test]
    fn test_require_missing_entry() {
        let state = StateDict::new();
        assert!(matches!(
            require(&state, "features.0.linear.weight"),
            Err(Error::MissingTensor(_))
        ));
    }
}
