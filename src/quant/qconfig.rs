//! Per-backend observer recipes for PTQ and QAT.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::calibration::{CalibrationMethod, Granularity, Observer};
use super::fake_quantize::FakeQuantize;
use super::qparams::QuantRange;
use crate::Error;

/// Averaging constant of the moving-average observers
pub const MOVING_AVERAGE_CONSTANT: f32 = 0.01;

/// Percentiles used in place of a histogram observer
pub const PERCENTILE_BOUNDS: (f32, f32) = (0.001, 99.999);

/// Quantized kernel family the integer model targets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// x86 server kernels: per-channel weights, 7-bit activations
    Fbgemm,
    /// Mobile kernels: per-tensor weights, full 8-bit activations
    #[default]
    Qnnpack,
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fbgemm" => Ok(Self::Fbgemm),
            "qnnpack" => Ok(Self::Qnnpack),
            _ => Err(Error::UnknownBackend(s.to_string())),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fbgemm => write!(f, "fbgemm"),
            Self::Qnnpack => write!(f, "qnnpack"),
        }
    }
}

/// How to build one observer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObserverSpec {
    pub method: CalibrationMethod,
    pub granularity: Granularity,
    pub range: QuantRange,
}

impl ObserverSpec {
    /// Instantiate a fresh observer
    pub fn build(&self) -> Observer {
        let observer = Observer::new(self.method.clone(), self.range);
        match self.granularity {
            Granularity::PerTensor => observer,
            Granularity::PerChannel => observer.per_channel(),
        }
    }

    /// Instantiate a fake-quantize module around a fresh observer
    pub fn build_fake_quant(&self) -> FakeQuantize {
        FakeQuantize::new(self.build())
    }
}

/// Activation and weight observer recipes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QConfig {
    pub activation: ObserverSpec,
    pub weight: ObserverSpec,
}

impl QConfig {
    /// Post-training quantization recipe
    pub fn ptq(backend: Backend) -> Self {
        match backend {
            Backend::Fbgemm => {
                let (lower, upper) = PERCENTILE_BOUNDS;
                Self {
                    activation: ObserverSpec {
                        method: CalibrationMethod::Percentile { lower, upper },
                        granularity: Granularity::PerTensor,
                        range: QuantRange::quint8(true),
                    },
                    weight: ObserverSpec {
                        method: CalibrationMethod::MinMax,
                        granularity: Granularity::PerChannel,
                        range: QuantRange::qint8(),
                    },
                }
            }
            Backend::Qnnpack => Self {
                activation: ObserverSpec {
                    method: CalibrationMethod::MinMax,
                    granularity: Granularity::PerTensor,
                    range: QuantRange::quint8(false),
                },
                weight: ObserverSpec {
                    method: CalibrationMethod::MinMax,
                    granularity: Granularity::PerTensor,
                    range: QuantRange::qint8(),
                },
            },
        }
    }

    /// Quantization-aware training recipe
    pub fn qat(backend: Backend) -> Self {
        let method = CalibrationMethod::MovingAverage {
            averaging_constant: MOVING_AVERAGE_CONSTANT,
        };
        let (reduce_range, weight_granularity) = match backend {
            Backend::Fbgemm => (true, Granularity::PerChannel),
            Backend::Qnnpack => (false, Granularity::PerTensor),
        };
        Self {
            activation: ObserverSpec {
                method: method.clone(),
                granularity: Granularity::PerTensor,
                range: QuantRange::quint8(reduce_range),
            },
            weight: ObserverSpec {
                method,
                granularity: weight_granularity,
                range: QuantRange::qint8(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!("fbgemm".parse::<Backend>().unwrap(), Backend::Fbgemm);
        assert_eq!("QNNPACK".parse::<Backend>().unwrap(), Backend::Qnnpack);
        assert!(matches!(
            "x86".parse::<Backend>(),
            Err(Error::UnknownBackend(name)) if name == "x86"
        ));
        assert_eq!(Backend::Fbgemm.to_string(), "fbgemm");
    }

    #[test]
    fn test_fbgemm_reduces_activation_range() {
        for qconfig in [QConfig::ptq(Backend::Fbgemm), QConfig::qat(Backend::Fbgemm)] {
            assert_eq!(qconfig.activation.range.qmax, 127);
            assert_eq!(qconfig.weight.granularity, Granularity::PerChannel);
        }
    }

    #[test]
    fn test_qnnpack_is_per_tensor() {
        for qconfig in [QConfig::ptq(Backend::Qnnpack), QConfig::qat(Backend::Qnnpack)] {
            assert_eq!(qconfig.activation.range.qmax, 255);
            assert_eq!(qconfig.weight.granularity, Granularity::PerTensor);
            assert_eq!(qconfig.weight.range, QuantRange::qint8());
        }
    }

    #[test]
    fn test_qat_uses_moving_average() {
        let qconfig = QConfig::qat(Backend::Qnnpack);
        assert_eq!(
            qconfig.activation.method,
            CalibrationMethod::MovingAverage {
                averaging_constant: 0.01
            }
        );
        let fq = qconfig.weight.build_fake_quant();
        assert!(fq.observer_enabled && fq.fake_quant_enabled);
    }
}
