//! Affine quantization parameters, integer ranges and fixed-point requantization.

use serde::{Deserialize, Serialize};

/// Integer range of a quantized type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantRange {
    /// Smallest representable level
    pub qmin: i32,
    /// Largest representable level
    pub qmax: i32,
    /// Whether the zero point is pinned to 0
    pub symmetric: bool,
}

impl QuantRange {
    /// Symmetric signed range, `-(2^(bits-1) - 1)..=2^(bits-1) - 1`
    pub fn symmetric(bits: u32) -> Self {
        let qmax = (1 << (bits - 1)) - 1;
        Self {
            qmin: -qmax,
            qmax,
            symmetric: true,
        }
    }

    /// Asymmetric unsigned range, `0..=2^bits - 1`
    pub fn asymmetric(bits: u32) -> Self {
        Self {
            qmin: 0,
            qmax: (1 << bits) - 1,
            symmetric: false,
        }
    }

    /// Unsigned 8-bit activations, optionally restricted to 7 bits
    pub fn quint8(reduce_range: bool) -> Self {
        Self::asymmetric(if reduce_range { 7 } else { 8 })
    }

    /// Signed symmetric 8-bit weights
    pub fn qint8() -> Self {
        Self::symmetric(8)
    }

    /// Compute scale and zero point covering `[min_val, max_val]`
    ///
    /// The range is widened to include 0 so that zero is exactly representable.
    /// Symmetric: `scale = max(|min|, |max|) / ((qmax - qmin) / 2)`, zero point 0.
    /// Asymmetric: `scale = (max - min) / (qmax - qmin)`, `zp = qmin - round(min / scale)`.
    pub fn qparams(&self, min_val: f32, max_val: f32) -> QParams {
        let min_neg = min_val.min(0.0);
        let max_pos = max_val.max(0.0);

        if self.symmetric {
            let max_abs = (-min_neg).max(max_pos);
            let half_levels = (self.qmax - self.qmin) as f32 / 2.0;
            QParams {
                scale: (max_abs / half_levels).max(f32::EPSILON),
                zero_point: 0,
            }
        } else {
            let scale = ((max_pos - min_neg) / (self.qmax - self.qmin) as f32).max(f32::EPSILON);
            let zero_point = (self.qmin as f32 - (min_neg / scale).round()) as i32;
            QParams {
                scale,
                zero_point: zero_point.clamp(self.qmin, self.qmax),
            }
        }
    }
}

/// Scale and zero point: `x ≈ (q - zero_point) * scale`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QParams {
    pub scale: f32,
    pub zero_point: i32,
}

impl Default for QParams {
    fn default() -> Self {
        Self {
            scale: 1.0,
            zero_point: 0,
        }
    }
}

impl QParams {
    /// Quantize one value into `range`
    pub fn quantize(&self, x: f32, range: &QuantRange) -> i32 {
        ((x / self.scale).round() as i32)
            .saturating_add(self.zero_point)
            .clamp(range.qmin, range.qmax)
    }

    /// Map a level back to float
    pub fn dequantize(&self, q: i32) -> f32 {
        (q - self.zero_point) as f32 * self.scale
    }

    /// Quantize then dequantize
    pub fn fake_quantize(&self, x: f32, range: &QuantRange) -> f32 {
        self.dequantize(self.quantize(x, range))
    }

    /// Float interval that survives quantization unclipped
    pub fn representable(&self, range: &QuantRange) -> (f32, f32) {
        (self.dequantize(range.qmin), self.dequantize(range.qmax))
    }
}

/// Real multiplier stored as a Q31 mantissa and a power-of-two exponent
///
/// `real ≈ mantissa * 2^(exponent - 31)` with `mantissa` in `[2^30, 2^31)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPointMultiplier {
    pub mantissa: i32,
    pub exponent: i32,
}

impl FixedPointMultiplier {
    /// Decompose a positive real multiplier
    pub fn from_real(real: f64) -> Self {
        if !(real > 0.0) || !real.is_finite() {
            return Self {
                mantissa: 0,
                exponent: 0,
            };
        }
        let mut exponent = real.log2().floor() as i32 + 1;
        let fraction = real / 2f64.powi(exponent);
        let mut mantissa = (fraction * (1i64 << 31) as f64).round() as i64;
        if mantissa == 1i64 << 31 {
            mantissa /= 2;
            exponent += 1;
        }
        if exponent < -31 {
            return Self {
                mantissa: 0,
                exponent: 0,
            };
        }
        Self {
            mantissa: mantissa as i32,
            exponent: exponent.min(30),
        }
    }

    /// Exponents [`FixedPointMultiplier::apply`] can shift by
    pub const EXPONENT_RANGE: std::ops::RangeInclusive<i32> = -31..=30;

    /// Whether `apply` is defined for this multiplier
    pub fn is_valid(&self) -> bool {
        self.mantissa == 0 || Self::EXPONENT_RANGE.contains(&self.exponent)
    }

    /// The multiplier as a float, for diagnostics
    pub fn to_real(&self) -> f64 {
        self.mantissa as f64 * 2f64.powi(self.exponent - 31)
    }

    /// Multiply an accumulator, rounding half away from zero
    pub fn apply(&self, acc: i32) -> i32 {
        if self.mantissa == 0 {
            return 0;
        }
        let product = acc as i64 * self.mantissa as i64;
        let shift = (31 - self.exponent) as u32;
        let half = 1i64 << (shift - 1);
        let rounded = if product >= 0 {
            (product + half) >> shift
        } else {
            -((-product + half) >> shift)
        };
        rounded.clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }
}
