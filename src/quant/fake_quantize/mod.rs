//! Fake Quantization for Quantization-Aware Training (QAT)
//!
//! Fake quantization simulates the effects of quantization during training:
//! - Forward: quantize → dequantize (simulates quantization noise)
//! - Backward: Straight-Through Estimator (STE), zeroed outside the range
//!
//! This allows models to adapt to quantization noise during training,
//! resulting in better accuracy after actual quantization.

mod quantize;


pub use quantize::FakeQuantize;
