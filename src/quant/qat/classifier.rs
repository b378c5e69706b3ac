//! Quantization-aware classifier.

use ndarray::Array2;

use super::linear::{LinearTape, QatLinear};
use super::linear_bn::{LinearBnTape, QatLinearBnReLU};
use crate::distributed::ProcessGroup;
use crate::models::{Classify, FloatClassifier};
use crate::nn::StateDict;
use crate::optim::Param;
use crate::quant::fake_quantize::FakeQuantize;
use crate::quant::qconfig::QConfig;
use crate::Result;

/// Everything [`QatClassifier::backward`] needs from a training forward pass
#[derive(Clone, Debug)]
pub struct QatTape {
    blocks: Vec<LinearBnTape>,
    head: LinearTape,
}

/// Classifier with fake quantization on the input, every weight and every activation
#[derive(Clone, Debug, PartialEq)]
pub struct QatClassifier {
    pub arch: String,
    pub image_size: usize,
    /// Input quantization stub
    pub quant: FakeQuantize,
    pub features: Vec<QatLinearBnReLU>,
    pub classifier: QatLinear,
    training: bool,
}

impl QatClassifier {
    /// Swap float blocks for their QAT counterparts; starts in training mode
    pub fn from_float(model: FloatClassifier, qconfig: &QConfig) -> Self {
        let FloatClassifier {
            arch,
            image_size,
            features,
            classifier,
        } = model;
        Self {
            arch,
            image_size,
            quant: qconfig.activation.build_fake_quant(),
            features: features
                .into_iter()
                .map(|block| QatLinearBnReLU::from_float(block, qconfig))
                .collect(),
            classifier: QatLinear::from_float(classifier, qconfig),
            training: true,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.features
            .first()
            .map_or(self.classifier.linear.in_features(), |b| b.linear.in_features())
    }

    pub fn num_classes(&self) -> usize {
        self.classifier.linear.out_features()
    }

    pub fn train(&mut self) {
        self.training = true;
    }

    pub fn eval(&mut self) {
        self.training = false;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    fn fake_quants_mut(&mut self) -> impl Iterator<Item = &mut FakeQuantize> + '_ {
        std::iter::once(&mut self.quant)
            .chain(self.features.iter_mut().flat_map(|block| {
                [&mut block.weight_fake_quant, &mut block.activation_post_process]
            }))
            .chain([
                &mut self.classifier.weight_fake_quant,
                &mut self.classifier.activation_post_process,
            ])
    }

    pub fn enable_observer(&mut self) {
        self.fake_quants_mut().for_each(FakeQuantize::enable_observer);
    }

    pub fn disable_observer(&mut self) {
        self.fake_quants_mut().for_each(FakeQuantize::disable_observer);
    }

    pub fn enable_fake_quant(&mut self) {
        self.fake_quants_mut().for_each(FakeQuantize::enable_fake_quant);
    }

    #[cfg(test)]
    pub(crate) fn disable_fake_quant(&mut self) {
        self.fake_quants_mut().for_each(FakeQuantize::disable_fake_quant);
    }

    /// Switch every block to running batch-norm statistics
    pub fn freeze_bn_stats(&mut self) {
        self.features
            .iter_mut()
            .for_each(QatLinearBnReLU::freeze_bn_stats);
    }

    /// Compute batch-norm statistics over the whole process group
    pub fn convert_sync_batchnorm(&mut self) {
        for block in &mut self.features {
            block.sync_bn = true;
        }
    }

    /// Inference forward pass (running statistics)
    ///
    /// Observers still update while enabled.
    pub fn forward(&mut self, x: &Array2<f32>) -> Array2<f32> {
        let mut h = self.quant.forward(x);
        for block in &mut self.features {
            h = block.forward(&h);
        }
        self.classifier.forward(&h)
    }

    /// Training forward pass
    pub fn forward_train(
        &mut self,
        x: &Array2<f32>,
        group: &mut dyn ProcessGroup,
    ) -> Result<(Array2<f32>, QatTape)> {
        let mut h = self.quant.forward(x);
        let mut blocks = Vec::with_capacity(self.features.len());
        for block in &mut self.features {
            let (out, tape) = block.forward_train(&h, group)?;
            blocks.push(tape);
            h = out;
        }
        let (logits, head) = self.classifier.forward_train(&h);
        Ok((logits, QatTape { blocks, head }))
    }

    /// Backpropagate `grad_logits` and accumulate parameter gradients
    pub fn backward(
        &mut self,
        tape: &QatTape,
        grad_logits: &Array2<f32>,
        group: &mut dyn ProcessGroup,
    ) -> Result<()> {
        let mut grad = self.classifier.backward(&tape.head, grad_logits);
        for (block, block_tape) in self.features.iter_mut().zip(&tape.blocks).rev() {
            grad = block.backward(block_tape, &grad, group)?;
        }
        Ok(())
    }

    /// Trainable tensors in a stable order
    pub fn parameters(&mut self) -> Vec<Param<'_>> {
        let mut params = Vec::new();
        for (i, block) in self.features.iter_mut().enumerate() {
            params.extend(block.parameters(&format!("features.{i}")));
        }
        params.extend(self.classifier.parameters("classifier"));
        params
    }

    fn write_state(&self, state: &mut StateDict, include_parameters: bool) {
        self.quant.save_state("quant.activation_post_process", state);
        for (i, block) in self.features.iter().enumerate() {
            block.save_state(&format!("features.{i}"), state, include_parameters);
        }
        self.classifier
            .save_state("classifier", state, include_parameters);
    }

    fn read_state(&mut self, state: &StateDict, include_parameters: bool) -> Result<()> {
        self.quant.load_state("quant.activation_post_process", state)?;
        for (i, block) in self.features.iter_mut().enumerate() {
            block.load_state(&format!("features.{i}"), state, include_parameters)?;
        }
        self.classifier
            .load_state("classifier", state, include_parameters)
    }

    /// Parameters, batch-norm buffers and fake-quant state
    pub fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        self.write_state(&mut state, true);
        state
    }

    /// Non-trainable state only
    pub fn buffers(&self) -> StateDict {
        let mut state = StateDict::new();
        self.write_state(&mut state, false);
        state
    }

    pub fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        self.read_state(state, true)
    }

    /// Replace this rank's state with rank 0's
    ///
    /// With `include_parameters` unset only buffers travel, which is enough
    /// once parameters are kept in step by gradient averaging.
    pub fn broadcast_state(
        &mut self,
        group: &mut dyn ProcessGroup,
        include_parameters: bool,
    ) -> Result<()> {
        if group.world_size() <= 1 {
            return Ok(());
        }
        let mut state = if include_parameters {
            self.state_dict()
        } else {
            self.buffers()
        };
        for record in state.values_mut() {
            group.broadcast(&mut record.data)?;
            if record.data.len() != record.shape.iter().product::<usize>() {
                record.shape = vec![record.data.len()];
            }
        }
        self.read_state(&state, include_parameters)
    }
}

impl Classify for QatClassifier {
    fn logits(&mut self, inputs: &Array2<f32>) -> Array2<f32> {
        self.forward(inputs)
    }
}
