//! The three ways a `train` run can go

use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::engine::{evaluate, train_one_epoch, EvalReport, TrainStats};
use super::metrics::format_duration;
use crate::config::RunConfig;
use crate::data::load_data;
use crate::distributed::{save_on_master, DistributedInfo, ProcessGroup};
use crate::io::{
    epoch_checkpoint_path, latest_checkpoint_path, load_checkpoint, Checkpoint, PTQ_ARTIFACT,
};
use crate::models::{build_classifier, load_weights, recipe, resolve_pretrained, FloatClassifier};
use crate::nn::CrossEntropyLoss;
use crate::optim::{LRScheduler, Optimizer, StepLR, SGD};
use crate::quant::{
    convert, convert_qat, fuse_model, prepare, prepare_qat, Backend, QConfig, QuantizedClassifier,
};
use crate::{Error, Result};

/// Which procedure a run performs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    PostTrainingQuantize,
    TestOnly,
    QuantAwareTraining,
}

impl Flow {
    /// Post-training quantization wins over test-only; training is the default
    pub fn select(config: &RunConfig) -> Self {
        if config.post_training_quantize {
            Self::PostTrainingQuantize
        } else if config.test_only {
            Self::TestOnly
        } else {
            Self::QuantAwareTraining
        }
    }
}

/// Metrics of one quantization-aware training epoch
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: usize,
    /// Learning rate used during the epoch
    pub lr: f32,
    pub train: TrainStats,
    /// Fake-quantized model
    pub qat: EvalReport,
    /// Integer model converted at the end of the epoch
    pub quantized: EvalReport,
}

/// What a finished run produced
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    PostTrainingQuantize {
        eval: EvalReport,
        /// Path of the saved integer model, when this process wrote one
        artifact: Option<PathBuf>,
    },
    TestOnly {
        eval: EvalReport,
    },
    QuantAwareTraining {
        /// One entry per epoch run, in order
        epochs: Vec<EpochReport>,
    },
}

/// Float model from the zoo, with pretrained weights when available
fn build_float(config: &RunConfig, num_classes: usize) -> Result<FloatClassifier> {
    let mut model = build_classifier(&config.model, num_classes, config.seed)?;
    match resolve_pretrained(&config.model, config.weights.as_deref()) {
        Some(path) => {
            info!("Loading pretrained weights from {}", path.display());
            load_weights(&mut model, &path)?;
        }
        None => warn!(
            "No pretrained weights for {}; starting from random initialisation",
            config.model
        ),
    }
    Ok(model)
}

fn image_side(image_size: usize) -> Result<u32> {
    u32::try_from(image_size)
        .map_err(|_| Error::InvalidConfig(format!("image size {image_size} is too large")))
}

pub(super) fn post_training_quantize(
    config: &RunConfig,
    dist: &DistributedInfo,
    group: &mut dyn ProcessGroup,
) -> Result<RunOutcome> {
    let backend: Backend = config.backend.parse()?;
    let image_size = image_side(recipe(&config.model)?.image_size)?;
    let data = load_data(config, dist, image_size)?;

    info!("Creating model");
    let mut model = build_float(config, data.num_classes())?;
    if let Some(path) = &config.resume {
        let checkpoint = load_checkpoint(path)?;
        model.load_state_dict(&checkpoint.model)?;
    }

    let mut observed = prepare(fuse_model(&model), &QConfig::ptq(backend));
    let count = config.workers.max(1) * config.batch_size * config.num_calibration_batches;
    let calibration = data.calibration_loader(count, config.batch_size, image_size);
    info!(
        "Calibrating on {} training samples",
        calibration.sampler().len()
    );
    let criterion = CrossEntropyLoss;
    evaluate(&mut observed, &criterion, &calibration, 1, "Calibration:", group)?;
    let mut quantized = convert(&observed)?;

    let artifact = match &config.output_dir {
        Some(dir) => {
            let path = dir.join(PTQ_ARTIFACT);
            save_on_master(group, &quantized, &path)?.then_some(path)
        }
        None => None,
    };

    info!("Evaluating post-training quantized model");
    let eval = evaluate(
        &mut quantized,
        &criterion,
        &data.val,
        config.print_freq,
        "Test:",
        group,
    )?;
    Ok(RunOutcome::PostTrainingQuantize { eval, artifact })
}

/// Quantized weights for evaluation: `--weights`, else the resume checkpoint's `eval_model`
fn load_quantized(config: &RunConfig) -> Result<QuantizedClassifier> {
    if let Some(path) = &config.weights {
        info!("Loading quantized weights from {}", path.display());
        return QuantizedClassifier::load(path);
    }
    if let Some(path) = &config.resume {
        info!("Loading quantized model from checkpoint {}", path.display());
        return Ok(load_checkpoint(path)?.eval_model);
    }
    Err(Error::InvalidConfig(
        "test-only evaluation needs --weights or --resume".to_string(),
    ))
}

pub(super) fn test_only(
    config: &RunConfig,
    dist: &DistributedInfo,
    group: &mut dyn ProcessGroup,
) -> Result<RunOutcome> {
    let mut model = load_quantized(config)?;
    let data = load_data(config, dist, image_side(model.image_size)?)?;
    if model.num_classes() != data.num_classes() {
        return Err(Error::ShapeMismatch {
            name: "classifier".to_string(),
            expected: vec![data.num_classes()],
            actual: vec![model.num_classes()],
        });
    }
    let eval = evaluate(
        &mut model,
        &CrossEntropyLoss,
        &data.val,
        config.print_freq,
        "Test:",
        group,
    )?;
    Ok(RunOutcome::TestOnly { eval })
}

pub(super) fn quant_aware_training(
    config: &RunConfig,
    dist: &DistributedInfo,
    group: &mut dyn ProcessGroup,
) -> Result<RunOutcome> {
    let backend: Backend = config.backend.parse()?;
    let image_size = image_side(recipe(&config.model)?.image_size)?;
    let mut data = load_data(config, dist, image_size)?;

    info!("Creating model");
    let float = build_float(config, data.num_classes())?;
    let mut model = prepare_qat(float, &QConfig::qat(backend));
    if dist.distributed && config.sync_bn {
        model.convert_sync_batchnorm();
    }
    model.broadcast_state(group, true)?;

    let mut optimizer =
        SGD::new(config.lr, config.momentum).with_weight_decay(config.weight_decay);
    let mut lr_scheduler = StepLR::new(config.lr, config.lr_step_size, config.lr_gamma);

    let mut start_epoch = config.start_epoch;
    if let Some(path) = &config.resume {
        info!("Resuming from {}", path.display());
        let checkpoint = load_checkpoint(path)?;
        model.load_state_dict(&checkpoint.model)?;
        start_epoch = checkpoint.next_epoch();
        optimizer.load_state(checkpoint.optimizer);
        lr_scheduler.load_state(checkpoint.lr_scheduler);
    }
    lr_scheduler.apply(&mut optimizer);

    model.enable_observer();
    model.enable_fake_quant();
    let criterion = CrossEntropyLoss;

    info!("Start training");
    let start = Instant::now();
    let mut reports = Vec::new();
    for epoch in start_epoch..config.epochs {
        data.train.set_epoch(epoch);
        let lr = optimizer.lr();
        let train = train_one_epoch(
            &mut model,
            &criterion,
            &mut optimizer,
            &data.train,
            epoch,
            config.print_freq,
            group,
        )?;
        lr_scheduler.step();
        lr_scheduler.apply(&mut optimizer);

        if epoch >= config.num_observer_update_epochs {
            info!("Disabling observer for subseq epochs, epoch = {epoch}");
            model.disable_observer();
        }
        if epoch >= config.num_batch_norm_update_epochs {
            info!("Freezing BN for subseq epochs, epoch = {epoch}");
            model.freeze_bn_stats();
        }

        model.eval();
        info!("Evaluate QAT model");
        let qat = evaluate(
            &mut model,
            &criterion,
            &data.val,
            config.print_freq,
            "Test:",
            group,
        )?;

        info!("Evaluate Quantized model");
        let snapshot = model.clone();
        let mut quantized = convert_qat(&snapshot)?;
        let quantized_report = evaluate(
            &mut quantized,
            &criterion,
            &data.val,
            config.print_freq,
            "Test:",
            group,
        )?;
        model.train();

        if let Some(dir) = &config.output_dir {
            let checkpoint = Checkpoint {
                model: model.state_dict(),
                eval_model: quantized,
                optimizer: optimizer.state(),
                lr_scheduler: lr_scheduler.state(),
                epoch,
                args: config.clone(),
            };
            save_on_master(group, &checkpoint, epoch_checkpoint_path(dir, epoch))?;
            save_on_master(group, &checkpoint, latest_checkpoint_path(dir))?;
        }

        reports.push(EpochReport {
            epoch,
            lr,
            train,
            qat,
            quantized: quantized_report,
        });
    }

    info!("Training time {}", format_duration(start.elapsed()));
    Ok(RunOutcome::QuantAwareTraining { epochs: reports })
}
