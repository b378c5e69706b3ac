//! One training epoch and one evaluation pass

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::metrics::MetricLogger;
use crate::data::DataLoader;
use crate::distributed::{average_gradients, ProcessGroup};
use crate::models::Classify;
use crate::nn::{topk_correct, CrossEntropyLoss};
use crate::optim::{Optimizer, SGD};
use crate::quant::QatClassifier;
use crate::Result;

/// Averages over one training epoch on this process
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainStats {
    pub loss: f32,
    /// Top-1 accuracy, percent
    pub acc1: f32,
    /// Top-5 accuracy, percent
    pub acc5: f32,
    pub steps: usize,
    pub samples: usize,
}

/// Accuracy and loss over a whole evaluation set, summed across processes
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    pub loss: f32,
    /// Top-1 accuracy, percent
    pub acc1: f32,
    /// Top-5 accuracy, percent
    pub acc5: f32,
    pub samples: usize,
}

fn percent(correct: usize, total: usize) -> f32 {
    if total == 0 {
        0.0
    } else {
        correct as f32 * 100.0 / total as f32
    }
}

/// Run one pass over `loader`, updating `model` after every batch
///
/// Gradients are averaged across ranks before each step, and batch-norm and
/// fake-quant buffers follow rank 0 after it.
pub fn train_one_epoch(
    model: &mut QatClassifier,
    criterion: &CrossEntropyLoss,
    optimizer: &mut SGD,
    loader: &DataLoader,
    epoch: usize,
    print_freq: usize,
    group: &mut dyn ProcessGroup,
) -> Result<TrainStats> {
    model.train();
    let mut logger = MetricLogger::new();
    logger.set("lr", optimizer.lr());
    let header = format!("Epoch: [{epoch}]");
    let total = loader.len();
    let mut samples = 0;
    let mut steps = 0;

    for (i, batch) in loader.iter().enumerate() {
        let start = Instant::now();
        let batch = batch?;
        let n = batch.len();

        let (logits, tape) = model.forward_train(&batch.inputs, group)?;
        let (loss, grad_logits) = criterion.forward(&logits, &batch.targets);
        {
            let mut params = model.parameters();
            optimizer.zero_grad(&mut params);
        }
        model.backward(&tape, &grad_logits, group)?;
        {
            let mut params = model.parameters();
            average_gradients(&mut params, group)?;
            optimizer.step(&mut params);
        }
        model.broadcast_state(group, false)?;

        let correct = topk_correct(&logits, &batch.targets, &[1, 5]);
        logger.update("loss", loss, n);
        logger.update("acc1", percent(correct[0], n), n);
        logger.update("acc5", percent(correct[1], n), n);
        let elapsed = start.elapsed().as_secs_f32();
        if elapsed > 0.0 {
            logger.update("img/s", n as f32 / elapsed, 1);
        }
        samples += n;
        steps += 1;

        if i % print_freq == 0 || i + 1 == total {
            info!("{}", logger.progress_line(&header, i, total));
        } else {
            debug!("{}", logger.progress_line(&header, i, total));
        }
    }

    Ok(TrainStats {
        loss: logger.global_avg("loss"),
        acc1: logger.global_avg("acc1"),
        acc5: logger.global_avg("acc5"),
        steps,
        samples,
    })
}

/// Score `model` on every batch of `loader`
///
/// Loss and correct counts are all-reduced, so every rank returns the same
/// report.
pub fn evaluate<M: Classify + ?Sized>(
    model: &mut M,
    criterion: &CrossEntropyLoss,
    loader: &DataLoader,
    print_freq: usize,
    header: &str,
    group: &mut dyn ProcessGroup,
) -> Result<EvalReport> {
    let total = loader.len();
    let mut logger = MetricLogger::new();
    // loss sum, top-1, top-5, samples
    let mut sums = [0.0f32; 4];

    for (i, batch) in loader.iter().enumerate() {
        let batch = batch?;
        let n = batch.len();
        let logits = model.logits(&batch.inputs);
        let (loss, _) = criterion.forward(&logits, &batch.targets);
        let correct = topk_correct(&logits, &batch.targets, &[1, 5]);

        sums[0] += loss * n as f32;
        sums[1] += correct[0] as f32;
        sums[2] += correct[1] as f32;
        sums[3] += n as f32;
        logger.update("loss", loss, n);
        logger.update("acc1", percent(correct[0], n), n);
        logger.update("acc5", percent(correct[1], n), n);

        if i % print_freq == 0 || i + 1 == total {
            info!("{}", logger.progress_line(header, i, total));
        }
    }

    group.all_reduce_sum(&mut sums)?;
    let samples = sums[3].round() as usize;
    if group.world_size() > 1 && samples != loader.dataset().len() {
        warn!(
            "It looks like the dataset has {} samples, but {} samples were used for the \
             evaluation, which might bias the results",
            loader.dataset().len(),
            samples
        );
    }

    let report = EvalReport {
        loss: if samples == 0 { 0.0 } else { sums[0] / samples as f32 },
        acc1: percent(sums[1].round() as usize, samples),
        acc5: percent(sums[2].round() as usize, samples),
        samples,
    };
    info!(
        "{header} Acc@1 {:.3} Acc@5 {:.3}",
        report.acc1, report.acc5
    );
    Ok(report)
}
