//! Tests for flow selection and run-level checks

use super::*;
use crate::distributed::LocalGroup;
use crate::Error;

#[test]
fn test_default_flow_is_quant_aware_training() {
    assert_eq!(Flow::select(&RunConfig::default()), Flow::QuantAwareTraining);
}

#[test]
fn test_post_training_quantize_wins_over_test_only() {
    let mut config = RunConfig::default();
    config.test_only = true;
    assert_eq!(Flow::select(&config), Flow::TestOnly);
    config.post_training_quantize = true;
    assert_eq!(Flow::select(&config), Flow::PostTrainingQuantize);
}

#[test]
fn test_invalid_config_fails_before_touching_data() {
    let mut config = RunConfig::default();
    config.batch_size = 0;
    config.data_path = "/nonexistent/dataset".into();
    let result = run_in_group(&config, &DistributedInfo::single(), &mut LocalGroup);
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[test]
fn test_test_only_without_weights_is_rejected() {
    let mut config = RunConfig::default();
    config.test_only = true;
    config.data_path = "/nonexistent/dataset".into();
    let result = run_in_group(&config, &DistributedInfo::single(), &mut LocalGroup);
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[test]
fn test_missing_dataset_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RunConfig::default();
    config.data_path = dir.path().join("missing");
    config.output_dir = None;
    let result = run_in_group(&config, &DistributedInfo::single(), &mut LocalGroup);
    assert!(result.is_err());
}
