//! Tests for configuration parsing, layering and validation

use super::*;
use crate::Error;
use std::path::PathBuf;

fn train_args(argv: &[&str]) -> TrainArgs {
    let mut full = vec!["cuantizar", "train"];
    full.extend_from_slice(argv);
    match parse_args(full).unwrap().command {
        Command::Train(args) => args,
        other => panic!("Expected Train command, got {other:?}"),
    }
}

#[test]
fn test_defaults_match_documented_flags() {
    let config = RunConfig::default();
    assert_eq!(config.model, "mlp_small");
    assert_eq!(config.backend, "qnnpack");
    assert_eq!(config.batch_size, 32);
    assert_eq!(config.eval_batch_size, 128);
    assert_eq!(config.epochs, 90);
    assert_eq!(config.num_observer_update_epochs, 4);
    assert_eq!(config.num_batch_norm_update_epochs, 3);
    assert_eq!(config.num_calibration_batches, 32);
    assert_eq!(config.workers, 16);
    assert_eq!(config.lr_step_size, 30);
    assert_eq!(config.output_dir, Some(PathBuf::from(".")));
    assert_eq!(config.dist_url, "env://");
    assert!(config.validate().is_ok());
}

#[test]
fn test_parse_train_without_flags_changes_nothing() {
    let args = train_args(&[]);
    let mut config = RunConfig::default();
    apply_overrides(&mut config, &args);
    assert_eq!(config, RunConfig::default());
}

#[test]
fn test_parse_train_with_overrides() {
    let args = train_args(&[
        "--epochs",
        "10",
        "-b",
        "8",
        "--lr",
        "0.01",
        "-j",
        "2",
        "--wd",
        "0.0005",
        "--backend",
        "fbgemm",
        "--output-dir",
        "./out",
        "--sync-bn",
        "--post-training-quantize",
    ]);
    let mut config = RunConfig::default();
    apply_overrides(&mut config, &args);
    assert_eq!(config.epochs, 10);
    assert_eq!(config.batch_size, 8);
    assert_eq!(config.workers, 2);
    assert!((config.lr - 0.01).abs() < 1e-9);
    assert!((config.weight_decay - 0.0005).abs() < 1e-9);
    assert_eq!(config.backend, "fbgemm");
    assert_eq!(config.output_dir, Some(PathBuf::from("./out")));
    assert!(config.sync_bn);
    assert!(config.post_training_quantize);
    assert!(!config.test_only);
}

#[test]
fn test_underscore_flag_spellings_are_accepted() {
    let args = train_args(&[
        "--num_observer_update_epochs",
        "2",
        "--num_batch_norm_update_epochs",
        "1",
        "--num_calibration_batches",
        "5",
        "--post_training_quantize",
    ]);
    let mut config = RunConfig::default();
    apply_overrides(&mut config, &args);
    assert_eq!(config.num_observer_update_epochs, 2);
    assert_eq!(config.num_batch_norm_update_epochs, 1);
    assert_eq!(config.num_calibration_batches, 5);
    assert!(config.post_training_quantize);
}

#[test]
fn test_empty_output_dir_disables_saving() {
    let args = train_args(&["--output-dir", ""]);
    let mut config = RunConfig::default();
    apply_overrides(&mut config, &args);
    assert_eq!(config.output_dir, None);
}

#[test]
fn test_parse_export_defaults() {
    let cli = parse_args(["cuantizar", "export"]).unwrap();
    match cli.command {
        Command::Export(args) => {
            assert_eq!(args.output, PathBuf::from("app/src/main/assets/frcnn.pt"));
            assert_eq!(args.seed, 0);
        }
        other => panic!("Expected Export command, got {other:?}"),
    }
}

#[test]
fn test_global_verbosity_flags() {
    let cli = parse_args(["cuantizar", "train", "-v"]).unwrap();
    assert!(cli.verbose);
    let cli = parse_args(["cuantizar", "-q", "export"]).unwrap();
    assert!(cli.quiet);
}

#[test]
fn test_unknown_subcommand_fails() {
    assert!(parse_args(["cuantizar", "quantize"]).is_err());
}

#[test]
fn test_load_yaml_keeps_missing_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.yaml");
    std::fs::write(&path, "model: mlp_tiny\nepochs: 3\nsync_bn: true\n").unwrap();
    let config = load_config(&path).unwrap();
    assert_eq!(config.model, "mlp_tiny");
    assert_eq!(config.epochs, 3);
    assert!(config.sync_bn);
    assert_eq!(config.batch_size, 32);
}

#[test]
fn test_load_json_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.json");
    std::fs::write(&path, r#"{"backend": "fbgemm", "output_dir": null}"#).unwrap();
    let config = load_config(&path).unwrap();
    assert_eq!(config.backend, "fbgemm");
    assert_eq!(config.output_dir, None);
}

#[test]
fn test_flags_override_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.yaml");
    std::fs::write(&path, "epochs: 3\nlr: 0.5\n").unwrap();
    let mut config = load_config(&path).unwrap();
    apply_overrides(&mut config, &train_args(&["--epochs", "7"]));
    assert_eq!(config.epochs, 7);
    assert!((config.lr - 0.5).abs() < 1e-9);
}

#[test]
fn test_malformed_yaml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.yaml");
    std::fs::write(&path, "epochs: [not a number\n").unwrap();
    assert!(matches!(load_config(&path), Err(Error::Yaml(_))));
}

#[test]
fn test_validate_rejects_bad_settings() {
    let cases: Vec<Box<dyn Fn(&mut RunConfig)>> = vec![
        Box::new(|c| c.batch_size = 0),
        Box::new(|c| c.eval_batch_size = 0),
        Box::new(|c| c.lr_step_size = 0),
        Box::new(|c| c.world_size = 0),
        Box::new(|c| {
            c.epochs = 2;
            c.start_epoch = 5;
        }),
    ];
    for mutate in cases {
        let mut config = RunConfig::default();
        mutate(&mut config);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}

#[test]
fn test_validate_rejects_device_and_backend() {
    let mut config = RunConfig::default();
    config.device = "cuda".to_string();
    assert!(matches!(config.validate(), Err(Error::UnsupportedDevice(_))));

    let mut config = RunConfig::default();
    config.backend = "tensorrt".to_string();
    assert!(matches!(config.validate(), Err(Error::UnknownBackend(_))));
}

#[test]
fn test_home_prefers_explicit_path() {
    assert_eq!(
        super::home_from(Some(PathBuf::from("/opt/cuantizar"))),
        PathBuf::from("/opt/cuantizar")
    );
    assert!(super::home_from(None).ends_with("cuantizar"));
    assert!(super::home_from(Some(PathBuf::new())).ends_with("cuantizar"));
}
