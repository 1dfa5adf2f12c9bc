use std::path::PathBuf;

use fedrec_core::config::StorageBackendKind;
use fedrec_core::device::{map_worker_to_placement, select_device, Device};
use fedrec_core::FedConfig;

fn fixture_path(name: &str) -> PathBuf {
    // CARGO_MANIFEST_DIR for this crate → crates/core
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[test]
fn parse_participant_config() {
    let path = fixture_path("participant.yaml");
    let cfg = FedConfig::from_yaml_file(&path).expect("should load participant.yaml");

    assert_eq!(
        cfg.model.as_ref().unwrap().name.as_deref(),
        Some("dlrm_kaggle")
    );
    assert_eq!(cfg.dataset.max_ind_range, Some(100_000));
    assert_eq!(cfg.loader.batch_size, Some(128));
    assert!(cfg.should_train());
    assert!(cfg.should_publish());
    assert!(!cfg.should_generate_data());
    assert_eq!(cfg.storage_backend(), Some(StorageBackendKind::S3));

    // The checkpoint section accepts the legacy "folder" alias.
    let checkpoint = cfg.checkpoint.as_ref().unwrap();
    assert_eq!(checkpoint.uri.as_deref(), Some("file:///var/fedrec/ckpt"));
    assert_eq!(checkpoint.rounds_between_checkpoints, Some(50));

    cfg.validate().expect("fixture should validate");
}

#[test]
fn device_table_from_config_maps_workers() {
    let path = fixture_path("participant.yaml");
    let cfg = FedConfig::from_yaml_file(&path).expect("should load participant.yaml");
    let devices = cfg.devices.as_ref().unwrap();

    let placement = map_worker_to_placement(
        &devices.hosts,
        devices.worker_index.unwrap(),
        devices.world_size.unwrap(),
    )
    .expect("worker 2 fits the table");
    assert_eq!(placement.host, "node-a");
    assert_eq!(placement.accelerator, 1);

    let device = select_device(Some(&placement), devices.cuda_available.unwrap());
    assert_eq!(device, Device::Cuda(1));
}
