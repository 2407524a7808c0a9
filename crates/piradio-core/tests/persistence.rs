mod common;

use std::sync::Arc;

use common::{test_config, RecordingEngine, RecordingRenderer};
use piradio_core::config::Config;
use piradio_core::controller::Controller;
use piradio_core::error::ControllerError;
use piradio_core::protocol::Command;

fn controller_with_file(config: &Config, path: std::path::PathBuf) -> Controller {
    Controller::new(
        config,
        Arc::new(RecordingEngine::default()),
        Arc::new(RecordingRenderer::default()),
    )
    .with_settings_file(config, path)
}

#[tokio::test]
async fn save_writes_volume_interval_and_presets() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = test_config();
    config.http.port = 9090;
    config.save_to(&path).unwrap();

    let controller = controller_with_file(&config, path.clone());
    assert!(controller.supports_persistence());

    controller
        .apply(Command::SetVolume { value: 70 })
        .await
        .unwrap();
    controller
        .apply(Command::SetTimerInterval { minutes: 45 })
        .await
        .unwrap();
    controller
        .apply(Command::AddPreset {
            label: "SomaFM Groove Salad".into(),
            url: "http://ice1.somafm.com/groovesalad-128-mp3".into(),
        })
        .await
        .unwrap();
    // Transient state is not persisted.
    controller.apply(Command::ToggleMute).await.unwrap();
    controller.apply(Command::Next).await.unwrap();

    controller.save().await.unwrap();

    let saved = Config::load_from(&path).unwrap();
    assert_eq!(saved.volume.default, 70);
    assert_eq!(saved.timer.interval, 45);
    assert_eq!(saved.stations.len(), 4);
    assert_eq!(saved.stations[3].label, "SomaFM Groove Salad");
    assert_eq!(saved.http.port, 9090);
}

#[tokio::test]
async fn failed_save_is_reported_and_state_survives() {
    let dir = tempfile::tempdir().unwrap();
    // Parent "directory" is a regular file, so nothing can be written below it.
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "x").unwrap();
    let path = blocker.join("config.toml");

    let config = test_config();
    let controller = controller_with_file(&config, path.clone());
    controller
        .apply(Command::SetVolume { value: 30 })
        .await
        .unwrap();

    let err = controller.save().await.unwrap_err();
    assert!(matches!(err, ControllerError::Persistence(_)));
    assert_eq!(controller.status().await.volume, 30);
    assert_eq!(std::fs::read_to_string(&blocker).unwrap(), "x");
}

#[tokio::test]
async fn basic_profile_ignores_settings_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.player.profile = piradio_core::config::PlayerProfile::Basic;

    let controller = controller_with_file(&config, dir.path().join("config.toml"));
    assert!(!controller.supports_persistence());
    assert!(matches!(
        controller.save().await,
        Err(ControllerError::Unsupported(_))
    ));
}
