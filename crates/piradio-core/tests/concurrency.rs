mod common;

use std::sync::Arc;

use common::{test_config, Harness};
use piradio_core::protocol::Command;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_volume_commands_lose_no_updates() {
    let mut config = test_config();
    config.volume.min = 0;
    config.volume.max = 10_000;
    config.volume.default = 5_000;
    let h = Harness::new(&config);

    let mut tasks = Vec::new();
    for i in 0..100 {
        let controller = Arc::clone(&h.controller);
        // 60 up, 40 down, interleaved.
        let cmd = if i % 5 < 3 {
            Command::VolumeUp
        } else {
            Command::VolumeDown
        };
        tasks.push(tokio::spawn(async move { controller.apply(cmd).await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    // Far from both bounds, so every serial order gives the same result.
    assert_eq!(h.controller.status().await.volume, 5_000 + 20 * 10);
    assert_eq!(h.renderer.renders(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_volume_commands_never_leave_bounds() {
    let mut config = test_config();
    config.volume.min = 0;
    config.volume.max = 50;
    config.volume.default = 20;
    let h = Harness::new(&config);

    let mut tasks = Vec::new();
    for i in 0..100 {
        let controller = Arc::clone(&h.controller);
        let cmd = if i % 2 == 0 {
            Command::VolumeUp
        } else {
            Command::VolumeDown
        };
        tasks.push(tokio::spawn(async move { controller.apply(cmd).await }));
    }

    let mut revs = Vec::new();
    for task in tasks {
        let snap = task.await.unwrap().unwrap();
        assert!((0..=50).contains(&snap.volume), "volume {}", snap.volume);
        assert_eq!(snap.volume % 10, 0);
        revs.push(snap.rev);
    }

    // Every command saw its own revision: the lock serialised them all.
    revs.sort_unstable();
    revs.dedup();
    assert_eq!(revs.len(), 100);

    let final_volume = h.controller.status().await.volume;
    assert!((0..=50).contains(&final_volume));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn commands_and_ticks_interleave_safely() {
    let h = Harness::new(&test_config());

    let mut tasks = Vec::new();
    for i in 0..50 {
        let controller = Arc::clone(&h.controller);
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                controller.apply(Command::ToggleTimer).await.map(|_| ())
            } else {
                controller.timer_tick().await;
                controller.idle_tick().await;
                Ok(())
            }
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    // 25 toggles from Disarmed end Armed; nothing expired.
    let status = h.controller.status().await;
    assert!(status.timer_status.starts_with("ON"));
    assert_eq!(h.engine.stops(), 0);
}
