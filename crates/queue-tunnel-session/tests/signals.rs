//! Runs in its own test binary: it sends SIGINT to the whole process.
#![cfg(unix)]

mod common;

use std::{sync::Arc, time::Duration};

use common::{IdleSource, RecordingMode, RecordingSink, WAIT};
use queue_tunnel_core::TunnelConfig;
use queue_tunnel_session::{Shutdown, StopReason, TerminalSession};
use queue_tunnel_transport::MemoryQueue;

#[tokio::test]
async fn test_sigint_restores_terminal() {
    let mut config = TunnelConfig::for_session("sigint");
    config.poll_interval_ms = 2;
    config.read_timeout_ms = 5;
    let client = TerminalSession::new(Arc::new(MemoryQueue::new()), config);
    let mode = RecordingMode::default();
    let shutdown = Shutdown::new();
    shutdown.trigger_on_signals().unwrap();

    let interrupt = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let status = tokio::process::Command::new("kill")
            .args(["-INT", &std::process::id().to_string()])
            .status()
            .await
            .unwrap();
        assert!(status.success());
    };
    let run = tokio::time::timeout(
        WAIT,
        client.run_with(mode.clone(), IdleSource, RecordingSink::default(), &shutdown),
    );
    let (report, ()) = tokio::join!(run, interrupt);
    let report = report.unwrap().unwrap();

    assert!(shutdown.is_triggered());
    assert_eq!(report.read_stop, StopReason::Shutdown);
    assert_eq!(mode.events(), vec!["raw", "restore"]);
}
