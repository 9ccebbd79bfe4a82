#![cfg(unix)]

use cws_terminal::process::is_running;
use cws_terminal::{
    AttachOutcome, ConnectionId, SessionConfig, SessionEvent, SessionEventKind, SessionManager,
    TerminalError,
};
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn manager() -> SessionManager {
    manager_with(SessionConfig {
        shell: "/bin/sh".to_string(),
        ..Default::default()
    })
}

fn manager_with(config: SessionConfig) -> SessionManager {
    SessionManager::new(config)
}

fn sink() -> (flume::Sender<SessionEvent>, flume::Receiver<SessionEvent>) {
    flume::bounded(1024)
}

async fn next_event(rx: &flume::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(WAIT, rx.recv_async())
        .await
        .expect("timed out waiting for a session event")
        .expect("event sink disconnected")
}

/// Collect output until it contains `needle`.
async fn output_containing(rx: &flume::Receiver<SessionEvent>, needle: &str) -> String {
    let mut seen = String::new();
    let deadline = Instant::now() + WAIT;
    while !seen.contains(needle) && Instant::now() < deadline {
        let polled = tokio::time::timeout(Duration::from_millis(200), rx.recv_async()).await;
        if let Ok(Ok(SessionEvent {
            kind: SessionEventKind::Output(text),
            ..
        })) = polled
        {
            seen.push_str(&text);
        }
    }
    seen
}

async fn wait_for_exit(pid: u32) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if !is_running(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread")]
async fn attaching_twice_yields_one_process() {
    let sessions = manager();
    let (tx_a, rx_a) = sink();
    let (tx_b, rx_b) = sink();

    let first = sessions.attach("t1", ConnectionId::new(), tx_a).await.unwrap();
    let pid = sessions.process_id("t1").await.unwrap();
    let second = sessions.attach("t1", ConnectionId::new(), tx_b).await.unwrap();

    assert_eq!(first, AttachOutcome::Spawned);
    assert_eq!(second, AttachOutcome::Rebound);
    assert_eq!(sessions.process_id("t1").await, Some(pid));
    assert_eq!(sessions.session_count(), 1);
    assert_eq!(next_event(&rx_a).await.kind, SessionEventKind::Ready);
    assert_eq!(next_event(&rx_b).await.kind, SessionEventKind::Ready);

    sessions.shutdown().await;
    assert!(wait_for_exit(pid).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn input_produces_output() {
    let sessions = manager();
    let (tx, rx) = sink();
    sessions.attach("t1", ConnectionId::new(), tx).await.unwrap();
    assert_eq!(
        next_event(&rx).await,
        SessionEvent {
            session_id: "t1".to_string(),
            kind: SessionEventKind::Ready,
        }
    );

    sessions.write("t1", b"echo hi\n".to_vec()).await.unwrap();
    sessions.resize("t1", 100, 30).await.unwrap();
    assert!(output_containing(&rx, "hi").await.contains("hi"));

    sessions.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn resize_reaches_the_terminal() {
    let sessions = manager();
    let (tx, rx) = sink();
    sessions.attach("t1", ConnectionId::new(), tx).await.unwrap();
    assert_eq!(next_event(&rx).await.kind, SessionEventKind::Ready);

    sessions.resize("t1", 120, 40).await.unwrap();
    sessions.write("t1", b"stty size\n".to_vec()).await.unwrap();
    assert!(output_containing(&rx, "40 120").await.contains("40 120"));

    sessions.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn stalled_connection_does_not_block_rebind_or_detach() {
    let sessions = manager();
    // Holds the Ready event and nothing more; never drained.
    let (stalled_tx, _stalled_rx) = flume::bounded(1);
    sessions
        .attach("t1", ConnectionId::new(), stalled_tx)
        .await
        .unwrap();
    sessions
        .write(
            "t1",
            b"i=0; while [ $i -lt 2000 ]; do echo line-$i; i=$((i+1)); done\n".to_vec(),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let (tx, rx) = sink();
    let outcome = tokio::time::timeout(WAIT, sessions.attach("t1", ConnectionId::new(), tx))
        .await
        .expect("rebind blocked behind a stalled connection")
        .unwrap();
    assert_eq!(outcome, AttachOutcome::Rebound);
    assert_eq!(next_event(&rx).await.kind, SessionEventKind::Ready);
    assert!(output_containing(&rx, "line-1999").await.contains("line-1999"));

    tokio::time::timeout(WAIT, sessions.detach("t1"))
        .await
        .expect("detach blocked behind a stalled connection");
    assert_eq!(sessions.session_count(), 0);
}

#[tokio::test]
async fn unknown_session_operations_are_noops() {
    let sessions = manager();
    sessions.write("ghost", b"ls\n".to_vec()).await.unwrap();
    sessions.resize("ghost", 80, 24).await.unwrap();
    sessions.detach("ghost").await;
    assert_eq!(sessions.session_count(), 0);
    assert_eq!(sessions.process_id("ghost").await, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn detach_all_only_touches_the_owning_connection() {
    let sessions = manager();
    let conn_a = ConnectionId::new();
    let conn_b = ConnectionId::new();
    let (tx_a, _rx_a) = sink();
    let (tx_b, _rx_b) = sink();

    sessions.attach("a1", conn_a, tx_a.clone()).await.unwrap();
    sessions.attach("shared", conn_a, tx_a).await.unwrap();
    sessions.attach("b1", conn_b, tx_b.clone()).await.unwrap();
    // Rebinding moves ownership to B.
    sessions.attach("shared", conn_b, tx_b).await.unwrap();

    let a1 = sessions.process_id("a1").await.unwrap();
    let b1 = sessions.process_id("b1").await.unwrap();
    let shared = sessions.process_id("shared").await.unwrap();

    sessions.detach_all(conn_a).await;

    assert_eq!(sessions.process_id("a1").await, None);
    assert!(wait_for_exit(a1).await);
    assert_eq!(sessions.process_id("b1").await, Some(b1));
    assert_eq!(sessions.process_id("shared").await, Some(shared));
    assert!(is_running(b1));

    sessions.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn detach_terminates_and_next_attach_spawns_fresh() {
    let sessions = manager();
    let (tx, _rx) = sink();
    let conn = ConnectionId::new();

    sessions.attach("t1", conn, tx.clone()).await.unwrap();
    let old = sessions.process_id("t1").await.unwrap();
    sessions.detach("t1").await;
    assert!(wait_for_exit(old).await);
    assert_eq!(sessions.session_count(), 0);

    let outcome = sessions.attach("t1", conn, tx).await.unwrap();
    assert_eq!(outcome, AttachOutcome::Spawned);
    assert_ne!(sessions.process_id("t1").await, Some(old));

    sessions.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shell_exit_is_reported_and_session_removed() {
    let sessions = manager();
    let (tx, rx) = sink();
    sessions.attach("t1", ConnectionId::new(), tx).await.unwrap();

    sessions.write("t1", b"exit\n".to_vec()).await.unwrap();
    let exited = tokio::time::timeout(WAIT, async {
        loop {
            let event = next_event(&rx).await;
            if event.kind == SessionEventKind::Exited {
                break event;
            }
        }
    })
    .await
    .expect("no exit event");

    assert_eq!(exited.session_id, "t1");
    assert_eq!(sessions.process_id("t1").await, None);
    assert_eq!(sessions.session_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn orphaned_session_survives_within_grace_and_replays_output() {
    let sessions = manager_with(SessionConfig {
        shell: "/bin/sh".to_string(),
        reconnect_grace: Duration::from_secs(10),
        ..Default::default()
    });
    let conn_a = ConnectionId::new();
    let (tx_a, _rx_a) = sink();
    sessions.attach("t1", conn_a, tx_a).await.unwrap();
    let pid = sessions.process_id("t1").await.unwrap();

    sessions.detach_all(conn_a).await;
    sessions.write("t1", b"echo replay-me\n".to_vec()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let (tx_b, rx_b) = sink();
    let outcome = sessions.attach("t1", ConnectionId::new(), tx_b).await.unwrap();
    assert_eq!(outcome, AttachOutcome::Rebound);
    assert_eq!(sessions.process_id("t1").await, Some(pid));
    assert_eq!(next_event(&rx_b).await.kind, SessionEventKind::Ready);
    assert!(output_containing(&rx_b, "replay-me").await.contains("replay-me"));

    sessions.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn orphaned_session_expires_after_grace() {
    let sessions = manager_with(SessionConfig {
        shell: "/bin/sh".to_string(),
        reconnect_grace: Duration::from_millis(100),
        ..Default::default()
    });
    let conn = ConnectionId::new();
    let (tx, _rx) = sink();
    sessions.attach("t1", conn, tx).await.unwrap();
    let pid = sessions.process_id("t1").await.unwrap();

    sessions.detach_all(conn).await;
    assert_eq!(sessions.process_id("t1").await, Some(pid));

    assert!(wait_for_exit(pid).await);
    assert_eq!(sessions.process_id("t1").await, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn spawn_failure_sends_no_ready() {
    let sessions = manager_with(SessionConfig {
        shell: "/nonexistent/shell".to_string(),
        ..Default::default()
    });
    let (tx, rx) = sink();

    let err = sessions
        .attach("t1", ConnectionId::new(), tx)
        .await
        .unwrap_err();

    assert!(matches!(err, TerminalError::ProcessSpawn(_)));
    assert_eq!(sessions.session_count(), 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_attaches_share_one_process() {
    let sessions = manager();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let sessions = sessions.clone();
        handles.push(tokio::spawn(async move {
            let (tx, _rx) = flume::bounded(1024);
            sessions.attach("t1", ConnectionId::new(), tx).await.unwrap()
        }));
    }

    let mut spawned = 0;
    for handle in handles {
        if handle.await.unwrap() == AttachOutcome::Spawned {
            spawned += 1;
        }
    }
    assert_eq!(spawned, 1);
    assert_eq!(sessions.session_count(), 1);

    sessions.shutdown().await;
}
