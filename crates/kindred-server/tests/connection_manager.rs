//! Session registry tests, exercised directly without a socket.

use kindred_server::api_ws::ConnectionManager;
use tokio::sync::mpsc;
use uuid::Uuid;

fn session_queue(depth: usize) -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
    mpsc::channel(depth)
}

#[tokio::test]
async fn fan_out_reaches_every_session_of_a_user() {
    let manager = ConnectionManager::new();
    let (phone_tx, mut phone_rx) = session_queue(8);
    let (desktop_tx, mut desktop_rx) = session_queue(8);
    let (bob_tx, mut bob_rx) = session_queue(8);

    manager.add_session("ana".to_string(), phone_tx).await;
    manager.add_session("ana".to_string(), desktop_tx).await;
    manager.add_session("bob".to_string(), bob_tx).await;

    manager.send_to_user("ana", "frame-1".to_string()).await;

    assert_eq!(phone_rx.try_recv().as_deref(), Ok("frame-1"));
    assert_eq!(desktop_rx.try_recv().as_deref(), Ok("frame-1"));
    assert!(bob_rx.try_recv().is_err());
}

#[tokio::test]
async fn removing_one_session_keeps_the_other() {
    let manager = ConnectionManager::new();
    let (phone_tx, _phone_rx) = session_queue(8);
    let (desktop_tx, mut desktop_rx) = session_queue(8);

    let phone = manager.add_session("ana".to_string(), phone_tx).await;
    manager.add_session("ana".to_string(), desktop_tx).await;

    let removed = manager.remove_session("ana", phone).await;
    assert!(removed.is_some());
    assert_eq!(manager.session_count("ana").await, 1);

    manager.send_to_user("ana", "still here".to_string()).await;
    assert_eq!(desktop_rx.try_recv().as_deref(), Ok("still here"));
}

#[tokio::test]
async fn removing_the_last_session_clears_the_user() {
    let manager = ConnectionManager::new();
    let (tx, _rx) = session_queue(8);

    let session = manager.add_session("ana".to_string(), tx).await;
    assert_eq!(manager.connected_users().await, 1);

    manager.remove_session("ana", session).await;
    assert_eq!(manager.session_count("ana").await, 0);
    assert_eq!(manager.connected_users().await, 0);
}

#[tokio::test]
async fn removing_an_unknown_session_is_a_noop() {
    let manager = ConnectionManager::new();
    let (tx, _rx) = session_queue(8);
    manager.add_session("ana".to_string(), tx).await;

    assert!(manager.remove_session("bob", Uuid::new_v4()).await.is_none());
    assert!(manager.remove_session("ana", Uuid::new_v4()).await.is_none());
    assert_eq!(manager.session_count("ana").await, 1);
}

#[tokio::test]
async fn disconnect_user_drops_every_session() {
    let manager = ConnectionManager::new();
    let (phone_tx, mut phone_rx) = session_queue(8);
    let (desktop_tx, _desktop_rx) = session_queue(8);

    manager.add_session("ana".to_string(), phone_tx).await;
    manager.add_session("ana".to_string(), desktop_tx).await;

    manager.disconnect_user("ana").await;
    assert_eq!(manager.session_count("ana").await, 0);

    // Writes to a disconnected user go nowhere.
    manager.send_to_user("ana", "anyone?".to_string()).await;
    assert!(phone_rx.try_recv().is_err());
}

#[tokio::test]
async fn slow_consumer_loses_frames_without_blocking_the_rest() {
    let manager = ConnectionManager::new();
    let (slow_tx, mut slow_rx) = session_queue(1);
    let (fast_tx, mut fast_rx) = session_queue(8);

    manager.add_session("ana".to_string(), slow_tx).await;
    manager.add_session("ana".to_string(), fast_tx).await;

    manager.send_to_user("ana", "frame-1".to_string()).await;
    manager.send_to_user("ana", "frame-2".to_string()).await;
    manager.send_to_user("ana", "frame-3".to_string()).await;

    // The slow session kept only what fit in its queue.
    assert_eq!(slow_rx.try_recv().as_deref(), Ok("frame-1"));
    assert!(slow_rx.try_recv().is_err());

    // The fast session saw everything.
    assert_eq!(fast_rx.try_recv().as_deref(), Ok("frame-1"));
    assert_eq!(fast_rx.try_recv().as_deref(), Ok("frame-2"));
    assert_eq!(fast_rx.try_recv().as_deref(), Ok("frame-3"));
}

#[tokio::test]
async fn concurrent_adds_land_in_one_registry() {
    let manager = ConnectionManager::new();

    let mut handles = Vec::new();
    for _ in 0..32 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            let (tx, _rx) = session_queue(8);
            manager.add_session("ana".to_string(), tx).await;
        }));
    }
    for handle in handles {
        handle.await.expect("join add task");
    }

    assert_eq!(manager.session_count("ana").await, 32);
    assert_eq!(manager.connected_users().await, 1);
}
