//! Integration tests for the event channel and log-line projection

use apkforge_events::{
    channel, AppEvent, DownloadEvent, EventEmitter, EventLevel, GeneralEvent, InstallEvent,
};

#[tokio::test]
async fn channel_delivers_in_order() {
    let (tx, mut rx) = channel();
    tx.emit_debug("first");
    tx.emit_warning("second");
    tx.emit_error("third");

    let levels: Vec<EventLevel> = [
        rx.recv().await.unwrap(),
        rx.recv().await.unwrap(),
        rx.recv().await.unwrap(),
    ]
    .iter()
    .map(|e| e.log_line().0)
    .collect();
    assert_eq!(
        levels,
        vec![EventLevel::Debug, EventLevel::Warning, EventLevel::Error]
    );
}

#[test]
fn emit_survives_dropped_receiver() {
    let (tx, rx) = channel();
    drop(rx);
    // Must not panic or error; senders outlive consumers in the UI.
    tx.emit_debug("nobody listening");
}

#[test]
fn log_lines_carry_context() {
    let event = AppEvent::Download(DownloadEvent::Completed {
        url: "https://mirror.example/base.apk".to_string(),
        size: 1024,
    });
    let (level, message) = event.log_line();
    assert_eq!(level, EventLevel::Info);
    assert!(message.contains("base.apk"));
    assert!(message.contains("1024"));

    let event = AppEvent::Install(InstallEvent::Failed {
        session_id: 3,
        code: 6,
        message: "not enough space".to_string(),
    });
    let (level, message) = event.log_line();
    assert_eq!(level, EventLevel::Error);
    assert!(message.contains("(6)"));
}

#[test]
fn events_serialize_with_domain_and_type_tags() {
    let event = AppEvent::General(GeneralEvent::OperationStarted {
        operation: "patch".to_string(),
    });
    let json = serde_json::to_string(&event).unwrap();
    assert!(json.contains("\"domain\":\"general\""));
    assert!(json.contains("\"type\":\"operation_started\""));

    let back: AppEvent = serde_json::from_str(&json).unwrap();
    assert!(matches!(
        back,
        AppEvent::General(GeneralEvent::OperationStarted { .. })
    ));
}
