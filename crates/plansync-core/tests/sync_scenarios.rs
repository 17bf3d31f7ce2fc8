//! End-to-end session scenarios on paused time
//!
//! With default timings a session signed in at t=0 finishes its handshake at
//! 300ms and polls at 1800ms, 3300ms, 4800ms, ...

use plansync_core::{ErrorKind, OutboundMessage, SyncConfig, SyncError, SyncState};
use plansync_test_utils::{
    advance_ms, doc_path, elapsed_ms, plan_tool, storage, until_ms, Device, ScriptedRemote,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;

fn device(remote: &ScriptedRemote) -> Device {
    Device::new(plan_tool(), remote, SyncConfig::default())
}

#[tokio::test(start_paused = true)]
async fn sign_in_pulls_remote_document_and_signals_child() {
    let remote = ScriptedRemote::new();
    remote
        .seed(&doc_path("u1", "plan"), &[("plan_u1", Some(r#"{"vision":"X"}"#))])
        .await;
    let mut dev = device(&remote);

    dev.sign_in("u1");
    assert_eq!(dev.state(), SyncState::Loading);
    advance_ms(400).await;

    assert_eq!(dev.get("plan_u1").as_deref(), Some(r#"{"vision":"X"}"#));
    assert_eq!(dev.state(), SyncState::Ready);
    assert_eq!(
        dev.child.messages(),
        vec![
            OutboundMessage::SetIdentity {
                identity: "u1".into()
            },
            OutboundMessage::DataReady,
        ]
    );

    advance_ms(5000).await;
    assert_eq!(remote.save_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn edits_within_one_window_produce_one_save() {
    let remote = ScriptedRemote::new();
    let mut dev = device(&remote);
    let start = Instant::now();
    dev.sign_in("u1");

    until_ms(start, 400).await;
    dev.set("plan_u1", "A");
    advance_ms(100).await;
    dev.set("plan_u1", "B");
    advance_ms(100).await;
    dev.set("plan_u1", "C");

    until_ms(start, 8000).await;
    let saves = remote.saves();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].storage, storage(&[("plan_u1", Some("C"))]));
    assert_eq!(saves[0].path, doc_path("u1", "plan"));
    assert!((2700..=2710).contains(&elapsed_ms(start, saves[0].at)));
    assert_eq!(dev.status().pushes, 1);
}

// Polling alone sees B at the 1800ms tick; when the quiet period ends at
// 2700ms the store holds C, so it restarts and C goes out at 3600ms. The
// 2900ms timing needs the host to report the change, see
// host_notification_pushes_last_change_after_one_quiet_period.
#[tokio::test(start_paused = true)]
async fn polling_alone_restarts_quiet_period_at_its_deadline() {
    let remote = ScriptedRemote::new();
    remote
        .seed(&doc_path("u1", "plan"), &[("plan_u1", Some("A"))])
        .await;
    let mut dev = device(&remote);
    let start = Instant::now();
    dev.sign_in("u1");

    until_ms(start, 1700).await;
    dev.set("plan_u1", "B");
    until_ms(start, 2000).await;
    dev.set("plan_u1", "C");

    until_ms(start, 8000).await;
    let saves = remote.saves();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].storage, storage(&[("plan_u1", Some("C"))]));
    assert!((3600..=3610).contains(&elapsed_ms(start, saves[0].at)));
}

#[tokio::test(start_paused = true)]
async fn host_notification_pushes_last_change_after_one_quiet_period() {
    let remote = ScriptedRemote::new();
    remote
        .seed(&doc_path("u1", "plan"), &[("plan_u1", Some("A"))])
        .await;
    let mut dev = device(&remote);
    let start = Instant::now();
    dev.sign_in("u1");

    until_ms(start, 1700).await;
    dev.set("plan_u1", "B");
    until_ms(start, 2000).await;
    dev.set("plan_u1", "C");
    dev.session().local_changed();

    until_ms(start, 8000).await;
    let saves = remote.saves();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].storage, storage(&[("plan_u1", Some("C"))]));
    assert!((2900..=2910).contains(&elapsed_ms(start, saves[0].at)));
}

#[tokio::test(start_paused = true)]
async fn flush_skips_the_quiet_period() {
    let remote = ScriptedRemote::new();
    let mut dev = device(&remote);
    let start = Instant::now();
    dev.sign_in("u1");

    until_ms(start, 500).await;
    dev.set("plan_u1", "now");
    dev.session().flush();
    advance_ms(10).await;

    let saves = remote.saves();
    assert_eq!(saves.len(), 1);
    assert!((500..=510).contains(&elapsed_ms(start, saves[0].at)));

    until_ms(start, 6000).await;
    assert_eq!(remote.save_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn sign_out_cancels_pending_push() {
    let remote = ScriptedRemote::new();
    let mut dev = device(&remote);
    let start = Instant::now();
    dev.sign_in("u1");

    until_ms(start, 1700).await;
    dev.set("plan_u1", "B");
    until_ms(start, 2000).await;
    dev.sign_out();
    assert_eq!(dev.state(), SyncState::SignedOut);
    let sent = dev.child.messages().len();

    until_ms(start, 8000).await;
    assert_eq!(remote.save_attempts(), 0);
    assert_eq!(remote.store().raw_document(&doc_path("u1", "plan")), None);
    assert_eq!(dev.child.messages().len(), sent);
    assert_eq!(dev.state(), SyncState::SignedOut);
}

#[tokio::test(start_paused = true)]
async fn unavailable_backend_heals_on_next_push() {
    let remote = ScriptedRemote::new();
    remote.fail_next_save(SyncError::BackendUnavailable("offline".into()));
    let mut dev = device(&remote);
    let start = Instant::now();
    dev.sign_in("u1");

    until_ms(start, 1700).await;
    dev.set("plan_u1", "B");

    until_ms(start, 3000).await;
    assert_eq!(remote.save_attempts(), 1);
    assert_eq!(dev.state(), SyncState::Error);
    assert_eq!(
        dev.status().last_error.map(|e| e.kind),
        Some(ErrorKind::BackendUnavailable)
    );

    until_ms(start, 4500).await;
    assert_eq!(remote.save_attempts(), 2);
    assert_eq!(remote.save_count(), 1);
    assert_eq!(dev.state(), SyncState::Ready);
    assert_eq!(dev.status().last_error, None);
}

#[tokio::test(start_paused = true)]
async fn permission_denied_waits_for_retry() {
    let remote = ScriptedRemote::new();
    remote.fail_next_save(SyncError::PermissionDenied("rules".into()));
    let mut dev = device(&remote);
    let start = Instant::now();
    dev.sign_in("u1");

    until_ms(start, 1700).await;
    dev.set("plan_u1", "B");

    until_ms(start, 8000).await;
    assert_eq!(remote.save_attempts(), 1);
    assert_eq!(dev.state(), SyncState::Error);

    dev.session().retry();
    advance_ms(1000).await;
    assert_eq!(remote.save_count(), 1);
    assert_eq!(dev.state(), SyncState::Ready);
}

#[tokio::test(start_paused = true)]
async fn failed_initial_load_recovers_through_subscription() {
    let remote = ScriptedRemote::new();
    remote
        .seed(&doc_path("u1", "plan"), &[("plan_u1", Some("remote"))])
        .await;
    remote.fail_next_load(SyncError::BackendUnavailable("offline".into()));
    let mut dev = device(&remote);
    dev.set("plan_u1", "local");
    let start = Instant::now();
    dev.sign_in("u1");

    advance_ms(1).await;
    assert_eq!(dev.get("plan_u1").as_deref(), Some("local"));

    until_ms(start, 400).await;
    assert_eq!(dev.state(), SyncState::Ready);
    assert_eq!(dev.get("plan_u1").as_deref(), Some("remote"));
    assert_eq!(dev.child.data_ready_count(), 2);

    until_ms(start, 8000).await;
    assert_eq!(remote.save_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_initial_load_without_document_pushes_local_state() {
    let remote = ScriptedRemote::new();
    remote.fail_next_load(SyncError::BackendUnavailable("offline".into()));
    let mut dev = device(&remote);
    dev.set("plan_u1", "L");
    let start = Instant::now();
    dev.sign_in("u1");

    until_ms(start, 400).await;
    assert_eq!(dev.state(), SyncState::Ready);
    assert_eq!(dev.get("plan_u1").as_deref(), Some("L"));

    until_ms(start, 30_000).await;
    let saves = remote.saves();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].storage, storage(&[("plan_u1", Some("L"))]));
    assert_eq!(dev.state(), SyncState::Ready);
}

#[tokio::test(start_paused = true)]
async fn missing_backend_configuration_blocks_pushes() {
    let remote = ScriptedRemote::new();
    remote.fail_next_load(SyncError::NotConfigured("no endpoint".into()));
    let mut dev = device(&remote);
    let start = Instant::now();
    dev.sign_in("u1");

    until_ms(start, 400).await;
    assert_eq!(dev.state(), SyncState::Error);
    assert_eq!(
        dev.status().last_error.map(|e| e.kind),
        Some(ErrorKind::NotConfigured)
    );

    dev.set("plan_u1", "B");
    until_ms(start, 8000).await;
    assert_eq!(remote.save_attempts(), 0);
    assert_eq!(dev.state(), SyncState::Error);
}

#[tokio::test(start_paused = true)]
async fn applied_remote_change_is_not_pushed_back() {
    let remote = ScriptedRemote::new();
    let mut dev = device(&remote);
    let start = Instant::now();
    dev.sign_in("u1");

    until_ms(start, 1000).await;
    remote
        .seed(&doc_path("u1", "plan"), &[("plan_u1", Some("R"))])
        .await;
    advance_ms(10).await;
    assert_eq!(dev.get("plan_u1").as_deref(), Some("R"));
    assert_eq!(dev.child.data_ready_count(), 2);

    until_ms(start, 10_000).await;
    assert_eq!(remote.save_attempts(), 0);
    assert_eq!(dev.status().remote_applies, 1);
    assert_eq!(dev.child.data_ready_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn remote_removal_clears_local_key() {
    let remote = ScriptedRemote::new();
    let path = doc_path("u1", "plan");
    remote.seed(&path, &[("plan_u1", Some("R"))]).await;
    let mut dev = device(&remote);
    let start = Instant::now();
    dev.sign_in("u1");

    until_ms(start, 1000).await;
    remote.seed(&path, &[("plan_u1", None)]).await;
    advance_ms(10).await;
    assert_eq!(dev.get("plan_u1"), None);

    until_ms(start, 8000).await;
    assert_eq!(remote.save_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn two_devices_converge_without_echo() {
    let remote = ScriptedRemote::new();
    let mut a = device(&remote);
    let mut b = device(&remote);
    let start = Instant::now();
    a.sign_in("u1");
    b.sign_in("u1");

    until_ms(start, 1700).await;
    a.set("plan_u1", "from-a");
    until_ms(start, 5000).await;
    assert_eq!(b.get("plan_u1").as_deref(), Some("from-a"));
    assert_eq!(remote.save_count(), 1);
    assert_eq!(a.child.data_ready_count(), 1);
    assert_eq!(b.child.data_ready_count(), 2);

    until_ms(start, 5100).await;
    b.set("plan_u1", "from-b");
    until_ms(start, 9000).await;
    assert_eq!(a.get("plan_u1").as_deref(), Some("from-b"));
    assert_eq!(remote.save_count(), 2);
    assert_eq!(a.status().pushes, 1);
    assert_eq!(b.status().pushes, 1);
}

#[tokio::test(start_paused = true)]
async fn push_overtaken_by_remote_write_adopts_committed_value() {
    let remote = ScriptedRemote::new();
    remote.set_save_delay(Duration::from_millis(2000));
    let path = doc_path("u1", "plan");
    let mut dev = device(&remote);
    let start = Instant::now();
    dev.sign_in("u1");

    until_ms(start, 500).await;
    dev.set("plan_u1", "X");
    dev.session().flush();

    // another writer commits while X is still on its way
    until_ms(start, 1000).await;
    remote.seed(&path, &[("plan_u1", Some("Y"))]).await;
    advance_ms(10).await;
    assert_eq!(dev.get("plan_u1").as_deref(), Some("Y"));

    until_ms(start, 20_000).await;
    let raw = remote.store().raw_document(&path).unwrap();
    assert_eq!(raw["storage"]["plan_u1"], "X");
    assert_eq!(dev.get("plan_u1").as_deref(), Some("X"));
    assert_eq!(dev.state(), SyncState::Ready);
    assert_eq!(remote.save_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn another_device_restoring_an_older_value_is_applied() {
    let remote = ScriptedRemote::new();
    let path = doc_path("u1", "plan");
    let mut dev = device(&remote);
    let start = Instant::now();
    dev.sign_in("u1");

    until_ms(start, 500).await;
    dev.set("plan_u1", "1");
    dev.session().flush();
    until_ms(start, 1000).await;
    dev.set("plan_u1", "2");
    dev.session().flush();

    until_ms(start, 1200).await;
    remote.seed(&path, &[("plan_u1", Some("1"))]).await;
    advance_ms(10).await;
    assert_eq!(dev.get("plan_u1").as_deref(), Some("1"));

    until_ms(start, 8000).await;
    assert_eq!(remote.save_count(), 2);
    assert_eq!(dev.get("plan_u1").as_deref(), Some("1"));
}

#[tokio::test(start_paused = true)]
async fn slow_saves_are_serialized() {
    let remote = ScriptedRemote::new();
    remote.set_save_delay(Duration::from_millis(2000));
    let mut dev = device(&remote);
    let start = Instant::now();
    dev.sign_in("u1");

    until_ms(start, 1700).await;
    dev.set("plan_u1", "B");
    until_ms(start, 3000).await;
    assert_eq!(dev.state(), SyncState::Saving);
    dev.set("plan_u1", "C");

    until_ms(start, 12_000).await;
    let saves = remote.saves();
    assert_eq!(saves.len(), 2);
    assert_eq!(saves[0].storage, storage(&[("plan_u1", Some("B"))]));
    assert_eq!(saves[1].storage, storage(&[("plan_u1", Some("C"))]));
    assert!(saves[1].at.duration_since(saves[0].at) >= Duration::from_millis(2000));
    assert_eq!(dev.state(), SyncState::Ready);
}

#[tokio::test(start_paused = true)]
async fn identity_switch_detaches_previous_session() {
    let remote = ScriptedRemote::new();
    let u1 = doc_path("u1", "plan");
    let u2 = doc_path("u2", "plan");
    remote.seed(&u1, &[("plan_u1", Some("one"))]).await;
    remote.seed(&u2, &[("plan_u2", Some("two"))]).await;
    let mut dev = device(&remote);
    let start = Instant::now();
    dev.sign_in("u1");

    until_ms(start, 1000).await;
    assert_eq!(dev.get("plan_u1").as_deref(), Some("one"));
    let first_generation = dev.status().generation;

    dev.sign_in("u2");
    assert_eq!(remote.store().subscriber_count(&u1), 0);
    assert!(dev.status().generation > first_generation);

    until_ms(start, 1500).await;
    remote.seed(&u1, &[("plan_u1", Some("late"))]).await;

    until_ms(start, 6000).await;
    assert_eq!(dev.get("plan_u1").as_deref(), Some("one"));
    assert_eq!(dev.get("plan_u2").as_deref(), Some("two"));
    assert!(dev.child.messages().contains(&OutboundMessage::SetIdentity {
        identity: "u2".into()
    }));
    assert_eq!(remote.store().subscriber_count(&u2), 1);
    assert_eq!(remote.save_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn closed_subscription_is_reopened_on_next_tick() {
    let remote = ScriptedRemote::new();
    let path = doc_path("u1", "plan");
    let mut dev = device(&remote);
    let start = Instant::now();
    dev.sign_in("u1");

    until_ms(start, 1000).await;
    remote.store().close_subscriptions(&path);
    advance_ms(10).await;
    assert_eq!(dev.state(), SyncState::Error);
    assert_eq!(
        dev.status().last_error.map(|e| e.kind),
        Some(ErrorKind::SubscriptionClosed)
    );
    assert_eq!(remote.store().subscriber_count(&path), 0);

    until_ms(start, 1900).await;
    assert_eq!(dev.state(), SyncState::Ready);
    assert_eq!(remote.store().subscriber_count(&path), 1);

    remote.seed(&path, &[("plan_u1", Some("after"))]).await;
    advance_ms(10).await;
    assert_eq!(dev.get("plan_u1").as_deref(), Some("after"));
}

#[tokio::test(start_paused = true)]
async fn malformed_document_is_treated_as_missing() {
    let remote = ScriptedRemote::new();
    let path = doc_path("u1", "plan");
    remote.store().put_raw(&path, json!({"storage": [1, 2]}));
    let mut dev = device(&remote);
    dev.set("plan_u1", "L");
    let start = Instant::now();
    dev.sign_in("u1");

    until_ms(start, 400).await;
    assert_eq!(dev.state(), SyncState::Ready);
    assert_eq!(dev.get("plan_u1").as_deref(), Some("L"));

    until_ms(start, 3000).await;
    assert_eq!(remote.save_count(), 1);
    let raw = remote.store().raw_document(&path).unwrap();
    assert_eq!(raw["storage"]["plan_u1"], "L");
}

#[tokio::test(start_paused = true)]
async fn foreign_keys_in_document_are_left_alone() {
    let remote = ScriptedRemote::new();
    let path = doc_path("u1", "plan");
    remote
        .seed(&path, &[("plan_u1", Some("mine")), ("other_tool", Some("x"))])
        .await;
    let mut dev = device(&remote);
    dev.set("other_tool", "local-only");
    dev.sign_in("u1");

    advance_ms(400).await;
    assert_eq!(dev.get("plan_u1").as_deref(), Some("mine"));
    assert_eq!(dev.get("other_tool").as_deref(), Some("local-only"));
}

#[tokio::test(start_paused = true)]
async fn guest_never_syncs() {
    let remote = ScriptedRemote::new();
    let mut dev = device(&remote);
    dev.sign_out();
    dev.set("plan_", "guest data");

    advance_ms(8000).await;
    assert!(dev.controller.session().is_none());
    assert_eq!(dev.state(), SyncState::SignedOut);
    assert!(dev.child.messages().is_empty());
    assert_eq!(remote.save_attempts(), 0);
}
