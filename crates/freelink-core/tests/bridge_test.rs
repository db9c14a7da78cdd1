#![allow(clippy::unwrap_used)]
// End-to-end bridge tests against a wiremock gateway: connect, poll
// reconciliation, command dispatch, and failure isolation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use freelink_api::AppCredential;
use freelink_core::{
    AlarmMode, Category, Command, CoreError, CredentialStore, DeviceState, FreeboxBridge,
    GatewayConfig, PairingStatus, Snapshot, SnapshotOrigin, TargetId, TlsVerification,
};

// ── Helpers ─────────────────────────────────────────────────────────

/// In-memory credential store standing in for the host platform.
#[derive(Default)]
struct MemoryStore(Mutex<Option<AppCredential>>);

impl MemoryStore {
    fn paired() -> Self {
        Self(Mutex::new(Some(AppCredential {
            app_id: "fr.test.app".into(),
            app_token: SecretString::from("test-app-token".to_owned()),
            track_id: 42,
        })))
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self) -> Result<Option<AppCredential>, CoreError> {
        Ok(self.0.lock().unwrap().clone())
    }

    fn save(&self, credential: &AppCredential) -> Result<(), CoreError> {
        *self.0.lock().unwrap() = Some(credential.clone());
        Ok(())
    }
}

fn config_for(server: &MockServer, pending_timeout: Duration) -> GatewayConfig {
    GatewayConfig {
        url: Url::parse(&server.uri()).unwrap(),
        tls: TlsVerification::SystemDefaults,
        timeout: Duration::from_secs(2),
        // Long interval: every poll in these tests is an explicit refresh().
        poll_interval: Duration::from_secs(300),
        pending_timeout,
        ..GatewayConfig::default()
    }
}

fn envelope(result: serde_json::Value) -> serde_json::Value {
    json!({ "success": true, "result": result })
}

fn nodes_result(alarm_state: &str, shutter_wire_pos: u64) -> serde_json::Value {
    json!([
        {
            "id": 7,
            "label": "Volet salon",
            "category": "shutter",
            "show_endpoints": [
                { "id": 1, "name": "position_set", "ep_type": "slot" },
                { "id": 2, "name": "stop", "ep_type": "slot" },
                { "id": 3, "name": "position_set", "ep_type": "signal", "value": shutter_wire_pos }
            ],
            "type": { "inherit": "node::rts" }
        },
        {
            "id": 9,
            "label": "Alarme",
            "category": "alarm",
            "show_endpoints": [
                { "id": 20, "name": "alarm1", "ep_type": "slot" },
                { "id": 22, "name": "off", "ep_type": "slot" },
                { "id": 23, "name": "state", "ep_type": "signal", "value": alarm_state }
            ]
        },
        {
            "id": 11,
            "label": "Détecteur couloir",
            "category": "pir",
            "show_endpoints": [
                { "id": 30, "name": "trigger", "ep_type": "signal", "value": true }
            ]
        }
    ])
}

/// Mount the endpoints every connected bridge needs: the session
/// handshake, system identity, connection rates, and storage.
async fn mount_common(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/v6/login/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            json!({ "logged_in": false, "challenge": "challenge-abc" }),
        )))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v6/login/session/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            json!({ "session_token": "session-token-1", "permissions": { "home": true } }),
        )))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v6/system/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "mac": "68:A3:78:00:00:01",
            "serial": "3629012345",
            "firmware_version": "4.7.8",
            "sensors": [{ "id": "temp_cpum", "name": "CPU", "value": 58 }],
            "fans": [],
            "model_info": { "pretty_name": "Freebox Server (r2)", "has_home_automation": true }
        }))))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v6/connection/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            json!({ "rate_down": 1_000_000, "rate_up": 250_000 }),
        )))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v6/storage/disk/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!(null))))
        .mount(server)
        .await;
}

async fn mount_nodes(server: &MockServer, alarm_state: &str) {
    Mock::given(method("GET"))
        .and(path("/api/v6/home/nodes"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(envelope(nodes_result(alarm_state, 30))),
        )
        .mount(server)
        .await;
}

async fn mount_lan(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/v6/lan/browser/pub/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([{
            "l2ident": { "id": "AA:BB:CC:DD:EE:FF", "type": "mac_address" },
            "primary_name": "laptop",
            "active": true,
            "l3connectivities": [
                { "addr": "192.168.1.20", "af": "ipv4", "active": true, "reachable": true }
            ]
        }]))))
        .mount(server)
        .await;
}

async fn connected_bridge(server: &MockServer, pending_timeout: Duration) -> FreeboxBridge {
    let bridge = FreeboxBridge::new(
        config_for(server, pending_timeout),
        Arc::new(MemoryStore::paired()),
    );
    bridge.connect().await.unwrap();
    bridge
}

fn find(batch: &[Arc<Snapshot>], target: &TargetId) -> Arc<Snapshot> {
    batch
        .iter()
        .find(|s| s.target == *target)
        .cloned()
        .unwrap_or_else(|| panic!("no snapshot for {target}"))
}

// ── Connect & initial snapshots ─────────────────────────────────────

#[tokio::test]
async fn connect_publishes_every_category() {
    let server = MockServer::start().await;
    mount_common(&server).await;
    mount_nodes(&server, "idle").await;
    mount_lan(&server).await;

    let bridge = connected_bridge(&server, Duration::from_secs(30)).await;

    let shutters = bridge.snapshot(Category::Shutter);
    let shutter = find(&shutters, &TargetId::Node(7));
    // Wire position 30 on an RTS shutter is 70% open.
    assert_eq!(
        shutter.state,
        DeviceState::Shutter {
            position: 70,
            moving: false
        }
    );
    assert_eq!(shutter.origin, SnapshotOrigin::Polled);

    let alarms = bridge.snapshot(Category::Alarm);
    assert_eq!(
        find(&alarms, &TargetId::Node(9)).state,
        DeviceState::AlarmPanel {
            mode: AlarmMode::Disarmed
        }
    );

    assert_eq!(bridge.snapshot(Category::Sensor).len(), 1);
    assert_eq!(bridge.snapshot(Category::LanHost).len(), 1);
    assert!(!bridge.snapshot(Category::Metric).is_empty());

    let info = bridge.gateway_info().unwrap();
    assert_eq!(info.name.as_deref(), Some("Freebox Server (r2)"));
    assert_eq!(info.mac.unwrap().as_str(), "68:a3:78:00:00:01");

    bridge.shutdown().await;
}

// ── Optimistic command reconciliation ───────────────────────────────

#[tokio::test]
async fn arm_command_is_optimistic_until_poll_confirms() {
    let server = MockServer::start().await;
    mount_common(&server).await;
    mount_lan(&server).await;

    // The gateway keeps reporting "idle" for the connect poll and the
    // first post-command poll, then settles on "alarm1_armed".
    Mock::given(method("GET"))
        .and(path("/api/v6/home/nodes"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(envelope(nodes_result("idle", 30))),
        )
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_nodes(&server, "alarm1_armed").await;

    Mock::given(method("PUT"))
        .and(path("/api/v6/home/endpoints/9/20"))
        .and(body_json(json!({ "value": null })))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .expect(1)
        .mount(&server)
        .await;

    let bridge = connected_bridge(&server, Duration::from_secs(30)).await;

    bridge
        .dispatch(TargetId::Node(9), Command::ArmAway)
        .await
        .unwrap();

    // Device hasn't settled: the poll still sees "idle", but the
    // published state is the optimistic intent.
    bridge.refresh().await.unwrap();
    let alarm = find(&bridge.snapshot(Category::Alarm), &TargetId::Node(9));
    assert_eq!(
        alarm.state,
        DeviceState::AlarmPanel {
            mode: AlarmMode::ArmedAway
        }
    );
    assert_eq!(alarm.origin, SnapshotOrigin::Optimistic);

    // The gateway confirms; the pending command resolves.
    bridge.refresh().await.unwrap();
    let alarm = find(&bridge.snapshot(Category::Alarm), &TargetId::Node(9));
    assert_eq!(
        alarm.state,
        DeviceState::AlarmPanel {
            mode: AlarmMode::ArmedAway
        }
    );
    assert_eq!(alarm.origin, SnapshotOrigin::Polled);

    bridge.shutdown().await;
}

#[tokio::test]
async fn unconfirmed_command_reverts_to_polled_state() {
    let server = MockServer::start().await;
    mount_common(&server).await;
    mount_nodes(&server, "idle").await;
    mount_lan(&server).await;

    Mock::given(method("PUT"))
        .and(path("/api/v6/home/endpoints/9/20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .mount(&server)
        .await;

    // Zero timeout: the first reconciling poll already exceeds it.
    let bridge = connected_bridge(&server, Duration::ZERO).await;

    bridge
        .dispatch(TargetId::Node(9), Command::ArmAway)
        .await
        .unwrap();

    bridge.refresh().await.unwrap();
    let alarm = find(&bridge.snapshot(Category::Alarm), &TargetId::Node(9));
    assert_eq!(
        alarm.state,
        DeviceState::AlarmPanel {
            mode: AlarmMode::Disarmed
        },
        "polled truth wins after the timeout"
    );
    assert_eq!(alarm.origin, SnapshotOrigin::Unconfirmed);

    // The resolution is final: the next poll is back to normal.
    bridge.refresh().await.unwrap();
    let alarm = find(&bridge.snapshot(Category::Alarm), &TargetId::Node(9));
    assert_eq!(alarm.origin, SnapshotOrigin::Polled);

    bridge.shutdown().await;
}

#[tokio::test]
async fn shutter_position_command_inverts_wire_value() {
    let server = MockServer::start().await;
    mount_common(&server).await;
    mount_nodes(&server, "idle").await;
    mount_lan(&server).await;

    // 75% open on an RTS shutter is 25 on the wire.
    Mock::given(method("PUT"))
        .and(path("/api/v6/home/endpoints/7/1"))
        .and(body_json(json!({ "value": 25 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .expect(1)
        .mount(&server)
        .await;

    let bridge = connected_bridge(&server, Duration::from_secs(30)).await;

    bridge
        .dispatch(TargetId::Node(7), Command::SetShutterPosition { position: 75 })
        .await
        .unwrap();

    // Poll still reports the old position; the intent is published.
    bridge.refresh().await.unwrap();
    let shutter = find(&bridge.snapshot(Category::Shutter), &TargetId::Node(7));
    assert_eq!(
        shutter.state,
        DeviceState::Shutter {
            position: 75,
            moving: false
        }
    );
    assert_eq!(shutter.origin, SnapshotOrigin::Optimistic);

    bridge.shutdown().await;
}

// ── Failure isolation & recovery ────────────────────────────────────

#[tokio::test]
async fn lan_failure_keeps_previous_hosts_and_other_categories_update() {
    let server = MockServer::start().await;
    mount_common(&server).await;
    mount_nodes(&server, "idle").await;

    // LAN works for the connect poll, then starts failing.
    Mock::given(method("GET"))
        .and(path("/api/v6/lan/browser/pub/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([{
            "l2ident": { "id": "AA:BB:CC:DD:EE:FF", "type": "mac_address" },
            "primary_name": "laptop",
            "active": true
        }]))))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v6/lan/browser/pub/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let bridge = connected_bridge(&server, Duration::from_secs(30)).await;
    assert_eq!(bridge.snapshot(Category::LanHost).len(), 1);

    // The failing category is absorbed; the cycle still succeeds and
    // the other categories republish.
    bridge.refresh().await.unwrap();

    assert_eq!(
        bridge.snapshot(Category::LanHost).len(),
        1,
        "previous known-good hosts remain published"
    );
    assert_eq!(bridge.snapshot(Category::Shutter).len(), 1);
    assert!(bridge.store().last_poll().is_some());

    bridge.shutdown().await;
}

#[tokio::test]
async fn midpoll_session_rejection_recovers_transparently() {
    let server = MockServer::start().await;
    mount_common(&server).await;
    mount_lan(&server).await;

    // Connect poll succeeds, then the session is rejected once
    // (gateway rebooted); the re-authenticated retry succeeds.
    Mock::given(method("GET"))
        .and(path("/api/v6/home/nodes"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(envelope(nodes_result("idle", 30))),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v6/home/nodes"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "success": false,
            "error_code": "auth_required",
            "msg": "Invalid session token"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v6/home/nodes"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(envelope(nodes_result("alarm1_armed", 30))),
        )
        .mount(&server)
        .await;

    let bridge = connected_bridge(&server, Duration::from_secs(30)).await;

    // No error surfaces; the rejected request was retried after a fresh
    // handshake and the cycle completed.
    bridge.refresh().await.unwrap();
    let alarm = find(&bridge.snapshot(Category::Alarm), &TargetId::Node(9));
    assert_eq!(
        alarm.state,
        DeviceState::AlarmPanel {
            mode: AlarmMode::ArmedAway
        }
    );

    bridge.shutdown().await;
}

#[tokio::test]
async fn revoked_credential_surfaces_authentication_error() {
    let server = MockServer::start().await;
    mount_lan(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/v6/login/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            json!({ "logged_in": false, "challenge": "challenge-abc" }),
        )))
        .mount(&server)
        .await;
    // One successful session for connect, then the credential is revoked.
    Mock::given(method("POST"))
        .and(path("/api/v6/login/session/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            json!({ "session_token": "session-token-1", "permissions": {} }),
        )))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v6/login/session/"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "success": false,
            "error_code": "invalid_token",
            "msg": "Invalid app token"
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v6/system/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "mac": "68:A3:78:00:00:01",
            "sensors": [],
            "fans": []
        }))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v6/connection/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v6/storage/disk/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!(null))))
        .mount(&server)
        .await;

    // Home nodes succeed once (connect), then reject the session; the
    // renewal handshake then fails against the revoked credential.
    Mock::given(method("GET"))
        .and(path("/api/v6/home/nodes"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(envelope(nodes_result("idle", 30))),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v6/home/nodes"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "success": false,
            "error_code": "auth_required",
            "msg": "Invalid session token"
        })))
        .mount(&server)
        .await;

    let bridge = connected_bridge(&server, Duration::from_secs(30)).await;

    let result = bridge.refresh().await;
    assert!(
        matches!(result, Err(CoreError::AuthenticationFailed { .. })),
        "expected AuthenticationFailed, got: {result:?}"
    );

    bridge.shutdown().await;
}

// ── Command validation ──────────────────────────────────────────────

#[tokio::test]
async fn commands_are_validated_against_target_capability() {
    let server = MockServer::start().await;
    mount_common(&server).await;
    mount_nodes(&server, "idle").await;
    mount_lan(&server).await;

    let bridge = connected_bridge(&server, Duration::from_secs(30)).await;

    // A shutter command aimed at the alarm panel.
    let result = bridge
        .dispatch(TargetId::Node(9), Command::SetShutterPosition { position: 50 })
        .await;
    assert!(
        matches!(result, Err(CoreError::UnsupportedCommand { .. })),
        "expected UnsupportedCommand, got: {result:?}"
    );

    // This panel has no night zone, so arm-home has no slot to hit.
    let result = bridge.dispatch(TargetId::Node(9), Command::ArmHome).await;
    assert!(matches!(result, Err(CoreError::UnsupportedCommand { .. })));

    // Unknown target.
    let result = bridge.dispatch(TargetId::Node(99), Command::OpenShutter).await;
    assert!(matches!(result, Err(CoreError::TargetNotFound { .. })));

    // Reboot only addresses the gateway.
    let result = bridge.dispatch(TargetId::Node(7), Command::Reboot).await;
    assert!(matches!(result, Err(CoreError::UnsupportedCommand { .. })));

    bridge.shutdown().await;
}

#[tokio::test]
async fn failed_write_removes_pending_and_surfaces_error() {
    let server = MockServer::start().await;
    mount_common(&server).await;
    mount_nodes(&server, "idle").await;
    mount_lan(&server).await;

    Mock::given(method("PUT"))
        .and(path("/api/v6/home/endpoints/9/20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error_code": "invalid_value",
            "msg": "rejected"
        })))
        .mount(&server)
        .await;

    let bridge = connected_bridge(&server, Duration::from_secs(30)).await;

    let result = bridge.dispatch(TargetId::Node(9), Command::ArmAway).await;
    assert!(
        matches!(result, Err(CoreError::Api { .. })),
        "expected Api error, got: {result:?}"
    );

    // Nothing to poll for: the next cycle publishes plain polled state.
    bridge.refresh().await.unwrap();
    let alarm = find(&bridge.snapshot(Category::Alarm), &TargetId::Node(9));
    assert_eq!(alarm.origin, SnapshotOrigin::Polled);
    assert_eq!(
        alarm.state,
        DeviceState::AlarmPanel {
            mode: AlarmMode::Disarmed
        }
    );

    bridge.shutdown().await;
}

#[tokio::test]
async fn dispatch_before_connect_is_rejected() {
    let server = MockServer::start().await;
    let bridge = FreeboxBridge::new(
        config_for(&server, Duration::from_secs(30)),
        Arc::new(MemoryStore::paired()),
    );

    let result = bridge.dispatch(TargetId::Node(7), Command::OpenShutter).await;
    assert!(matches!(result, Err(CoreError::NotConnected)));
}

// ── Pairing ─────────────────────────────────────────────────────────

#[tokio::test]
async fn pairing_flow_saves_credential_once_granted() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v6/login/authorize/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            json!({ "app_token": "fresh-token", "track_id": 101 }),
        )))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v6/login/authorize/101"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            json!({ "status": "pending" }),
        )))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v6/login/authorize/101"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            json!({ "status": "granted" }),
        )))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::default());
    let bridge = FreeboxBridge::new(
        config_for(&server, Duration::from_secs(30)),
        Arc::clone(&store) as Arc<dyn CredentialStore>,
    );

    assert_eq!(bridge.pairing_status().await.unwrap(), PairingStatus::Unpaired);

    bridge.start_pairing().await.unwrap();
    assert_eq!(
        bridge.pairing_status().await.unwrap(),
        PairingStatus::AwaitingConfirmation,
        "button not pressed yet"
    );

    assert_eq!(bridge.pairing_status().await.unwrap(), PairingStatus::Paired);
    let saved = store.load().unwrap().expect("credential persisted");
    assert_eq!(saved.track_id, 101);

    // Once paired, the status sticks without further gateway calls.
    assert_eq!(bridge.pairing_status().await.unwrap(), PairingStatus::Paired);
}
