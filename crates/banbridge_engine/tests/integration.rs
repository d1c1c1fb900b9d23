//! End-to-end tests for the bridge against a scripted backend.

use banbridge_engine::{
    BackendClient, Bridge, BridgeConfig, GameHost, MemoryUsage, MockHttpClient, MockReply,
    OnlinePlayer,
};
use banbridge_protocol::{paths, PresenceRequest, StatsBatchRequest};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A game server with a mutable player list.
#[derive(Default)]
struct FakeServer {
    players: Mutex<Vec<OnlinePlayer>>,
    kicked: Mutex<Vec<(String, String)>>,
    stopped: AtomicBool,
}

impl FakeServer {
    fn with_players(players: Vec<OnlinePlayer>) -> Self {
        Self {
            players: Mutex::new(players),
            ..Default::default()
        }
    }
}

impl GameHost for FakeServer {
    fn online_players(&self) -> Vec<OnlinePlayer> {
        self.players.lock().clone()
    }

    fn max_players(&self) -> i64 {
        20
    }

    fn ticks_per_second(&self) -> Option<f64> {
        Some(19.9)
    }

    fn memory(&self) -> MemoryUsage {
        MemoryUsage {
            used_bytes: 512 * 1024 * 1024,
            max_bytes: 2048 * 1024 * 1024,
        }
    }

    fn cpu_load(&self) -> Option<f64> {
        Some(0.35)
    }

    fn kick(&self, subject_id: &str, message: &str) -> bool {
        let mut players = self.players.lock();
        let before = players.len();
        players.retain(|p| p.subject_id != subject_id);
        if players.len() == before {
            return false;
        }
        self.kicked
            .lock()
            .push((subject_id.to_string(), message.to_string()));
        true
    }

    fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

fn config(dir: &std::path::Path) -> BridgeConfig {
    BridgeConfig::new("http://backend:8080/", "lobby-1", "secret")
        .with_data_dir(dir)
        .with_retry(2, Duration::from_millis(50), Duration::from_millis(100))
        .normalized()
}

fn make_bridge(dir: &std::path::Path, host: FakeServer) -> Arc<Bridge<MockHttpClient, FakeServer>> {
    bridge_with(config(dir), host)
}

fn bridge_with(config: BridgeConfig, host: FakeServer) -> Arc<Bridge<MockHttpClient, FakeServer>> {
    let client = BackendClient::new(&config, MockHttpClient::new());
    Arc::new(Bridge::new(config, client, host, None))
}

const FEED: &str = r#"{
    "serverTime": "2024-01-02T00:00:00Z",
    "changes": [
        {"type": "BAN_UPSERT", "banId": 1, "subjectId": "P1", "reason": "xray",
         "createdAt": "2024-01-01T00:00:00Z", "expiresAt": null, "revokedAt": null,
         "updatedAt": "2024-01-01T00:00:00Z"},
        {"type": "BAN_UPSERT", "banId": 2, "xuid": "P2", "reason": null,
         "expiresAt": "2999-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:09Z"}
    ]
}"#;

#[tokio::test]
async fn ban_sync_kicks_online_players_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeServer::with_players(vec![
        OnlinePlayer::new("P1", "Steve"),
        OnlinePlayer::new("P3", "Alex"),
    ]);
    let bridge = make_bridge(dir.path(), host);
    let http = bridge.client().http();
    http.push_reply(paths::BAN_CHANGES, MockReply::json(200, FEED));
    http.set_reply(
        paths::BAN_CHANGES,
        MockReply::json(200, r#"{"serverTime":"2024-01-02T00:00:10Z","changes":[]}"#),
    );

    let outcome = bridge.sync_bans().await.unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.newly_banned.len(), 2);

    let kicked = bridge.host().kicked.lock().clone();
    assert_eq!(kicked.len(), 1);
    assert_eq!(kicked[0].0, "P1");
    assert_eq!(
        kicked[0].1,
        "You are banned.\nReason: xray\nDuration: Permanent"
    );

    assert!(bridge.check_login("P2", "Notch").unwrap().contains("Expires: 2999-01-01T00:00:00Z"));
    assert!(bridge.check_login("P3", "Alex").is_none());
    assert!(config(dir.path()).ban_cache_path().exists());

    // Second poll sends the advanced cursor and changes nothing.
    let outcome = bridge.sync_bans().await.unwrap();
    assert!(!outcome.changed);
    let second = &http.requests_to(paths::BAN_CHANGES)[1];
    assert_eq!(second.url.query(), Some("since=2024-01-01T00%3A00%3A09Z"));

    // A restarted bridge resumes from the persisted cursor.
    let restarted = make_bridge(dir.path(), FakeServer::default());
    assert_eq!(restarted.bans().load(), 2);
    assert_eq!(
        restarted.bans().begin_sync().since_param(),
        "2024-01-01T00:00:09Z"
    );
}

#[tokio::test]
async fn refresh_command_resets_cache_and_resyncs_from_epoch() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = make_bridge(dir.path(), FakeServer::default());
    let http = bridge.client().http();
    http.set_reply(paths::BAN_CHANGES, MockReply::json(200, FEED));
    http.set_reply(
        paths::COMMANDS_POLL,
        MockReply::json(
            200,
            r#"{"serverTime":"2024-01-02T00:00:00Z","commands":[{"id":41,"cmdType":"REFRESH_BANS"}]}"#,
        ),
    );
    http.set_reply(paths::COMMANDS_ACK, MockReply::status(200));

    bridge.sync_bans().await.unwrap();
    assert_eq!(bridge.bans().len(), 2);

    let summary = bridge.poll_commands().await;
    assert_eq!(summary.acknowledged, 1);
    assert_eq!(bridge.commands().watermark(), 41);
    assert!(bridge.bans().is_empty());
    assert!(!config(dir.path()).ban_cache_path().exists());

    // Redelivery of the same id is ignored.
    let summary = bridge.poll_commands().await;
    assert_eq!(summary.skipped, 1);
    assert_eq!(http.count(paths::COMMANDS_ACK), 1);

    bridge.sync_bans().await.unwrap();
    let last = http.requests_to(paths::BAN_CHANGES).pop().unwrap();
    assert_eq!(last.url.query(), Some("since=1970-01-01T00%3A00%3A00Z"));
    assert_eq!(bridge.bans().len(), 2);
}

#[tokio::test]
async fn shutdown_command_stops_host() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = make_bridge(dir.path(), FakeServer::default());
    let http = bridge.client().http();
    http.set_reply(
        paths::COMMANDS_POLL,
        MockReply::json(200, r#"{"commands":[{"id":1,"cmdType":"shutdown"}]}"#),
    );
    http.set_reply(paths::COMMANDS_ACK, MockReply::status(200));

    bridge.poll_commands().await;
    assert!(bridge.host().stopped.load(Ordering::SeqCst));
    assert_eq!(bridge.commands().watermark(), 1);
}

#[tokio::test(start_paused = true)]
async fn periodic_triggers_run_until_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeServer::with_players(vec![OnlinePlayer {
        subject_id: "P1".into(),
        name: "Steve".into(),
        ip: Some("10.0.0.5".into()),
        hwid: None,
    }]);
    // Flush after the first playtime tick so the batch content is deterministic.
    let mut settings = config(dir.path());
    settings.sync.stats_flush_seconds = 70;
    let bridge = bridge_with(settings, host);
    let http = bridge.client().http();
    http.set_reply(
        paths::HEALTH,
        MockReply::json(200, r#"{"status":"ok","serverTime":"now","dbOk":true}"#),
    );
    http.set_reply(
        paths::BAN_CHANGES,
        MockReply::json(200, r#"{"changes":[]}"#),
    );
    http.set_reply(paths::PRESENCE, MockReply::status(204));
    http.set_reply(paths::METRICS, MockReply::status(204));
    http.set_reply(paths::STATS_BATCH, MockReply::status(204));
    http.set_reply(paths::COMMANDS_POLL, MockReply::json(200, r#"{"commands":[]}"#));

    let tasks = bridge.start().await;
    assert_eq!(tasks.len(), 6);

    // Past the first playtime tick and the first stats flush.
    tokio::time::sleep(Duration::from_secs(71)).await;

    assert_eq!(http.count(paths::HEALTH), 1);
    assert!(http.count(paths::BAN_CHANGES) >= 6);
    assert!(http.count(paths::COMMANDS_POLL) >= 20);
    assert!(http.count(paths::METRICS) >= 4);
    assert!(http.count(paths::PRESENCE) >= 4);

    let presence: PresenceRequest = serde_json::from_slice(
        http.requests_to(paths::PRESENCE)[0].body.as_deref().unwrap(),
    )
    .unwrap();
    assert!(presence.snapshot);
    assert_eq!(presence.players[0].ip.as_deref(), Some("10.0.0.5"));
    assert_eq!(presence.players[0].online, Some(true));

    let flushed: Vec<StatsBatchRequest> = http
        .requests_to(paths::STATS_BATCH)
        .iter()
        .map(|r| serde_json::from_slice(r.body.as_deref().unwrap()).unwrap())
        .collect();
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].players[0].playtime_delta_seconds, 60);
    assert_eq!(flushed[0].players[0].name, "Steve");

    bridge.shutdown().await;
    for task in tasks {
        task.await.unwrap();
    }

    let last_presence: PresenceRequest = serde_json::from_slice(
        http.requests_to(paths::PRESENCE)
            .last()
            .unwrap()
            .body
            .as_deref()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(last_presence, PresenceRequest::offline());
    assert!(config(dir.path()).ban_cache_path().exists());

    // Nothing runs after shutdown.
    let polls = http.count(paths::COMMANDS_POLL);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(http.count(paths::COMMANDS_POLL), polls);

    // A second shutdown is a no-op.
    let reports = http.count(paths::PRESENCE);
    bridge.shutdown().await;
    assert_eq!(http.count(paths::PRESENCE), reports);
}

#[tokio::test]
async fn unreachable_backend_degrades_to_empty_results() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = make_bridge(dir.path(), FakeServer::default());

    assert!(bridge.health_check().await.is_none());
    assert!(bridge.sync_bans().await.is_none());
    assert!(!bridge.push_presence().await);
    assert_eq!(bridge.poll_commands().await.received, 0);

    bridge.stats().record_playtime("P1", Some("Steve"), 60);
    assert!(!bridge.flush_stats().await);
    assert_eq!(bridge.stats().drain_batch().len(), 1);
}
