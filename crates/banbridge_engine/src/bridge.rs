//! The bridge: wires the cache, accumulator and command cursor to the host
//! and to periodic triggers.
//!
//! Each trigger runs in its own task. A trigger's body is skipped once the
//! shutdown token is cancelled; work already in flight finishes normally.

use crate::bandwidth::{select_meter, BandwidthMeter};
use crate::bans::{format_instant, ApplyOutcome, BanCache, BanRecord};
use crate::client::{BackendClient, PostOutcome};
use crate::commands::{CommandCursor, CommandExecutor, PollSummary};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{GameHost, OnlinePlayer};
use crate::http::ReqwestClient;
use crate::sanitize::{self, RawMetrics};
use crate::stats::StatsAccumulator;
use crate::transport::HttpClient;
use banbridge_protocol::{
    BanPayload, BanReportRequest, CommandKind, HealthResponse, PlayerPresence, PresenceRequest,
    ServerMetricsRequest,
};
use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on the final presence report during shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Reply sent to anyone trying to ban locally.
pub const LOCAL_BAN_REFUSAL: &str = "Banning is disabled on this server. Please use the website.";

/// Keeps a game server in step with the backend.
pub struct Bridge<C: HttpClient, H: GameHost> {
    config: BridgeConfig,
    client: BackendClient<C>,
    host: H,
    bans: BanCache,
    stats: StatsAccumulator,
    commands: CommandCursor,
    meter: Option<Box<dyn BandwidthMeter>>,
    shutdown: CancellationToken,
    warned_missing_server_key: AtomicBool,
}

impl<H: GameHost> Bridge<ReqwestClient, H> {
    /// Creates a bridge talking to the configured backend over HTTP, with
    /// the platform's throughput meter.
    pub fn connect(config: BridgeConfig, host: H) -> BridgeResult<Self> {
        let config = config.normalized();
        let client = BackendClient::from_config(&config)?;
        let meter = select_meter(config.metrics.net_interface.as_deref());
        Ok(Self::new(config, client, host, meter))
    }
}

impl<C: HttpClient, H: GameHost> Bridge<C, H> {
    /// Creates a bridge from its parts. The ban cache is not loaded yet.
    pub fn new(
        config: BridgeConfig,
        client: BackendClient<C>,
        host: H,
        meter: Option<Box<dyn BandwidthMeter>>,
    ) -> Self {
        let bans = BanCache::new(config.ban_cache_path());
        Self {
            config,
            client,
            host,
            bans,
            stats: StatsAccumulator::new(),
            commands: CommandCursor::new(),
            meter,
            shutdown: CancellationToken::new(),
            warned_missing_server_key: AtomicBool::new(false),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Backend client.
    pub fn client(&self) -> &BackendClient<C> {
        &self.client
    }

    /// Host.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Ban cache.
    pub fn bans(&self) -> &BanCache {
        &self.bans
    }

    /// Stats accumulator.
    pub fn stats(&self) -> &StatsAccumulator {
        &self.stats
    }

    /// Command cursor.
    pub fn commands(&self) -> &CommandCursor {
        &self.commands
    }

    /// Token cancelled when the bridge shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Returns true once [`shutdown`](Self::shutdown) was called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Loads the ban cache, probes the backend and starts every periodic
    /// trigger.
    pub async fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>>
    where
        C: 'static,
        H: 'static,
    {
        self.bans.load();

        match &self.meter {
            Some(meter) => info!(meter = meter.name(), "bandwidth meter enabled"),
            None => info!("bandwidth meter unavailable, throughput will be reported as null"),
        }
        if self.config.points_to_localhost() {
            warn!(
                base_url = %self.client.base_url(),
                "api.baseUrl points to localhost; set it to http://<BACKEND_HOST>:<PORT> if the backend runs elsewhere"
            );
        }

        self.health_check().await;
        let tasks = self.spawn_schedulers();

        info!(
            backend = %self.client.base_url(),
            server_key = %self.client.server_key(),
            "bridge started"
        );
        tasks
    }

    /// Spawns one task per periodic trigger.
    pub fn spawn_schedulers(self: &Arc<Self>) -> Vec<JoinHandle<()>>
    where
        C: 'static,
        H: 'static,
    {
        let intervals = self.config.intervals();
        vec![
            self.spawn_periodic("bans", intervals.bans_poll, true, |b| async move {
                b.sync_bans().await;
            }),
            self.spawn_periodic("presence", intervals.presence, true, |b| async move {
                b.push_presence().await;
            }),
            self.spawn_periodic("playtime", intervals.playtime_tick, false, |b| async move {
                b.credit_playtime();
            }),
            self.spawn_periodic("stats", intervals.stats_flush, false, |b| async move {
                b.flush_stats().await;
            }),
            self.spawn_periodic("metrics", intervals.metrics, true, |b| async move {
                b.push_metrics().await;
            }),
            self.spawn_periodic("commands", intervals.commands_poll, true, |b| async move {
                b.poll_commands().await;
            }),
        ]
    }

    fn spawn_periodic<F, Fut>(
        self: &Arc<Self>,
        name: &'static str,
        period: Duration,
        immediate: bool,
        job: F,
    ) -> JoinHandle<()>
    where
        C: 'static,
        H: 'static,
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            let first = if immediate {
                Instant::now()
            } else {
                Instant::now() + period
            };
            let mut ticker = time::interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = bridge.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if bridge.is_shutting_down() {
                    break;
                }
                job(Arc::clone(&bridge)).await;
            }
            debug!(task = name, "periodic task stopped");
        })
    }

    /// Stops the periodic triggers, reports every player offline and saves
    /// the ban cache. Errors are swallowed. Calling it twice is a no-op.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();

        let offline = PresenceRequest::offline();
        let _ = time::timeout(SHUTDOWN_GRACE, self.client.post_presence_quiet(&offline)).await;
        let _ = self.bans.try_persist();

        info!("bridge stopped");
    }

    // ------------------------------------------------------------------
    // Periodic jobs
    // ------------------------------------------------------------------

    /// Probes the backend and logs the result.
    pub async fn health_check(&self) -> Option<HealthResponse> {
        let Some(health) = self.client.health().await else {
            error!(base_url = %self.client.base_url(), "backend health check failed");
            return None;
        };
        let db = match health.db_ok {
            Some(true) => "OK",
            Some(false) => "FAIL",
            None => "unknown",
        };
        info!(
            status = health.status.as_deref().unwrap_or("n/a"),
            server_time = health.server_time.as_deref().unwrap_or("n/a"),
            db,
            "backend reachable"
        );
        Some(health)
    }

    /// Fetches and applies one ban change feed, then enforces new bans.
    ///
    /// Returns `None` if the fetch failed or the cache was reset meanwhile.
    pub async fn sync_bans(&self) -> Option<ApplyOutcome> {
        let token = self.bans.begin_sync();
        let response = self.client.fetch_ban_changes(&token.since_param()).await?;
        let outcome = self.bans.apply_synced(&token, &response.changes)?;

        debug!(
            changes = response.changes.len(),
            changed = outcome.changed,
            cursor = %format_instant(&self.bans.cursor()),
            "ban feed applied"
        );
        if outcome.changed || self.bans.cursor() > token.cursor() {
            self.bans.persist();
        }
        if !outcome.newly_banned.is_empty() {
            self.enforce_new_bans(&outcome.newly_banned);
        }
        Some(outcome)
    }

    /// Logs every new ban and disconnects the affected subjects that are online.
    pub fn enforce_new_bans(&self, records: &[BanRecord]) {
        for record in records {
            let online = self.host.find_online(&record.subject_id);
            warn!(
                ban_id = record.ban_id,
                subject_id = %record.subject_id,
                player_name = online.as_ref().map_or("n/a", |p| p.name.as_str()),
                reason = %inline(record.reason.as_deref()),
                created_at = ?record.created_at,
                expires_at = ?record.expires_at,
                revoked_at = ?record.revoked_at,
                updated_at = ?record.updated_at,
                "new ban"
            );

            if online.is_some() && self.host.kick(&record.subject_id, &record.notice()) {
                info!(subject_id = %record.subject_id, ban_id = record.ban_id, "kicked newly banned player");
            }
        }
    }

    /// Posts the full online list in snapshot mode, even when empty.
    pub async fn push_presence(&self) -> bool {
        let players: Vec<PlayerPresence> = self
            .host
            .online_players()
            .into_iter()
            .filter(|p| !p.subject_id.trim().is_empty())
            .map(|p| PlayerPresence {
                subject_id: p.subject_id,
                name: Some(p.name),
                online: Some(true),
                ip: p.ip,
                hwid: p.hwid,
            })
            .collect();
        let count = players.len();

        let ok = self
            .client
            .post_presence(&PresenceRequest::snapshot(players))
            .await;
        if !ok {
            warn!(snapshot = true, players = count, "presence report failed");
        }
        ok
    }

    /// Credits one playtime tick to every online subject.
    pub fn credit_playtime(&self) {
        let seconds = self.config.intervals().playtime_tick.as_secs();
        for player in self.host.online_players() {
            self.stats
                .record_playtime(&player.subject_id, Some(player.name.as_str()), seconds);
        }
    }

    /// Sends accumulated stats. A failed batch is requeued.
    ///
    /// Returns true if nothing was pending or the batch was accepted.
    pub async fn flush_stats(&self) -> bool {
        let batch = self.stats.drain_batch();
        if batch.is_empty() {
            return true;
        }

        if self.client.post_stats_batch(&batch).await {
            debug!(players = batch.len(), "stats flushed");
            true
        } else {
            warn!(players = batch.len(), "stats flush failed, will retry later");
            self.stats.requeue(batch);
            false
        }
    }

    /// Collects, sanitizes and posts server metrics.
    ///
    /// Returns `None` when skipped because no server key is configured.
    pub async fn push_metrics(&self) -> Option<PostOutcome> {
        if self.client.server_key().is_empty() {
            if !self.warned_missing_server_key.swap(true, Ordering::Relaxed) {
                error!("metrics disabled: api.serverKey is missing or empty (must be set and unique per instance)");
            }
            return None;
        }

        let metrics = self.collect_metrics();
        let outcome = self.client.post_metrics(&metrics).await;
        if outcome.ok {
            info!(
                server_key = %metrics.server_key,
                players_online = metrics.players_online,
                tps = ?metrics.tps,
                rx_kbps = ?metrics.rx_kbps,
                tx_kbps = ?metrics.tx_kbps,
                "metrics posted"
            );
        } else {
            warn!(
                status = ?outcome.status,
                server_key = %metrics.server_key,
                "metrics post failed"
            );
        }
        Some(outcome)
    }

    /// Samples the host and throughput meter.
    pub fn collect_metrics(&self) -> ServerMetricsRequest {
        let memory = self.host.memory();
        let sample = self.meter.as_ref().and_then(|m| m.sample());
        let raw = RawMetrics {
            used_memory_bytes: memory.used_bytes,
            max_memory_bytes: memory.max_bytes,
            cpu_load: self.host.cpu_load(),
            players_online: self.host.online_players().len(),
            players_max: self.host.max_players(),
            tps: self.host.ticks_per_second(),
            rx_kbps: sample.map(|s| s.rx_kbps),
            tx_kbps: sample.map(|s| s.tx_kbps),
        };
        sanitize::metrics_request(self.client.server_key(), &raw)
    }

    /// Polls for remote commands and runs the new ones.
    pub async fn poll_commands(&self) -> PollSummary {
        self.commands.poll_once(&self.client, self).await
    }

    // ------------------------------------------------------------------
    // Host events
    // ------------------------------------------------------------------

    /// Checks a connecting subject. Returns the refusal notice if banned.
    pub fn check_login(&self, subject_id: &str, name: &str) -> Option<String> {
        let record = self.bans.find_active(subject_id)?;
        warn!(
            player = name,
            subject_id,
            ban_id = record.ban_id,
            "login blocked"
        );
        Some(record.notice())
    }

    /// Remembers the display name of a player that joined.
    pub fn on_join(&self, subject_id: &str, name: &str) {
        self.stats.mark_online(subject_id, name);
    }

    /// Notes that a player left.
    pub fn on_quit(&self, subject_id: &str) {
        self.stats.mark_offline(subject_id);
    }

    /// Records a death for the victim and a kill for the killer, if any.
    pub fn on_death(&self, victim: &OnlinePlayer, killer: Option<&OnlinePlayer>) {
        self.stats
            .record_death(&victim.subject_id, Some(victim.name.as_str()), 1);
        if let Some(killer) = killer {
            self.stats
                .record_kill(&killer.subject_id, Some(killer.name.as_str()), 1);
        }
    }

    /// Refuses local `ban` commands; bans are issued through the website.
    ///
    /// Accepts both chat (`/ban ...`) and console (`ban ...`) forms. Returns
    /// the refusal text when the command must be cancelled.
    pub fn intercept_command(&self, sender: &str, command_line: &str) -> Option<&'static str> {
        let trimmed = command_line.trim();
        let lower = trimmed.to_ascii_lowercase();
        let lower = lower.strip_prefix('/').unwrap_or(&lower);
        if lower != "ban" && !lower.starts_with("ban ") {
            return None;
        }
        warn!(sender, command = %inline(Some(trimmed)), "blocked local ban command");
        Some(LOCAL_BAN_REFUSAL)
    }

    /// Reports a ban enforced locally on `player`.
    pub async fn report_ban_enforced(
        &self,
        player: &OnlinePlayer,
        reason: &str,
        duration_seconds: Option<u64>,
    ) -> bool {
        let report = BanReportRequest {
            server_key: self.client.server_key().to_string(),
            ban: BanPayload {
                subject_id: player.subject_id.clone(),
                reason: reason.to_string(),
                duration_seconds,
                ip: player.ip.clone(),
                hwid: player.hwid.clone(),
                executed_at_iso: Some(format_instant(&Utc::now())),
            },
        };
        let ok = self.client.report_ban(&report).await;
        if !ok {
            warn!(subject_id = %player.subject_id, "failed to report enforced ban");
        }
        ok
    }
}

impl<C: HttpClient, H: GameHost> CommandExecutor for Bridge<C, H> {
    fn execute(&self, kind: &CommandKind, _payload_json: Option<&str>) -> BridgeResult<()> {
        match kind {
            CommandKind::Shutdown => {
                warn!("backend requested shutdown");
                self.host.shutdown();
                Ok(())
            }
            CommandKind::RefreshBans => {
                self.bans.reset_to_epoch();
                Ok(())
            }
            CommandKind::Unknown(raw) => {
                Err(BridgeError::Command(format!("unsupported command type {raw}")))
            }
        }
    }
}

/// Single-line rendering of optional text for logs.
fn inline(s: Option<&str>) -> String {
    let flat = s.unwrap_or_default().replace(['\n', '\r'], " ");
    let flat = flat.trim();
    if flat.is_empty() {
        "n/a".to_string()
    } else {
        flat.to_string()
    }
}
