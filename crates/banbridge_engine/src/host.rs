//! Interface to the game server hosting the bridge.

use parking_lot::Mutex;
use sysinfo::{Pid, System};
use tokio_util::sync::CancellationToken;

/// A connected player as seen by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlinePlayer {
    /// Stable player identity.
    pub subject_id: String,
    /// Display name.
    pub name: String,
    /// Remote address, if known.
    pub ip: Option<String>,
    /// Device identifier, if known.
    pub hwid: Option<String>,
}

impl OnlinePlayer {
    /// Creates a player without address or device information.
    pub fn new(subject_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            name: name.into(),
            ip: None,
            hwid: None,
        }
    }
}

/// Memory figures in bytes. Negative means unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Bytes in use.
    pub used_bytes: i64,
    /// Limit in bytes.
    pub max_bytes: i64,
}

impl MemoryUsage {
    /// Both figures unknown.
    pub const UNKNOWN: MemoryUsage = MemoryUsage {
        used_bytes: -1,
        max_bytes: -1,
    };
}

/// Capabilities the bridge needs from the game server.
///
/// Implementations must be cheap to call from periodic tasks; none of the
/// methods may block on network I/O.
pub trait GameHost: Send + Sync {
    /// Players currently connected.
    fn online_players(&self) -> Vec<OnlinePlayer>;

    /// Configured capacity; negative if unknown.
    fn max_players(&self) -> i64;

    /// Current ticks per second.
    fn ticks_per_second(&self) -> Option<f64>;

    /// Current memory figures.
    fn memory(&self) -> MemoryUsage;

    /// System CPU load in `0.0..=1.0`.
    fn cpu_load(&self) -> Option<f64>;

    /// Disconnects `subject_id` with `message`. Returns false if not online.
    fn kick(&self, subject_id: &str, message: &str) -> bool;

    /// Stops the server. Must be safe to call more than once.
    fn shutdown(&self);

    /// Looks up a connected player.
    fn find_online(&self, subject_id: &str) -> Option<OnlinePlayer> {
        self.online_players()
            .into_iter()
            .find(|p| p.subject_id == subject_id)
    }
}

/// A host without players, used when the bridge runs standalone.
///
/// Memory is this process's resident size against the machine's total;
/// CPU load is system wide. `shutdown` cancels the token handed in at
/// construction.
pub struct HeadlessHost {
    max_players: i64,
    stop: CancellationToken,
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl HeadlessHost {
    /// Creates a headless host.
    pub fn new(max_players: i64, stop: CancellationToken) -> Self {
        let mut system = System::new();
        // CPU usage is computed between two refreshes; take the first one now.
        system.refresh_cpu();
        Self {
            max_players,
            stop,
            system: Mutex::new(system),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// Returns true once `shutdown` was called.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

impl GameHost for HeadlessHost {
    fn online_players(&self) -> Vec<OnlinePlayer> {
        Vec::new()
    }

    fn max_players(&self) -> i64 {
        self.max_players
    }

    fn ticks_per_second(&self) -> Option<f64> {
        None
    }

    fn memory(&self) -> MemoryUsage {
        let mut system = self.system.lock();
        system.refresh_memory();
        let used = self.pid.and_then(|pid| {
            system.refresh_process(pid);
            system.process(pid).map(|process| process.memory())
        });

        MemoryUsage {
            used_bytes: used.map_or(-1, saturating_i64),
            max_bytes: match system.total_memory() {
                0 => -1,
                total => saturating_i64(total),
            },
        }
    }

    fn cpu_load(&self) -> Option<f64> {
        let mut system = self.system.lock();
        system.refresh_cpu();
        let percent = f64::from(system.global_cpu_info().cpu_usage());
        percent
            .is_finite()
            .then(|| (percent / 100.0).clamp(0.0, 1.0))
    }

    fn kick(&self, _subject_id: &str, _message: &str) -> bool {
        false
    }

    fn shutdown(&self) {
        self.stop.cancel();
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
