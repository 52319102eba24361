use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Shortest auto-assign period the loop will run at
pub const MIN_AUTO_ASSIGN_INTERVAL_MS: u64 = 10;

/// Timing for the background loops.
///
/// Every open dashboard used to run its own uncoordinated timers. The server
/// now owns the only auto-assign timer, so its period and jitter are explicit.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Base period between auto-assign passes
    pub auto_assign_interval_ms: u64,
    /// Upper bound of the random delay added to every tick
    pub poll_jitter_ms: u64,
    /// Period of the consistency sweep. Zero disables it.
    pub reconcile_interval_ms: u64,
    /// Days of paid and cancelled tokens the sweep keeps. Zero keeps only
    /// today's.
    pub retention_days: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            auto_assign_interval_ms: 5_000,
            poll_jitter_ms: 500,
            reconcile_interval_ms: 60_000,
            retention_days: 7,
        }
    }
}

impl PollConfig {
    pub fn auto_assign_interval(&self) -> Duration {
        Duration::from_millis(self.auto_assign_interval_ms.max(MIN_AUTO_ASSIGN_INTERVAL_MS))
    }

    pub fn reconcile_interval(&self) -> Option<Duration> {
        if self.reconcile_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.reconcile_interval_ms))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// JSON snapshot backing the store. `None` keeps everything in memory.
    pub data_path: Option<PathBuf>,
    pub poll: PollConfig,
    /// How many times a transition re-reads and retries after losing a
    /// conditional write
    pub conflict_retries: u32,
    /// Forces the auto-assign setting on startup when set
    pub auto_assign_on_start: Option<bool>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:8080"
                .parse()
                .expect("default listen address is valid"),
            data_path: None,
            poll: PollConfig::default(),
            conflict_retries: 3,
            auto_assign_on_start: None,
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = Some(path.into());
        self
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_auto_assign(mut self, enabled: bool) -> Self {
        self.auto_assign_on_start = Some(enabled);
        self
    }
}
