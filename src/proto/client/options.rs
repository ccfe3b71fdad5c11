use std::time::Duration;

use crate::proto::single::WorkerId;

pub(crate) const DEFAULT_RECONNECT_LIMIT: u32 = 2;
pub(crate) const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);
pub(crate) const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(20_000);

#[derive(Clone)]
pub(crate) struct ClientOptions {
    /// Hostname to advertise to server.
    /// Defaults to machine hostname.
    pub(crate) hostname: Option<String>,

    /// PID to advertise to server.
    /// Defaults to process ID.
    pub(crate) pid: Option<usize>,

    /// Worker ID to advertise to server.
    /// Defaults to None; only clients acting as workers need one.
    pub(crate) wid: Option<WorkerId>,

    /// Labels to advertise to server.
    /// Defaults to ["rust"].
    pub(crate) labels: Vec<String>,

    /// Password to authenticate with.
    /// Defaults to None.
    pub(crate) password: Option<String>,

    /// How many consecutive reconnect attempts to make before declaring the
    /// session dead.
    pub(crate) reconnect_limit: u32,

    /// Base delay between reconnect attempts; attempt `n` waits `n` times
    /// this.
    pub(crate) reconnect_delay: Duration,

    /// How long the socket may sit silent before that fact is logged.
    pub(crate) idle_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            hostname: None,
            pid: None,
            wid: None,
            labels: vec!["rust".to_string()],
            password: None,
            reconnect_limit: DEFAULT_RECONNECT_LIMIT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_the_protocol_documentation() {
        let opts = ClientOptions::default();
        assert_eq!(opts.labels, vec!["rust".to_string()]);
        assert_eq!(opts.reconnect_limit, 2);
        assert_eq!(opts.reconnect_delay, Duration::from_millis(2000));
        assert_eq!(opts.idle_timeout, Duration::from_millis(20_000));
        assert!(opts.wid.is_none());
        assert!(opts.password.is_none());
    }
}
