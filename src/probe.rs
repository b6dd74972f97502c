//! Host reachability probe
//!
//! A single ICMP echo through the system `ping` binary, run before a TCP
//! connect so an unroutable host fails fast instead of stalling in SYN
//! retries.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::constants::MIN_PROBE_TIMEOUT;

/// How a connection checks that its host is up before connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostProbe {
    /// One `ping -c 1 -W <secs>` per connect attempt
    #[default]
    Ping,
    /// Skip the probe and go straight to TCP
    Disabled,
}

impl HostProbe {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            Self::Ping
        } else {
            Self::Disabled
        }
    }

    /// Probe `host`, waiting at most `wait` (never less than one second).
    pub async fn is_reachable(&self, host: &str, wait: Duration) -> bool {
        match self {
            Self::Disabled => true,
            Self::Ping => ping(host, wait).await,
        }
    }
}

/// Whole seconds handed to `ping -W`.
fn ping_wait_secs(wait: Duration) -> u64 {
    wait.max(MIN_PROBE_TIMEOUT).as_secs()
}

async fn ping(host: &str, wait: Duration) -> bool {
    let secs = ping_wait_secs(wait);

    let child = Command::new("ping")
        .arg("-c")
        .arg("1")
        .arg("-W")
        .arg(secs.to_string())
        .arg(host)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    // ping bounds itself with -W; the outer limit only guards a hung process
    match timeout(Duration::from_secs(secs + 2), child).await {
        Ok(Ok(output)) => {
            let reachable = output.status.success();
            debug!("ping {} -> {}", host, if reachable { "reply" } else { "no reply" });
            reachable
        }
        Ok(Err(e)) => {
            warn!("Failed to run ping for {}: {}", host, e);
            false
        }
        Err(_) => {
            warn!("ping {} did not finish", host);
            false
        }
    }
}
