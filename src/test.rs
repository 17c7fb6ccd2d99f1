mod mock_server;

use std::time::{Duration, Instant};

pub(crate) use self::mock_server::{unreachable_address, MockNode, MockReplicaSet, ReplicaSetView};
use crate::options::ClientOptions;

pub(crate) const PRIMARY: i32 = 1;
pub(crate) const SECONDARY: i32 = 2;
pub(crate) const RECOVERING: i32 = 3;

/// Polls `condition` until it holds or `timeout` elapses, returning whether it held.
pub(crate) async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Options with short intervals so background behavior is observable quickly.
pub(crate) fn fast_options() -> ClientOptions {
    ClientOptions::builder()
        .connect_timeout(Duration::from_secs(1))
        .heartbeat_freq(Duration::from_millis(20))
        .reconnect_delay(Duration::from_millis(20))
        .build()
}
