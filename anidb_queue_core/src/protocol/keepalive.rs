//! Keep-alive scheduler
//!
//! Ticks at a fixed interval and lets the client actor decide whether to
//! ping, log out, or clear an expired ban or back-off window.

use crate::protocol::client::AniDbClient;
use crate::protocol::guard::KeepAliveAction;
use log::{debug, trace};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

pub struct KeepAlive {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl KeepAlive {
    pub fn spawn(client: AniDbClient, tick: Duration, cancel: CancellationToken) -> Self {
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match client.tick().await {
                            KeepAliveAction::Idle => trace!("keep-alive tick: idle"),
                            action => debug!("keep-alive tick: {action:?}"),
                        }
                        if client.state().closed {
                            break;
                        }
                    }
                }
            }
            debug!("Keep-alive scheduler stopped");
        });

        Self { cancel, handle }
    }

    /// Stop ticking and wait for the task to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}
