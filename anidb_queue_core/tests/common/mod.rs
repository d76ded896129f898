//! Shared helpers for queue integration tests
#![allow(dead_code)]

use anidb_queue_core::{QueueName, QueueRegistry};
use std::future::Future;
use std::time::Duration;

/// Poll `condition` until it holds, failing after a minute of (virtual) time
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(60), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Wait until no queue has pending or running commands
pub async fn wait_until_drained(registry: &QueueRegistry) {
    wait_until(|| async {
        let mut backlog = 0;
        for queue in QueueName::ALL {
            backlog += registry.counts(queue).await.unwrap().backlog();
        }
        backlog == 0
    })
    .await;
}
