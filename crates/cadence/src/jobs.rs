//! Executors used by the demo commands.

use std::time::Duration;

use cadence_scheduler::{JobArgs, JobResult};
use tracing::debug;

/// Sleep for `duration`, then resolve with the arguments or reject with "Boom!".
pub async fn coin_flip(args: JobArgs, duration: Duration) -> JobResult {
    tokio::time::sleep(duration).await;

    let args = args.into_value();
    if rand::random::<bool>() {
        debug!(%args, "resolving");
        Ok(args)
    } else {
        debug!(%args, "rejecting");
        Err("Boom!".to_string())
    }
}
