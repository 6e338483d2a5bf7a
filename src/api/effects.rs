//! Non-critical side effects.
//!
//! Some writes (last seen timestamps, waitlist linkage, progress pings) must
//! never fail the operation that triggered them. They run through these
//! wrappers, which log the failure and carry on.

use std::future::Future;
use tracing::{warn, Instrument};

/// Await `effect` and log its failure instead of propagating it.
pub async fn non_critical<F>(name: &'static str, effect: F)
where
    F: Future<Output = anyhow::Result<()>>,
{
    if let Err(err) = effect.await {
        warn!(effect = name, "Non-critical effect failed: {:#}", err);
    }
}

/// Run `effect` on its own task, detached from the caller.
pub fn spawn_non_critical<F>(name: &'static str, effect: F)
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(non_critical(name, effect).instrument(tracing::Span::current()));
}
