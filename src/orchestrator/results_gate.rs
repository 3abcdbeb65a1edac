//! Advisory check that decides whether "open results" is offered.
//!
//! The check never surfaces an error to the user: any failure reads as "no results".

use super::controller::Resolution;
use crate::engine::{Engine, EngineError};
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;

/// Issue the engine's existence check on behalf of run `run`.
pub(crate) fn refresh(engine: Arc<dyn Engine>, run: u64) -> BoxFuture<'static, Resolution> {
    async move {
        let result = engine.results_artifact_exists().await;
        Resolution::ResultsChecked { run, result }
    }
    .boxed()
}

/// Fail closed: only a successful `true` enables the action.
pub(crate) fn verdict(result: Result<bool, EngineError>) -> bool {
    match result {
        Ok(exists) => exists,
        Err(e) => {
            tracing::debug!(error = %e, "results existence check failed");
            false
        }
    }
}
