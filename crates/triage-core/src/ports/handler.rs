use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::HandlerError;

/// A handler for one task kind.
///
/// The payload is passed through untouched. `cancel` fires when the task's
/// deadline expires or the engine is force-stopped; handlers should select on
/// it around long awaits. A handler that ignores it is abandoned once the hard
/// cap elapses.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(
        &self,
        payload: Arc<serde_json::Value>,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError>;
}
