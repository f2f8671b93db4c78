use crate::config::AppConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a pipeline run needs besides the filesystem itself.
#[derive(Clone)]
pub struct RunContext {
    pub config: Arc<AppConfig>,
    /// Cancelled on SIGINT/SIGTERM; the copier stops taking new files.
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            cancel: CancellationToken::new(),
        }
    }
}
