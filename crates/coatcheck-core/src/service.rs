use anyhow::Result;
use std::sync::Arc;

use crate::Config;

/// A long-lived component with an explicit start/stop lifecycle.
///
/// Services are constructed by the caller and handed to [`crate::App`], which
/// initializes them in registration order and shuts them down on exit.
pub trait Service: Send + Sync {
    /// Unique identifier for this service
    fn id(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str;

    /// Initialize the service with the given context
    fn initialize(&mut self, ctx: &ServiceContext) -> Result<()>;

    /// Shutdown the service gracefully
    fn shutdown(&mut self) -> Result<()>;
}

/// Context provided to services during initialization
pub struct ServiceContext {
    pub config: Arc<Config>,
}

impl ServiceContext {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}
