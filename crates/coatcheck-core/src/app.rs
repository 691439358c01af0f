use anyhow::Result;
use std::sync::Arc;

use crate::{Config, Service, ServiceContext};

/// Main application state and lifecycle manager
pub struct App {
    config: Arc<Config>,
    services: Vec<Box<dyn Service>>,
    context: ServiceContext,
}

impl App {
    /// Create a new application instance from the on-disk configuration
    pub fn new() -> Result<Self> {
        let (config, _) = Config::load_validated()?;
        Ok(Self::with_config(config))
    }

    /// Create an application instance around an already loaded configuration
    pub fn with_config(config: Config) -> Self {
        let config = Arc::new(config);
        let context = ServiceContext::new(config.clone());

        Self {
            config,
            services: Vec::new(),
            context,
        }
    }

    /// Register a service with the application
    pub fn register_service(&mut self, service: Box<dyn Service>) {
        tracing::info!("Registering service: {}", service.name());
        self.services.push(service);
    }

    /// Initialize all registered services
    pub fn initialize(&mut self) -> Result<()> {
        tracing::info!(
            "Initializing application with {} services",
            self.services.len()
        );

        for service in &mut self.services {
            tracing::debug!("Initializing service: {}", service.name());
            service.initialize(&self.context)?;
        }

        tracing::info!("Application initialized successfully");
        Ok(())
    }

    /// Shutdown the application and all services
    pub fn shutdown(&mut self) -> Result<()> {
        tracing::info!("Shutting down application");

        for service in self.services.iter_mut().rev() {
            tracing::debug!("Shutting down service: {}", service.name());
            if let Err(e) = service.shutdown() {
                tracing::error!("Error shutting down service {}: {}", service.name(), e);
            }
        }

        Ok(())
    }

    /// Get reference to application config
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get list of all registered services
    pub fn services(&self) -> &[Box<dyn Service>] {
        &self.services
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use parking_lot::Mutex;

    struct RecordingService {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail_shutdown: bool,
    }

    impl Service for RecordingService {
        fn id(&self) -> &str {
            &self.name
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn initialize(&mut self, _ctx: &ServiceContext) -> Result<()> {
            self.log.lock().push(format!("init:{}", self.name));
            Ok(())
        }

        fn shutdown(&mut self) -> Result<()> {
            self.log.lock().push(format!("shutdown:{}", self.name));
            if self.fail_shutdown {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    #[test]
    fn test_services_start_in_order_and_stop_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut app = App::with_config(Config::default());

        for (name, fail_shutdown) in [("a", true), ("b", false)] {
            app.register_service(Box::new(RecordingService {
                name: name.to_string(),
                log: log.clone(),
                fail_shutdown,
            }));
        }

        app.initialize().unwrap();
        // A failing shutdown is logged, not propagated
        app.shutdown().unwrap();

        assert_eq!(app.services().len(), 2);
        assert_eq!(
            *log.lock(),
            vec!["init:a", "init:b", "shutdown:b", "shutdown:a"]
        );
    }
}
