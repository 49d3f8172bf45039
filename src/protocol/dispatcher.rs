use crate::core::envelope::Envelope;
use crate::error::{constants, ProtocolError, Result};
use crate::service::node::Node;
use crate::transport::connection::Connection;
use std::sync::{Arc, RwLock};

/// An application message handler.
///
/// Returns `Ok(true)` when it handled the envelope, which stops the chain.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, node: &Node, connection: &Arc<Connection>, envelope: &Envelope)
        -> Result<bool>;
}

impl<F> Handler for F
where
    F: Fn(&Node, &Arc<Connection>, &Envelope) -> Result<bool> + Send + Sync + 'static,
{
    fn handle(
        &self,
        node: &Node,
        connection: &Arc<Connection>,
        envelope: &Envelope,
    ) -> Result<bool> {
        self(node, connection, envelope)
    }
}

/// Result of running the handler chain for one envelope.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Whether some handler reported the envelope handled.
    pub handled: bool,
    /// Errors from handlers that failed; each counts as "not handled".
    pub failures: Vec<(usize, ProtocolError)>,
}

/// Ordered handler chain. Handlers run in registration order and the first
/// that reports success ends the chain.
#[derive(Clone)]
pub struct Dispatcher {
    handlers: Arc<RwLock<Vec<Arc<dyn Handler>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn register<H: Handler>(&self, handler: H) -> Result<()> {
        let mut handlers = self.handlers.write().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string())
        })?;

        handlers.push(Arc::new(handler));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.handlers.read().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the chain. The lock is released before any handler runs, so
    /// handlers may register further handlers or send on the connection.
    pub fn dispatch(
        &self,
        node: &Node,
        connection: &Arc<Connection>,
        envelope: &Envelope,
    ) -> Result<DispatchOutcome> {
        let handlers: Vec<Arc<dyn Handler>> = self
            .handlers
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string()))?
            .clone();

        let mut outcome = DispatchOutcome::default();
        for (index, handler) in handlers.iter().enumerate() {
            match handler.handle(node, connection, envelope) {
                Ok(true) => {
                    outcome.handled = true;
                    break;
                }
                Ok(false) => {}
                Err(e) => outcome.failures.push((index, e)),
            }
        }
        Ok(outcome)
    }
}
