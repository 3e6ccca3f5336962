//! Request-to-stack resolution and activation hand-off

use crate::activator::{Activation, ActivationError, ActivationState, Activator};
use crate::error::WakeReply;
use crate::router;
use crate::store::{StackDefinition, StackStore, StoreError};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

/// What happened to a wake request
#[derive(Debug)]
pub enum WakeOutcome {
    /// Host header missing or malformed
    InvalidHost,
    /// No stack for this host label
    UnknownHost(String),
    /// No stack with this name
    UnknownStack(String),
    /// The stack store could not be read
    StoreUnavailable(StoreError),
    /// The activator ran for this stack
    Activated {
        stack: StackDefinition,
        result: Result<Activation, ActivationError>,
    },
}

impl WakeOutcome {
    /// JSON reply for API clients
    pub fn reply(&self) -> WakeReply {
        match self {
            WakeOutcome::InvalidHost => WakeReply::ignored("Host no válido"),
            WakeOutcome::UnknownHost(label) => {
                WakeReply::ignored(format!("Host {} no configurado", label))
            }
            WakeOutcome::UnknownStack(name) => {
                WakeReply::ignored(format!("Stack '{}' no existe.", name))
            }
            WakeOutcome::StoreUnavailable(_) => {
                WakeReply::error("No se pudo leer la configuración")
            }
            WakeOutcome::Activated { stack, result } => {
                WakeReply::from_activation(&stack.name, result)
            }
        }
    }

    /// One-line message for the dashboard
    pub fn message(&self) -> String {
        match self {
            WakeOutcome::Activated {
                stack,
                result: Ok(Activation::Starting),
            } => format!("Stack '{}' iniciado.", stack.name),
            WakeOutcome::Activated {
                stack,
                result: Ok(Activation::AlreadyRunning),
            } => format!("Stack '{}' ya está en ejecución.", stack.name),
            WakeOutcome::Activated { result: Err(e), .. } => e.to_string(),
            other => other.reply().message.unwrap_or_default(),
        }
    }
}

/// Shared state behind every HTTP connection
pub struct Gateway {
    store: Arc<StackStore>,
    activator: Arc<Activator>,
}

impl Gateway {
    pub fn new(store: Arc<StackStore>, activator: Arc<Activator>) -> Self {
        Self { store, activator }
    }

    pub fn store(&self) -> &StackStore {
        &self.store
    }

    pub fn activator(&self) -> &Activator {
        &self.activator
    }

    /// Wake the stack named by the leading label of the Host header
    pub async fn wake_host(&self, host: Option<&str>) -> WakeOutcome {
        let label = match host.and_then(router::host_label) {
            Some(label) => label,
            None => return WakeOutcome::InvalidHost,
        };

        match self.store.find(&label) {
            Ok(Some(stack)) => self.activate(stack).await,
            Ok(None) => {
                debug!(host = %label, "Host not configured");
                WakeOutcome::UnknownHost(label)
            }
            Err(e) => {
                error!(error = %e, "Failed to read stack store");
                WakeOutcome::StoreUnavailable(e)
            }
        }
    }

    /// Wake a stack by name; an exact match wins over a case-insensitive one
    pub async fn wake_named(&self, name: &str) -> WakeOutcome {
        let found = match self.store.get(name) {
            Ok(None) => self.store.find(name),
            other => other,
        };

        match found {
            Ok(Some(stack)) => self.activate(stack).await,
            Ok(None) => WakeOutcome::UnknownStack(name.to_string()),
            Err(e) => {
                error!(error = %e, "Failed to read stack store");
                WakeOutcome::StoreUnavailable(e)
            }
        }
    }

    /// Stacks with their activation state, empty when the store is unreadable
    pub fn stacks_with_state(&self) -> Result<Vec<(StackDefinition, ActivationState)>, StoreError> {
        Ok(self
            .store
            .load()?
            .into_iter()
            .map(|stack| {
                let state = self.activator.state(&stack.project);
                (stack, state)
            })
            .collect())
    }

    async fn activate(&self, stack: StackDefinition) -> WakeOutcome {
        // The configured project id is the only one used for probing and launching
        let result = self
            .activator
            .activate(Path::new(&stack.path), &stack.project)
            .await;

        match &result {
            Ok(activation) => {
                info!(stack = %stack.name, project = %stack.project, ?activation, "Wake request handled")
            }
            Err(e) => error!(stack = %stack.name, project = %stack.project, error = %e, "Wake request failed"),
        }

        WakeOutcome::Activated { stack, result }
    }
}
