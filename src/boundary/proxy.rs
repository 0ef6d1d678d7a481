//! Boundary Proxy
//!
//! Structural enforcement: wraps an actor-facing object so that only methods whitelisted for
//! the actor's role can be reached. A refused call never runs the underlying method.

use crate::boundary::enforcer::BoundaryEnforcer;
use crate::boundary::{Actor, ActorType, ViolationAlert, ViolationDetails, ViolationType};
use crate::error::OrchestratorError;
use crate::types::Severity;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Object whose methods can be invoked by name.
pub trait ActorSurface {
    fn dispatch(&mut self, method: &str, args: Value) -> Result<Value, OrchestratorError>;
}

/// Method names an actor role may call.
///
/// A method is permitted when it equals a whitelisted name or starts with `<name>_`,
/// so `plan_release` is a planning method and `deploy_preview` an execution one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodWhitelist {
    allowed: BTreeSet<String>,
}

impl MethodWhitelist {
    pub fn for_actor(actor_type: ActorType) -> Self {
        Self {
            allowed: actor_type
                .capabilities()
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.allowed.insert(method.into());
        self
    }

    pub fn permits(&self, method: &str) -> bool {
        self.allowed.iter().any(|allowed| {
            method == allowed
                || method
                    .strip_prefix(allowed.as_str())
                    .is_some_and(|rest| rest.starts_with('_'))
        })
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }
}

pub struct BoundaryProxy<T> {
    inner: T,
    actor: Actor,
    whitelist: MethodWhitelist,
    enforcer: Arc<BoundaryEnforcer>,
}

impl<T> BoundaryProxy<T> {
    pub fn new(inner: T, actor: Actor, enforcer: Arc<BoundaryEnforcer>) -> Self {
        let whitelist = MethodWhitelist::for_actor(actor.actor_type);
        Self {
            inner,
            actor,
            whitelist,
            enforcer,
        }
    }

    pub fn with_whitelist(mut self, whitelist: MethodWhitelist) -> Self {
        self.whitelist = whitelist;
        self
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Run `f` against the wrapped object under the name `method`, if permitted.
    pub fn with<R>(
        &mut self,
        method: &str,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, OrchestratorError> {
        self.authorize(method)?;
        Ok(f(&mut self.inner))
    }

    fn authorize(&self, method: &str) -> Result<(), OrchestratorError> {
        if self.whitelist.permits(method) {
            debug!(actor_id = %self.actor.id, method, "Proxy call permitted");
            return Ok(());
        }
        self.enforcer.record_violation(ViolationAlert::new(
            self.actor.id.clone(),
            self.actor.actor_type,
            ViolationType::Method,
            Severity::Critical,
            format!(
                "{} actor attempted to call non-whitelisted method '{}'",
                self.actor.actor_type, method
            ),
            ViolationDetails::Method {
                method: method.to_string(),
            },
        ));
        Err(OrchestratorError::MethodNotAllowed {
            method: method.to_string(),
            actor_type: self.actor.actor_type,
        })
    }
}

impl<T: ActorSurface> BoundaryProxy<T> {
    /// Dispatch `method` on the wrapped surface, refusing non-whitelisted names up front.
    pub fn call(&mut self, method: &str, args: Value) -> Result<Value, OrchestratorError> {
        self.authorize(method)?;
        self.inner.dispatch(method, args)
    }
}
