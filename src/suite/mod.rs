//! The suite: an ordered set of controller instances evaluated per request.
//!
//! Every instance whose scope covers the request is asked, in configured
//! order, whether the call may proceed. The first instance that says no
//! stops the evaluation and is reported as the blocker.

mod instance;
mod request;
mod stats;

pub use instance::ControllerInstance;
pub use request::{qualified_signature, RequestContext};
pub use stats::{InstanceStatistics, SuiteStatistics};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SuiteConfig;
use crate::error::{Result, ThrottleError};
use crate::ratelimit::{ConcurrencyModel, RateController};

/// Suite-wide switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuiteOptions {
    /// When false, every call is allowed without evaluation
    pub enabled: bool,
    /// Evaluate and record every call, but never block
    pub log_only: bool,
    /// Update discipline applied to every controller
    pub concurrency_model: ConcurrencyModel,
}

impl Default for SuiteOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            log_only: false,
            concurrency_model: ConcurrencyModel::default(),
        }
    }
}

impl From<&SuiteConfig> for SuiteOptions {
    fn from(config: &SuiteConfig) -> Self {
        Self {
            enabled: config.enabled,
            log_only: config.log_only,
            concurrency_model: config.concurrency_model,
        }
    }
}

/// Raw evaluation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub allowed: bool,
    /// Name of the first instance that blocked the call
    pub blocked_by: Option<String>,
}

impl Verdict {
    fn allowed() -> Self {
        Self {
            allowed: true,
            blocked_by: None,
        }
    }

    fn blocked(instance: &str) -> Self {
        Self {
            allowed: false,
            blocked_by: Some(instance.to_string()),
        }
    }
}

/// What the caller should do with a request, after the suite-wide switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Blocking instance, reported in log-only mode as well
    pub blocked_by: Option<String>,
    /// Suggested client back-off for a blocked call
    pub retry_after: Option<Duration>,
}

impl Decision {
    fn allow() -> Self {
        Self {
            allowed: true,
            blocked_by: None,
            retry_after: None,
        }
    }
}

/// Ordered controller instances plus a name lookup.
#[derive(Debug)]
pub struct Suite {
    options: SuiteOptions,
    instances: Vec<ControllerInstance>,
    lookup: HashMap<String, Arc<dyn RateController>>,
    shut_down: AtomicBool,
}

impl Suite {
    /// Build a suite from configuration.
    ///
    /// On any error the controllers already built are shut down before the
    /// error is returned.
    pub fn from_config(config: &SuiteConfig) -> Result<Self> {
        let options = SuiteOptions::from(config);
        let default_cleanup = config.cleanup_interval();

        let mut instances = Vec::with_capacity(config.instances.len());
        for instance_config in &config.instances {
            match ControllerInstance::from_config(
                instance_config,
                default_cleanup,
                options.concurrency_model,
            ) {
                Ok(instance) => instances.push(instance),
                Err(e) => {
                    warn!(
                        instance = %instance_config.name,
                        error = %e,
                        rolled_back = instances.len(),
                        "Invalid controller instance, rolling back suite"
                    );
                    rollback(&instances);
                    return Err(e);
                }
            }
        }

        Self::with_instances(options, instances)
    }

    /// Build a suite from prebuilt instances, evaluated in the given order.
    pub fn with_instances(options: SuiteOptions, instances: Vec<ControllerInstance>) -> Result<Self> {
        let mut lookup = HashMap::with_capacity(instances.len());
        for instance in &instances {
            if lookup
                .insert(instance.name().to_string(), Arc::clone(instance.controller()))
                .is_some()
            {
                warn!(
                    instance = %instance.name(),
                    rolled_back = instances.len(),
                    "Duplicate controller instance, rolling back suite"
                );
                rollback(&instances);
                return Err(ThrottleError::DuplicateInstance(instance.name().to_string()));
            }

            instance
                .controller()
                .set_concurrency_model(options.concurrency_model);
            debug!(
                instance = %instance.name(),
                limits = ?instance.controller().limits(),
                scope_items = instance.scope().len(),
                "Registered controller instance"
            );
        }

        info!(
            instances = instances.len(),
            enabled = options.enabled,
            log_only = options.log_only,
            concurrency_model = ?options.concurrency_model,
            "Throttling suite ready"
        );

        Ok(Self {
            options,
            instances,
            lookup,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn options(&self) -> SuiteOptions {
        self.options
    }

    pub fn instances(&self) -> &[ControllerInstance] {
        &self.instances
    }

    /// Evaluate a request against every in-scope instance.
    ///
    /// One timestamp is used for the whole evaluation. A suite that has been
    /// shut down allows every call without touching controller state.
    pub fn is_call_allowed(&self, request: &RequestContext, signature: &str) -> Verdict {
        if self.is_shut_down() {
            return Verdict::allowed();
        }

        let timestamp = request.resolve_timestamp();
        let blocker = self
            .instances
            .iter()
            .filter(|instance| instance.in_scope(&request.path, request.method, request.has_tracking))
            .find(|instance| {
                let key = qualified_signature(instance.name(), signature);
                !instance.controller().is_call_allowed(&key, timestamp)
            });

        match blocker {
            Some(instance) => Verdict::blocked(instance.name()),
            None => Verdict::allowed(),
        }
    }

    /// Evaluate a request and apply the `enabled` and `log_only` switches.
    pub fn decide(&self, request: &RequestContext, signature: &str) -> Decision {
        if !self.options.enabled {
            return Decision::allow();
        }

        let Some(blocked_by) = self.is_call_allowed(request, signature).blocked_by else {
            return Decision::allow();
        };
        let retry_after = self.retry_after(&blocked_by).ok().flatten();

        if self.options.log_only {
            info!(
                instance = %blocked_by,
                path = %request.path,
                method = %request.method,
                signature = signature,
                "Call would have been blocked (log only)"
            );
        }

        Decision {
            allowed: self.options.log_only,
            blocked_by: Some(blocked_by),
            retry_after,
        }
    }

    /// Look up a controller by instance name.
    ///
    /// A blank name is rejected; an unknown name is `Ok(None)`.
    pub fn get_controller_by_name(&self, name: &str) -> Result<Option<&Arc<dyn RateController>>> {
        if name.trim().is_empty() {
            return Err(ThrottleError::InvalidName);
        }
        Ok(self.lookup.get(name))
    }

    /// Back-off hint for a call blocked by `name`: the per-call interval of
    /// its controller rounded up to whole seconds.
    pub fn retry_after(&self, name: &str) -> Result<Option<Duration>> {
        let hint = self
            .get_controller_by_name(name)?
            .and_then(|controller| controller.limits().min_interval_msec())
            .map(|interval_msec| Duration::from_secs((interval_msec / 1000.0).ceil() as u64));
        Ok(hint)
    }

    /// Snapshot every instance, in evaluation order.
    pub fn statistics(&self) -> SuiteStatistics {
        let now = Utc::now();
        SuiteStatistics {
            enabled: self.options.enabled,
            log_only: self.options.log_only,
            total_instances: self.instances.len(),
            instances: self
                .instances
                .iter()
                .map(|instance| InstanceStatistics::capture(instance.controller().as_ref(), now))
                .collect(),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop every controller's cleanup and release its table.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        for instance in &self.instances {
            instance.controller().shutdown();
        }
        info!(instances = self.instances.len(), "Throttling suite shut down");
    }
}

impl Drop for Suite {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn rollback(instances: &[ControllerInstance]) {
    for instance in instances {
        instance.controller().shutdown();
    }
}
