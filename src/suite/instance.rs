//! Named pairing of a rate controller with the scope it applies to.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::InstanceConfig;
use crate::error::{Result, ThrottleError};
use crate::ratelimit::{Algorithm, ConcurrencyModel, Limits, RateController, DEFAULT_CLEANUP_INTERVAL};
use crate::scope::{ConditionMask, HttpMethod, Scope};

/// A controller instance of a suite.
///
/// The instance name mirrors the controller name and is the name reported
/// as the blocker when this instance rejects a call.
#[derive(Debug, Clone)]
pub struct ControllerInstance {
    name: String,
    controller: Arc<dyn RateController>,
    scope: Scope,
}

impl ControllerInstance {
    /// Pair an existing controller with a scope.
    pub fn new(controller: Arc<dyn RateController>, scope: Scope) -> Result<Self> {
        let name = validate_name(controller.name())?.to_string();
        Ok(Self {
            name,
            controller,
            scope,
        })
    }

    /// Build a controller with the default cleanup interval and an empty scope.
    pub fn create(algorithm: Algorithm, name: &str, limits: Limits) -> Result<Self> {
        let name = validate_name(name)?;
        let controller = algorithm.build(name, limits, DEFAULT_CLEANUP_INTERVAL);
        Self::new(controller, Scope::new())
    }

    /// Build an instance from its configuration.
    ///
    /// Everything that can fail is validated before the controller (and its
    /// cleanup thread) is created.
    pub fn from_config(
        config: &InstanceConfig,
        default_cleanup: Duration,
        model: ConcurrencyModel,
    ) -> Result<Self> {
        let name = validate_name(&config.name)?;
        let limits = config.limits()?;
        let scope = config.build_scope()?;

        let cleanup_interval = config.cleanup_interval(default_cleanup);
        let controller = config.algorithm.build(name, limits, cleanup_interval);
        controller.set_concurrency_model(model);

        debug!(
            name = %name,
            algorithm = %config.algorithm,
            scope_items = scope.len(),
            "Built controller instance"
        );

        Self::new(controller, scope)
    }

    pub fn include_in_scope(mut self, path: &str, condition: ConditionMask) -> Result<Self> {
        self.scope.include(path, condition)?;
        Ok(self)
    }

    pub fn include_regex_in_scope(mut self, pattern: &str, condition: ConditionMask) -> Result<Self> {
        self.scope.include_regex(pattern, condition)?;
        Ok(self)
    }

    pub fn exclude_in_scope(mut self, path: &str, condition: ConditionMask) -> Result<Self> {
        self.scope.exclude(path, condition)?;
        Ok(self)
    }

    pub fn exclude_regex_in_scope(mut self, pattern: &str, condition: ConditionMask) -> Result<Self> {
        self.scope.exclude_regex(pattern, condition)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn controller(&self) -> &Arc<dyn RateController> {
        &self.controller
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn in_scope(&self, path: &str, method: HttpMethod, has_tracking: bool) -> bool {
        self.scope.in_scope(path, method, has_tracking)
    }
}

fn validate_name(name: &str) -> Result<&str> {
    if name.trim().is_empty() {
        return Err(ThrottleError::InvalidName);
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ScopeAction, ScopeItemConfig};

    fn instance_config(name: &str) -> InstanceConfig {
        InstanceConfig {
            name: name.to_string(),
            algorithm: Algorithm::Linear,
            time_interval_msec: 1000,
            max_threshold: 5,
            cleanup_interval_msec: None,
            scope: vec![ScopeItemConfig {
                path: Some("/api".to_string()),
                ..Default::default()
            }],
        }
    }

    #[test]
    fn test_create_instance() {
        let instance = ControllerInstance::create(Algorithm::Linear, "linear", Limits::Unlimited)
            .unwrap()
            .include_in_scope("/api", ConditionMask::NONE)
            .unwrap()
            .exclude_regex_in_scope("health$", ConditionMask::NONE)
            .unwrap();

        assert_eq!(instance.name(), "linear");
        assert_eq!(instance.controller().name(), "linear");
        assert_eq!(instance.scope().len(), 2);
        assert!(instance.in_scope("api/orders", HttpMethod::Get, false));
        assert!(!instance.in_scope("api/health", HttpMethod::Get, false));

        instance.controller().shutdown();
    }

    #[test]
    fn test_blank_name_rejected() {
        for name in ["", "   "] {
            let err = ControllerInstance::create(Algorithm::ShortAverage, name, Limits::Unlimited)
                .unwrap_err();
            assert!(matches!(err, ThrottleError::InvalidName));
        }
    }

    #[test]
    fn test_from_config() {
        let config = instance_config("orders");
        let instance =
            ControllerInstance::from_config(&config, DEFAULT_CLEANUP_INTERVAL, ConcurrencyModel::Optimistic)
                .unwrap();

        assert_eq!(instance.name(), "orders");
        assert_eq!(instance.controller().limits(), Limits::window(1000, 5).unwrap());
        assert_eq!(
            instance.controller().concurrency_model(),
            ConcurrencyModel::Optimistic
        );
        assert!(instance.in_scope("api/orders", HttpMethod::Delete, true));

        instance.controller().shutdown();
    }

    #[test]
    fn test_from_config_invalid_limits() {
        let mut config = instance_config("broken");
        config.time_interval_msec = 0;

        let err = ControllerInstance::from_config(
            &config,
            DEFAULT_CLEANUP_INTERVAL,
            ConcurrencyModel::Pessimistic,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ThrottleError::InvalidLimits {
                time_interval_msec: 0,
                max_threshold: 5
            }
        ));
    }

    #[test]
    fn test_from_config_invalid_scope() {
        let mut config = instance_config("broken");
        config.scope.push(ScopeItemConfig {
            path_regex: Some("(".to_string()),
            action: ScopeAction::Exclude,
            ..Default::default()
        });

        let err = ControllerInstance::from_config(
            &config,
            DEFAULT_CLEANUP_INTERVAL,
            ConcurrencyModel::Pessimistic,
        )
        .unwrap_err();
        assert!(matches!(err, ThrottleError::InvalidPattern { .. }));
    }
}
