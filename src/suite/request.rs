//! Request attributes the suite evaluates.

use chrono::{DateTime, Utc};

use crate::scope::HttpMethod;

/// The parts of an inbound request that scopes and controllers look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Virtual path, without the leading `/`
    pub path: String,
    pub method: HttpMethod,
    /// Whether the client carries a tracking marker
    pub has_tracking: bool,
    /// Observation time; resolved from the clock once per evaluation when unset
    pub timestamp: Option<DateTime<Utc>>,
}

impl RequestContext {
    pub fn new(path: impl AsRef<str>, method: HttpMethod) -> Self {
        let path = path.as_ref();
        Self {
            path: path.strip_prefix('/').unwrap_or(path).to_string(),
            method,
            has_tracking: false,
            timestamp: None,
        }
    }

    pub fn with_tracking(mut self, has_tracking: bool) -> Self {
        self.has_tracking = has_tracking;
        self
    }

    /// Pin the observation time instead of reading the clock.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub(crate) fn resolve_timestamp(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or_else(Utc::now)
    }
}

/// Key under which an instance tracks a signature, so two instances never
/// share rate state for the same raw signature.
pub fn qualified_signature(instance: &str, signature: &str) -> String {
    format!("{}-{}", instance, signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_request_context() {
        let ts = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let request = RequestContext::new("/api/orders", HttpMethod::Post)
            .with_tracking(true)
            .at(ts);

        assert_eq!(request.path, "api/orders");
        assert_eq!(request.method, HttpMethod::Post);
        assert!(request.has_tracking);
        assert_eq!(request.resolve_timestamp(), ts);
    }

    #[test]
    fn test_only_one_slash_stripped() {
        assert_eq!(RequestContext::new("//double", HttpMethod::Get).path, "/double");
        assert_eq!(RequestContext::new("plain", HttpMethod::Get).path, "plain");
    }

    #[test]
    fn test_unset_timestamp_reads_clock() {
        let before = Utc::now();
        let resolved = RequestContext::new("a", HttpMethod::Get).resolve_timestamp();
        assert!(resolved >= before);
    }

    #[test]
    fn test_qualified_signature() {
        assert_eq!(qualified_signature("api", "client-17"), "api-client-17");
        assert_ne!(
            qualified_signature("first", "sig"),
            qualified_signature("second", "sig")
        );
    }
}
