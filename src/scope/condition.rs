//! HTTP methods and the condition mask attached to scope items.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ThrottleError;

/// HTTP methods a scope item can be conditioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Trace,
    Options,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Trace => "TRACE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Head => "HEAD",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = ThrottleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const ALL: [HttpMethod; 8] = [
            HttpMethod::Get,
            HttpMethod::Post,
            HttpMethod::Put,
            HttpMethod::Delete,
            HttpMethod::Patch,
            HttpMethod::Trace,
            HttpMethod::Options,
            HttpMethod::Head,
        ];
        let s = s.trim();
        ALL.into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ThrottleError::UnknownMethod(s.to_string()))
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of request conditions a scope item requires.
///
/// Tracking bits and method bits are independent groups: a mask constrains
/// a group only when it sets at least one bit from it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ConditionMask(u16);

impl ConditionMask {
    pub const NONE: Self = Self(0);
    pub const HAS_TRACKING: Self = Self(1 << 0);
    pub const NO_TRACKING: Self = Self(1 << 1);
    pub const GET: Self = Self(1 << 2);
    pub const POST: Self = Self(1 << 3);
    pub const PUT: Self = Self(1 << 4);
    pub const DELETE: Self = Self(1 << 5);
    pub const PATCH: Self = Self(1 << 6);
    pub const TRACE: Self = Self(1 << 7);
    pub const OPTIONS: Self = Self(1 << 8);
    pub const HEAD: Self = Self(1 << 9);

    const TRACKING_BITS: u16 = Self::HAS_TRACKING.0 | Self::NO_TRACKING.0;
    const METHOD_BITS: u16 = Self::GET.0
        | Self::POST.0
        | Self::PUT.0
        | Self::DELETE.0
        | Self::PATCH.0
        | Self::TRACE.0
        | Self::OPTIONS.0
        | Self::HEAD.0;

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Whether every bit of `other` is set in this mask.
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn has_tracking_condition(&self) -> bool {
        self.0 & Self::TRACKING_BITS != 0
    }

    pub fn has_method_condition(&self) -> bool {
        self.0 & Self::METHOD_BITS != 0
    }

    /// Whether a request with these attributes satisfies the mask.
    pub fn is_met(&self, method: HttpMethod, has_tracking: bool) -> bool {
        if self.is_empty() {
            return true;
        }

        let tracking_met = !self.has_tracking_condition()
            || (self.contains(Self::HAS_TRACKING) && has_tracking)
            || (self.contains(Self::NO_TRACKING) && !has_tracking);
        let method_met = !self.has_method_condition() || self.contains(method.into());

        tracking_met && method_met
    }
}

impl From<HttpMethod> for ConditionMask {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Self::GET,
            HttpMethod::Post => Self::POST,
            HttpMethod::Put => Self::PUT,
            HttpMethod::Delete => Self::DELETE,
            HttpMethod::Patch => Self::PATCH,
            HttpMethod::Trace => Self::TRACE,
            HttpMethod::Options => Self::OPTIONS,
            HttpMethod::Head => Self::HEAD,
        }
    }
}

impl BitOr for ConditionMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ConditionMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl FromIterator<ConditionMask> for ConditionMask {
    fn from_iter<I: IntoIterator<Item = ConditionMask>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, |mask, flag| mask | flag)
    }
}
