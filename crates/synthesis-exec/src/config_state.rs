//! Layered configuration-validity values.
//!
//! A [`ConfigurationState`] says whether a patcher may run. States from
//! nested checks are rolled up with [`ConfigurationState::combine`]:
//! halting beats plain failure beats success. Values are immutable; when an
//! input changes, callers recompute and combine again.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reason reported while a check has not produced a verdict yet.
pub const EVALUATING: &str = "Evaluating";

/// Readiness as a controller sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    /// Runnable.
    Valid,
    /// Not runnable yet, but not broken (evaluating, compiling, recoverable failure).
    NotReady,
    /// Structurally misconfigured; blocks execution outright.
    Halting,
}

/// Validity of a configuration, optionally carrying a payload.
///
/// `halting` implies `!succeeded`; the constructors keep it that way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationState<T = ()> {
    item: T,
    succeeded: bool,
    halting: bool,
    reason: String,
}

impl ConfigurationState<()> {
    /// Plain success with no payload.
    pub fn ok() -> Self {
        Self::success(())
    }

    /// Non-halting "not yet determined" state.
    pub fn evaluating() -> Self {
        Self::failure((), EVALUATING)
    }

    /// Non-halting failure with no payload.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self::failure((), reason)
    }

    /// Halting failure with no payload.
    pub fn halt(reason: impl Into<String>) -> Self {
        Self::halting((), reason)
    }
}

impl Default for ConfigurationState<()> {
    fn default() -> Self {
        Self::ok()
    }
}

impl<T> ConfigurationState<T> {
    pub fn success(item: T) -> Self {
        Self::success_with(item, String::new())
    }

    pub fn success_with(item: T, reason: impl Into<String>) -> Self {
        Self {
            item,
            succeeded: true,
            halting: false,
            reason: reason.into(),
        }
    }

    /// Recoverable failure: not runnable, but not a structural defect.
    pub fn failure(item: T, reason: impl Into<String>) -> Self {
        Self {
            item,
            succeeded: false,
            halting: false,
            reason: reason.into(),
        }
    }

    /// Structural misconfiguration that blocks execution.
    pub fn halting(item: T, reason: impl Into<String>) -> Self {
        Self {
            item,
            succeeded: false,
            halting: true,
            reason: reason.into(),
        }
    }

    pub fn item(&self) -> &T {
        &self.item
    }

    pub fn into_item(self) -> T {
        self.item
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn failed(&self) -> bool {
        !self.succeeded
    }

    pub fn is_halting(&self) -> bool {
        self.halting
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn is_runnable(&self) -> bool {
        self.succeeded
    }

    pub fn readiness(&self) -> Readiness {
        if self.halting {
            Readiness::Halting
        } else if self.succeeded {
            Readiness::Valid
        } else {
            Readiness::NotReady
        }
    }

    /// Same verdict, payload dropped.
    pub fn to_unit(&self) -> ConfigurationState<()> {
        ConfigurationState {
            item: (),
            succeeded: self.succeeded,
            halting: self.halting,
            reason: self.reason.clone(),
        }
    }

    /// Same verdict carried over a different payload.
    pub fn with_item<R>(self, item: R) -> ConfigurationState<R> {
        ConfigurationState {
            item,
            succeeded: self.succeeded,
            halting: self.halting,
            reason: self.reason,
        }
    }

    pub fn map<R>(self, f: impl FnOnce(T) -> R) -> ConfigurationState<R> {
        ConfigurationState {
            item: f(self.item),
            succeeded: self.succeeded,
            halting: self.halting,
            reason: self.reason,
        }
    }

    /// Payload on success, reason on failure.
    pub fn into_result(self) -> Result<T, String> {
        if self.succeeded {
            Ok(self.item)
        } else {
            Err(self.reason)
        }
    }

    /// Roll up states: the first halting one, else the first failed one,
    /// else `first`.
    pub fn combine<I>(first: Self, rest: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        if first.halting {
            return first;
        }
        let mut first_failed: Option<Self> = None;
        for state in rest {
            if state.halting {
                return state;
            }
            if first_failed.is_none() && !state.succeeded {
                first_failed = Some(state);
            }
        }
        match first_failed {
            Some(failed) if first.succeeded => failed,
            _ => first,
        }
    }

    /// [`combine`](Self::combine) over any number of states; `None` when empty.
    pub fn combine_all<I>(states: I) -> Option<Self>
    where
        I: IntoIterator<Item = Self>,
    {
        let mut iter = states.into_iter();
        let first = iter.next()?;
        Some(Self::combine(first, iter))
    }
}

impl<T: Default> ConfigurationState<T> {
    /// Build from a result. A failure is a halting error, as a plain error
    /// response from a check is treated.
    pub fn from_result(result: Result<T, String>) -> Self {
        match result {
            Ok(item) => Self::success(item),
            Err(reason) => Self::halting(T::default(), reason),
        }
    }
}

impl<T> fmt::Display for ConfigurationState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.readiness() {
            Readiness::Valid => "valid",
            Readiness::NotReady => "not ready",
            Readiness::Halting => "halting",
        };
        if self.reason.is_empty() {
            write!(f, "{label}")
        } else {
            write!(f, "{label}: {}", self.reason)
        }
    }
}
