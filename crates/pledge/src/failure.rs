// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The failure value carried by rejected futures.

use std::any::Any;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

/// Advisory bits describing how a [`Failure`] should be interpreted.
///
/// The named bits are stable; all remaining bits are reserved.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Hints(u32);

impl Hints {
    /// No advice attached.
    pub const NO_HINT: Self = Self(0);
    /// The message is suitable for displaying to an end user verbatim.
    pub const USER_FRIENDLY: Self = Self(1);
    /// The failure is not recoverable by retrying.
    pub const CRITICAL: Self = Self(1 << 1);
    /// The data payload carries an HTTP status code.
    pub const DATA_IS_HTTP_CODE: Self = Self(1 << 2);
    /// The failure was synthesized from a caught panic.
    pub const FROM_EXCEPTION: Self = Self(1 << 3);

    /// Returns true when every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// The raw bit pattern.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Builds a hint set from a raw bit pattern; reserved bits are kept as-is.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }
}

impl BitOr for Hints {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Hints {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Hints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hints({:#b})", self.0)
    }
}

/// A failure delivered through a future: a message, a module/error code pair,
/// advisory [`Hints`], and an opaque data payload.
///
/// `Failure` is a plain value - cheap to clone (the payload is shared) and
/// freely copied along combinator chains. A default-constructed failure does
/// not "exist"; it is what [`Future::failure_reason`](crate::Future::failure_reason)
/// returns for a future that did not fail.
#[derive(Clone, Default)]
pub struct Failure {
    message: String,
    module_code: i64,
    error_code: i64,
    hints: Hints,
    data: Option<Arc<dyn Any + Send + Sync>>,
    exists: bool,
}

impl Failure {
    /// Creates a failure from a message and a module/error code pair.
    #[must_use]
    pub fn new(message: impl Into<String>, module_code: i64, error_code: i64) -> Self {
        Self {
            message: message.into(),
            module_code,
            error_code,
            hints: Hints::NO_HINT,
            data: None,
            exists: true,
        }
    }

    /// Creates a failure carrying only an opaque payload.
    #[must_use]
    pub fn from_data(data: impl Any + Send + Sync) -> Self {
        Self {
            data: Some(Arc::new(data)),
            exists: true,
            ..Self::default()
        }
    }

    /// Creates a user-facing failure from a bare message.
    ///
    /// The result carries [`Hints::USER_FRIENDLY`], plus [`Hints::FROM_EXCEPTION`]
    /// when the message starts with the `"Exception"` marker.
    #[must_use]
    pub fn from_string(message: impl Into<String>) -> Self {
        let message = message.into();
        let mut hints = Hints::USER_FRIENDLY;
        if message.starts_with("Exception") {
            hints |= Hints::FROM_EXCEPTION;
        }
        Self {
            message,
            hints,
            exists: true,
            ..Self::default()
        }
    }

    /// Creates a failure from a caught panic payload.
    ///
    /// The message is `"Exception caught: <text>"` when the payload is a string,
    /// and exactly `"Exception caught"` for any other payload type. The result
    /// carries [`Hints::FROM_EXCEPTION`].
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let text = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned());
        let message = match text {
            Some(text) => format!("Exception caught: {text}"),
            None => "Exception caught".to_owned(),
        };
        Self {
            message,
            hints: Hints::FROM_EXCEPTION,
            exists: true,
            ..Self::default()
        }
    }

    /// Returns a copy with the message replaced.
    #[must_use]
    pub fn with_message(&self, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..self.clone()
        }
    }

    /// Returns a copy with the module/error code pair replaced.
    #[must_use]
    pub fn with_code(&self, module_code: i64, error_code: i64) -> Self {
        Self {
            module_code,
            error_code,
            ..self.clone()
        }
    }

    /// Returns a copy with the data payload replaced.
    #[must_use]
    pub fn with_data(&self, data: impl Any + Send + Sync) -> Self {
        Self {
            data: Some(Arc::new(data)),
            ..self.clone()
        }
    }

    /// Returns a copy with the hints replaced.
    #[must_use]
    pub fn with_hints(&self, hints: Hints) -> Self {
        Self {
            hints,
            ..self.clone()
        }
    }

    /// The failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The module the failure originated from.
    #[must_use]
    pub fn module_code(&self) -> i64 {
        self.module_code
    }

    /// The module-specific error code.
    #[must_use]
    pub fn error_code(&self) -> i64 {
        self.error_code
    }

    /// The advisory hints.
    #[must_use]
    pub fn hints(&self) -> Hints {
        self.hints
    }

    /// Whether this value describes an actual failure.
    ///
    /// A default-constructed `Failure` does not exist; every factory-produced
    /// one does.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// The opaque data payload, downcast to `T`.
    #[must_use]
    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.as_deref().and_then(|data| data.downcast_ref())
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("message", &self.message)
            .field("module_code", &self.module_code)
            .field("error_code", &self.error_code)
            .field("hints", &self.hints)
            .field("data", &self.data.as_ref().map(|_| "<opaque>"))
            .field("exists", &self.exists)
            .finish()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Failure {}
