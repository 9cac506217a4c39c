//! Exception kinds.
//!
//! The set of raisable kinds is closed: the builtin kinds below plus any
//! names the configuration registers, which become [`ExceptionKind::Other`].
//! Handler matching is a plain comparison; there is no subclass search.

use std::collections::BTreeSet;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ExceptionKind {
    /// The catch-all kind. `except Exception` matches everything.
    Exception,
    AssertionError,
    AttributeError,
    IndexError,
    KeyError,
    LookupError,
    NotImplementedError,
    OverflowError,
    RuntimeError,
    TypeError,
    ValueError,
    ZeroDivisionError,
    RTIOUnderflow,
    RTIOOverflow,
    RTIODestinationUnreachable,
    DMAError,
    I2CError,
    SPIError,
    ClockFailure,
    Other(String),
}

const BUILTINS: &[ExceptionKind] = &[
    ExceptionKind::Exception,
    ExceptionKind::AssertionError,
    ExceptionKind::AttributeError,
    ExceptionKind::IndexError,
    ExceptionKind::KeyError,
    ExceptionKind::LookupError,
    ExceptionKind::NotImplementedError,
    ExceptionKind::OverflowError,
    ExceptionKind::RuntimeError,
    ExceptionKind::TypeError,
    ExceptionKind::ValueError,
    ExceptionKind::ZeroDivisionError,
    ExceptionKind::RTIOUnderflow,
    ExceptionKind::RTIOOverflow,
    ExceptionKind::RTIODestinationUnreachable,
    ExceptionKind::DMAError,
    ExceptionKind::I2CError,
    ExceptionKind::SPIError,
    ExceptionKind::ClockFailure,
];

impl ExceptionKind {
    pub fn name(&self) -> &str {
        match self {
            ExceptionKind::Exception => "Exception",
            ExceptionKind::AssertionError => "AssertionError",
            ExceptionKind::AttributeError => "AttributeError",
            ExceptionKind::IndexError => "IndexError",
            ExceptionKind::KeyError => "KeyError",
            ExceptionKind::LookupError => "LookupError",
            ExceptionKind::NotImplementedError => "NotImplementedError",
            ExceptionKind::OverflowError => "OverflowError",
            ExceptionKind::RuntimeError => "RuntimeError",
            ExceptionKind::TypeError => "TypeError",
            ExceptionKind::ValueError => "ValueError",
            ExceptionKind::ZeroDivisionError => "ZeroDivisionError",
            ExceptionKind::RTIOUnderflow => "RTIOUnderflow",
            ExceptionKind::RTIOOverflow => "RTIOOverflow",
            ExceptionKind::RTIODestinationUnreachable => "RTIODestinationUnreachable",
            ExceptionKind::DMAError => "DMAError",
            ExceptionKind::I2CError => "I2CError",
            ExceptionKind::SPIError => "SPIError",
            ExceptionKind::ClockFailure => "ClockFailure",
            ExceptionKind::Other(name) => name,
        }
    }

    pub fn is_catch_all(&self) -> bool {
        matches!(self, ExceptionKind::Exception)
    }

    /// Whether a handler for `self` catches an exception of kind `raised`.
    pub fn catches(&self, raised: &ExceptionKind) -> bool {
        self.is_catch_all() || self == raised
    }
}

impl std::fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Name lookup for exception kinds: the builtins plus configured extras.
#[derive(Debug, Clone, Default)]
pub struct ExceptionRegistry {
    extra: BTreeSet<String>,
}

impl ExceptionRegistry {
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { extra: extra.into_iter().map(Into::into).collect() }
    }

    pub fn lookup(&self, name: &str) -> Option<ExceptionKind> {
        if let Some(kind) = BUILTINS.iter().find(|k| k.name() == name) {
            return Some(kind.clone());
        }
        self.extra.contains(name).then(|| ExceptionKind::Other(name.to_string()))
    }

    /// Every known kind, builtins first, in a fixed order.
    pub fn all(&self) -> impl Iterator<Item = ExceptionKind> + '_ {
        BUILTINS.iter().cloned().chain(self.extra.iter().map(|n| ExceptionKind::Other(n.clone())))
    }
}
