//! Classified error type shared across the collector runtime.
//!
//! Every error that crosses a collector/schedule/plugin/exporter boundary
//! carries a fixed class tag, rendered as `"{class} => {message}"`. This
//! mirrors the original monitoring agent's `pkg/errors` convention and is
//! what the collector state machine switches on to decide retry behavior.

use std::fmt;

/// Fixed error-class taxonomy. New variants are never added lightly: the
/// collector state machine (`crate::collector`) has a branch per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    MissingParam,
    InvalidParam,
    ErrConnection,
    ErrConfig,
    ErrNoMetric,
    ErrNoInstance,
    ErrTemplate,
    ErrNoCollector,
    ApiResponse,
    ErrImplement,
    GoRoutinePanic,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::MissingParam => "missing parameter",
            ErrorClass::InvalidParam => "invalid parameter",
            ErrorClass::ErrConnection => "connection error",
            ErrorClass::ErrConfig => "configuration error",
            ErrorClass::ErrNoMetric => "no metrics",
            ErrorClass::ErrNoInstance => "no instances",
            ErrorClass::ErrTemplate => "invalid template",
            ErrorClass::ErrNoCollector => "no collectors",
            ErrorClass::ApiResponse => "error reading api response",
            ErrorClass::ErrImplement => "implementation error",
            ErrorClass::GoRoutinePanic => "goroutine panic",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "missing parameter" => Some(ErrorClass::MissingParam),
            "invalid parameter" => Some(ErrorClass::InvalidParam),
            "connection error" => Some(ErrorClass::ErrConnection),
            "configuration error" => Some(ErrorClass::ErrConfig),
            "no metrics" => Some(ErrorClass::ErrNoMetric),
            "no instances" => Some(ErrorClass::ErrNoInstance),
            "invalid template" => Some(ErrorClass::ErrTemplate),
            "no collectors" => Some(ErrorClass::ErrNoCollector),
            "error reading api response" => Some(ErrorClass::ApiResponse),
            "implementation error" => Some(ErrorClass::ErrImplement),
            "goroutine panic" => Some(ErrorClass::GoRoutinePanic),
            _ => None,
        }
    }
}

/// A classified error: `{class} => {message}`, matching the upstream
/// convention so the separator-based `GetClass`/`IsErr` helpers below stay
/// compatible with errors strings logged by other components.
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    pub class: ErrorClass,
    pub message: String,
}

impl std::error::Error for ClassifiedError {}

const SEPARATOR: &str = " => ";

impl ClassifiedError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.class.as_str(), SEPARATOR, self.message)
    }
}

/// Extracts the error class from any error's rendered message, matching the
/// original's `strings.Split(err.Error(), " => ")[0]` behavior. Returns
/// `None` if the message isn't in classified form.
pub fn get_class(err: &(dyn std::error::Error + 'static)) -> Option<ErrorClass> {
    let rendered = err.to_string();
    let class_part = rendered.split(SEPARATOR).next()?;
    ErrorClass::from_str(class_part)
}

/// True if `err`'s class matches `class`.
pub fn is_err(err: &(dyn std::error::Error + 'static), class: ErrorClass) -> bool {
    get_class(err) == Some(class)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_as_class_arrow_message() {
        let e = ClassifiedError::new(ErrorClass::ErrConnection, "dial tcp: timeout");
        assert_eq!(e.to_string(), "connection error => dial tcp: timeout");
    }

    #[test]
    fn get_class_roundtrips() {
        let e = ClassifiedError::new(ErrorClass::ErrNoInstance, "zero instances returned");
        assert_eq!(get_class(&e), Some(ErrorClass::ErrNoInstance));
        assert!(is_err(&e, ErrorClass::ErrNoInstance));
        assert!(!is_err(&e, ErrorClass::ErrNoMetric));
    }

    #[test]
    fn get_class_none_for_plain_errors() {
        let e = ClassifiedError::new(ErrorClass::ErrConfig, "missing field => nested");
        // class is still the first segment even if the message itself
        // contains the separator
        assert_eq!(get_class(&e), Some(ErrorClass::ErrConfig));
    }
}
