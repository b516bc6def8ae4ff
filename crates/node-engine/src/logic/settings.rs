//! Settings access and validation helpers shared by the logic variants

use crate::model::{is_truthy, Settings};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Per-field validation messages, keyed by settings field name
pub type SettingsErrors = BTreeMap<String, Vec<String>>;

pub const REQUIRED: &str = "This field is required!";
pub const INVALID_TYPE: &str = "Invalid type!";
pub const AT_LEAST_ONE: &str = "Must be at least one!";
pub const SMALLER_THAN_24: &str = "Must be smaller than 24!";
pub const MIN_OVER_MAX: &str = "Minimum limit cannot be greater than maximum limit!";
pub const NOT_NEGATIVE: &str = "Cannot be negative!";
pub const INVALID_IP: &str = "Not a valid IP address!";
pub const INVALID_EMAIL: &str = "Not a valid e-mail!";
pub const INVALID_TIME: &str = "Invalid time format!";

static IP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}$").expect("valid pattern")
});

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9-.]+$").expect("valid pattern")
});

static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([01][0-9]|2[0-3]):[0-5][0-9](:[0-5][0-9])?$").expect("valid pattern")
});

/// Record one message for `field`
pub fn push_error(errors: &mut SettingsErrors, field: &str, message: impl Into<String>) {
    errors
        .entry(field.to_string())
        .or_default()
        .push(message.into());
}

/// Integer setting, `None` when absent or not an integer
pub fn int_setting(settings: &Settings, key: &str) -> Option<i64> {
    settings.get(key).and_then(Value::as_i64)
}

/// String setting, `None` when absent or not a string
pub fn str_setting<'a>(settings: &'a Settings, key: &str) -> Option<&'a str> {
    settings.get(key).and_then(Value::as_str)
}

/// Check an hour-count field bounded to `lower..=23`.
///
/// Returns the value that later cross-field checks should use: the candidate
/// when it is a valid-typed integer, otherwise the existing node's value or
/// `fallback` when the field is absent.
pub fn check_hours(
    errors: &mut SettingsErrors,
    settings: &Settings,
    existing: Option<&Settings>,
    field: &str,
    lower: i64,
    fallback: i64,
) -> Option<i64> {
    let Some(value) = settings.get(field) else {
        if existing.is_none() {
            push_error(errors, field, REQUIRED);
        }
        return Some(
            existing
                .and_then(|s| int_setting(s, field))
                .unwrap_or(fallback),
        );
    };

    let Some(hours) = value.as_i64() else {
        push_error(errors, field, INVALID_TYPE);
        return None;
    };
    if hours < lower {
        push_error(
            errors,
            field,
            if lower == 0 { NOT_NEGATIVE } else { AT_LEAST_ONE },
        );
    } else if hours > 23 {
        push_error(errors, field, SMALLER_THAN_24);
    }
    Some(hours)
}

/// Format check applied to a string credential
#[derive(Debug, Clone, Copy)]
pub enum StringFormat {
    Any,
    IpAddress,
    Email,
    TimeOfDay,
}

impl StringFormat {
    fn check(self, value: &str) -> Option<&'static str> {
        let (re, message) = match self {
            StringFormat::Any => return None,
            StringFormat::IpAddress => (&*IP_RE, INVALID_IP),
            StringFormat::Email => (&*EMAIL_RE, INVALID_EMAIL),
            StringFormat::TimeOfDay => (&*TIME_RE, INVALID_TIME),
        };
        (!re.is_match(value)).then_some(message)
    }
}

/// Check a string field. Empty values only fail when creating a node.
pub fn check_string(
    errors: &mut SettingsErrors,
    settings: &Settings,
    existing: Option<&Settings>,
    field: &str,
    format: StringFormat,
) {
    let value = settings.get(field).unwrap_or(&Value::Null);
    if !is_truthy(value) {
        if existing.is_none() {
            push_error(errors, field, REQUIRED);
        }
        return;
    }
    match value.as_str() {
        None => push_error(errors, field, INVALID_TYPE),
        Some(s) => {
            if let Some(message) = format.check(s) {
                push_error(errors, field, message);
            }
        }
    }
}

/// Check an optional numeric field
pub fn check_optional_number(errors: &mut SettingsErrors, settings: &Settings, field: &str) {
    match settings.get(field) {
        None | Some(Value::Null) | Some(Value::Number(_)) => {}
        Some(_) => push_error(errors, field, INVALID_TYPE),
    }
}
