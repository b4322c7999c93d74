//! Scalar field validators.

use std::sync::LazyLock;

use chrono::DateTime;
use regex::Regex;
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::context::FieldCx;
use crate::error::Error;

#[allow(clippy::expect_used)] // good regex, it doesn't panic
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static regex should not panic")
});

#[allow(clippy::expect_used)] // good regex, it doesn't panic
static E164: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+[1-9]\d{1,14}$").expect("static regex should not panic"));

pub fn string(
    cx: &FieldCx<'_>,
    enum_values: Option<&[String]>,
    max_length: Option<usize>,
    value: &Value,
) -> Result<(), Error> {
    let Some(text) = value.as_str() else {
        return Err(cx.invalid("must be a string"));
    };
    if let Some(cap) = max_length {
        if text.chars().count() > cap {
            return Err(cx.invalid(format!("longer than {cap} characters")));
        }
    }
    if let Some(allowed) = enum_values {
        if !allowed.iter().any(|candidate| candidate == text) {
            return Err(cx.invalid("not one of the allowed values"));
        }
    }
    Ok(())
}

pub fn number(
    cx: &FieldCx<'_>,
    enum_values: Option<&[i64]>,
    min: Option<f64>,
    max: Option<f64>,
    value: &Value,
) -> Result<(), Error> {
    let Some(num) = value.as_f64() else {
        return Err(cx.invalid("must be a number"));
    };
    if min.is_some_and(|bound| num < bound) {
        return Err(cx.invalid("below the minimum"));
    }
    if max.is_some_and(|bound| num > bound) {
        return Err(cx.invalid("above the maximum"));
    }
    if let Some(allowed) = enum_values {
        let matches_one = value.as_i64().is_some_and(|int| allowed.contains(&int));
        if !matches_one {
            return Err(cx.invalid("not one of the allowed values"));
        }
    }
    Ok(())
}

pub fn boolean(cx: &FieldCx<'_>, value: &Value) -> Result<(), Error> {
    if value.is_boolean() {
        Ok(())
    } else {
        Err(cx.invalid("must be true or false"))
    }
}

pub fn url_value(cx: &FieldCx<'_>, value: &Value) -> Result<(), Error> {
    let Some(text) = value.as_str() else {
        return Err(cx.invalid("must be a string"));
    };
    check_url(cx, text)
}

/// Shared by the url and cors validators.
pub fn check_url(cx: &FieldCx<'_>, text: &str) -> Result<(), Error> {
    if text.len() > 2000 {
        return Err(cx.invalid("longer than 2000 characters"));
    }
    let parsed = Url::parse(text).map_err(|_| cx.invalid("must be a valid url"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(cx.invalid("must use http or https"));
    }
    Ok(())
}

pub fn email(cx: &FieldCx<'_>, value: &Value) -> Result<(), Error> {
    let ok = value.as_str().is_some_and(|text| EMAIL.is_match(text));
    if ok {
        Ok(())
    } else {
        Err(cx.invalid("must be an email address"))
    }
}

pub fn phone(cx: &FieldCx<'_>, value: &Value) -> Result<(), Error> {
    let ok = value.as_str().is_some_and(|text| E164.is_match(text));
    if ok {
        Ok(())
    } else {
        Err(cx.invalid("must be an E.164 phone number"))
    }
}

pub fn password(cx: &FieldCx<'_>, block_fields: &[String], value: &Value) -> Result<(), Error> {
    let Some(text) = value.as_str() else {
        return Err(cx.invalid("must be a string"));
    };
    if text.chars().count() < 6 {
        return Err(cx.invalid("shorter than 6 characters"));
    }
    if !text.chars().any(|c| c.is_ascii_digit()) {
        return Err(cx.invalid("must contain a digit"));
    }
    if !text.chars().any(char::is_lowercase) {
        return Err(cx.invalid("must contain a lower case letter"));
    }
    if !text.chars().any(char::is_uppercase) {
        return Err(cx.invalid("must contain an upper case letter"));
    }
    for blocked in block_fields {
        let current = cx.sibling(blocked).or_else(|| cx.stored_field(blocked));
        if current
            .and_then(Value::as_str)
            .is_some_and(|other| other.eq_ignore_ascii_case(text))
        {
            return Err(cx.invalid(format!("must not equal '{blocked}'")));
        }
    }
    Ok(())
}

pub fn date(cx: &FieldCx<'_>, value: &Value) -> Result<(), Error> {
    let ok = match value {
        Value::Number(millis) => millis
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .is_some(),
        Value::String(text) => DateTime::parse_from_rfc3339(text).is_ok(),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(cx.invalid("must be a date"))
    }
}

pub fn reference(cx: &FieldCx<'_>, value: &Value) -> Result<(), Error> {
    let ok = value
        .as_str()
        .is_some_and(|text| Uuid::parse_str(text).is_ok());
    if ok {
        Ok(())
    } else {
        Err(cx.invalid("must be a well-formed identifier"))
    }
}

pub fn country(cx: &FieldCx<'_>, allow: &[String], value: &Value) -> Result<(), Error> {
    let ok = value
        .as_str()
        .is_some_and(|code| allow.iter().any(|candidate| candidate == code));
    if ok {
        Ok(())
    } else {
        Err(cx.invalid("not an allowed country"))
    }
}
