use serde_json::{Map, Value};
use thiserror::Error;

/// Caller-input defects, reported before any network call is issued.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArgError {
    #[error("missing required parameter: {name}")]
    Missing { name: String },
    #[error("parameter {name} is not of type {expected}")]
    WrongType { name: String, expected: &'static str },
    #[error("{0}")]
    Invalid(String),
}

impl ArgError {
    pub fn code(&self) -> &'static str {
        match self {
            ArgError::Missing { .. } => "missing_parameter",
            ArgError::WrongType { .. } => "wrong_type",
            ArgError::Invalid(_) => "validation",
        }
    }

    fn missing(name: &str) -> Self {
        ArgError::Missing { name: name.into() }
    }

    fn wrong_type(name: &str, expected: &'static str) -> Self {
        ArgError::WrongType {
            name: name.into(),
            expected,
        }
    }
}

pub type Args = Map<String, Value>;

/// Required string: absent or empty both count as missing.
pub fn required_string(args: &Args, name: &str) -> Result<String, ArgError> {
    match optional_string(args, name)? {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(ArgError::missing(name)),
    }
}

/// Required positive integer: absent or zero both count as missing,
/// negatives are invalid.
pub fn required_int(args: &Args, name: &str) -> Result<i64, ArgError> {
    match optional_int(args, name)? {
        None | Some(0) => Err(ArgError::missing(name)),
        Some(n) if n < 0 => Err(ArgError::Invalid(format!(
            "parameter {} must be positive, got {}",
            name, n
        ))),
        Some(n) => Ok(n),
    }
}

pub fn optional_string(args: &Args, name: &str) -> Result<Option<String>, ArgError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ArgError::wrong_type(name, "string")),
    }
}

pub fn optional_int(args: &Args, name: &str) -> Result<Option<i64>, ArgError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| ArgError::wrong_type(name, "integer")),
        Some(_) => Err(ArgError::wrong_type(name, "integer")),
    }
}

/// Optional integer with a default substituted when absent or zero.
pub fn optional_int_or(args: &Args, name: &str, default: i64) -> Result<i64, ArgError> {
    match optional_int(args, name)? {
        Some(n) if n != 0 => Ok(n),
        _ => Ok(default),
    }
}

/// Closed-set membership check for enum-like parameters.
pub fn optional_enum(
    args: &Args,
    name: &str,
    allowed: &[&str],
) -> Result<Option<String>, ArgError> {
    match optional_string(args, name)? {
        None => Ok(None),
        Some(s) if allowed.contains(&s.as_str()) => Ok(Some(s)),
        Some(s) => Err(ArgError::Invalid(format!(
            "parameter {} must be one of [{}], got {:?}",
            name,
            allowed.join(", "),
            s
        ))),
    }
}

/// Page/limit bounds shared by the paginated tools: page >= 1, size in 1..=100.
pub fn limit_in_range(args: &Args, name: &str, default: i64) -> Result<u32, ArgError> {
    let n = optional_int_or(args, name, default)?;
    if !(1..=100).contains(&n) {
        return Err(ArgError::Invalid(format!(
            "parameter {} must be in 1..=100, got {}",
            name, n
        )));
    }
    Ok(n as u32)
}

pub fn page_at_least_one(args: &Args, name: &str) -> Result<Option<u32>, ArgError> {
    match optional_int(args, name)? {
        None => Ok(None),
        Some(n) if n >= 1 => Ok(Some(n as u32)),
        Some(n) => Err(ArgError::Invalid(format!(
            "parameter {} must be >= 1, got {}",
            name, n
        ))),
    }
}

/// Forward/backward cursors are mutually exclusive, and neither combines
/// with numeric paging.
pub fn cursor_exclusive(
    args: &Args,
    forward: &str,
    backward: &str,
) -> Result<(Option<String>, Option<String>), ArgError> {
    let after = optional_string(args, forward)?;
    let before = optional_string(args, backward)?;
    if after.is_some() && before.is_some() {
        return Err(ArgError::Invalid(format!(
            "parameters {} and {} are mutually exclusive",
            forward, backward
        )));
    }
    if (after.is_some() || before.is_some()) && args.get("page").is_some() {
        let which = if after.is_some() { forward } else { backward };
        return Err(ArgError::Invalid(format!(
            "parameters page and {} are mutually exclusive",
            which
        )));
    }
    Ok((after, before))
}

/// tools/call arguments arrive as an arbitrary JSON value; anything but an
/// object (or null, meaning no arguments) is a caller defect.
pub fn as_object(value: &Value) -> Result<Args, ArgError> {
    match value {
        Value::Null => Ok(Map::new()),
        Value::Object(m) => Ok(m.clone()),
        _ => Err(ArgError::Invalid("arguments must be an object".into())),
    }
}
