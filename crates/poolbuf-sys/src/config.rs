use alloc::string::String;
use core::{
  error::Error,
  fmt,
  str::FromStr,
};

/// A tunable that could not be read or is outside its range. `key` is the
/// environment variable naming the tunable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
  Parse { key: &'static str, value: String },
  OutOfRange { key: &'static str, value: usize, reason: &'static str },
}

impl fmt::Display for ConfigError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConfigError::Parse { key, value } => write!(f, "{}: cannot parse {:?}", key, value),
      ConfigError::OutOfRange { key, value, reason } => write!(f, "{} = {}: {}", key, value, reason),
    }
  }
}

impl Error for ConfigError {}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Reads `key` through `lookup`. Missing keys are `Ok(None)`; surrounding
/// whitespace is ignored.
pub fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> ConfigResult<Option<T>>
where
  T: FromStr,
{
  let Some(raw) = lookup(key) else {
    return Ok(None);
  };
  raw
    .trim()
    .parse()
    .map(Some)
    .map_err(|_| ConfigError::Parse { key, value: raw })
}

#[cfg(test)]
mod tests {
  use alloc::string::ToString;

  use super::*;

  #[test]
  fn test_parse_var() {
    let lookup = |key: &str| match key {
      "A" => Some(" 42 ".to_string()),
      "B" => Some("nope".to_string()),
      _ => None,
    };

    assert_eq!(parse_var::<usize>(&lookup, "A"), Ok(Some(42)));
    assert_eq!(parse_var::<usize>(&lookup, "C"), Ok(None));
    assert_eq!(
      parse_var::<usize>(&lookup, "B"),
      Err(ConfigError::Parse {
        key: "B",
        value: "nope".to_string(),
      })
    );
  }

  #[test]
  fn test_display() {
    let err = ConfigError::OutOfRange {
      key: "POOLBUF_RATIO",
      value: 6,
      reason: "expected a power of two",
    };
    assert_eq!(err.to_string(), "POOLBUF_RATIO = 6: expected a power of two");
  }
}
