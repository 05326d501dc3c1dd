//! Command parameter model.

use super::value::{ParamType, Value};
use serde::{Deserialize, Serialize};

/// Direction of a command parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    In,
    Out,
    InOut,
    ReturnValue,
}

impl Direction {
    /// True if the parameter carries a value to the database.
    pub fn is_input(&self) -> bool {
        matches!(self, Self::In | Self::InOut)
    }

    /// True if the database populates the parameter during execution.
    pub fn is_output(&self) -> bool {
        matches!(self, Self::Out | Self::InOut | Self::ReturnValue)
    }
}

/// A named command parameter.
///
/// `value` is `None` when the caller supplied nothing. Attaching the parameter to a
/// command rewrites `None` to [`Value::Null`] for input directions; output parameters
/// keep `None` until the driver populates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub param_type: ParamType,
    /// Maximum length for text/binary values
    #[serde(default)]
    pub size: Option<usize>,
    #[serde(default)]
    pub direction: Direction,
}

impl Parameter {
    /// Create an input parameter with an unspecified provider type.
    pub fn new(name: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            name: name.into(),
            value,
            param_type: ParamType::Unspecified,
            size: None,
            direction: Direction::In,
        }
    }

    /// Create an output parameter of the given type.
    pub fn output(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            value: None,
            param_type,
            size: None,
            direction: Direction::Out,
        }
    }

    pub fn with_type(mut self, param_type: ParamType) -> Self {
        self.param_type = param_type;
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Parameter name without the `@`, `:`, `$` or `?` prefix drivers use.
    pub fn bare_name(&self) -> &str {
        self.name.trim_start_matches(['@', ':', '$', '?'])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_flags() {
        assert!(Direction::In.is_input());
        assert!(Direction::InOut.is_input());
        assert!(Direction::InOut.is_output());
        assert!(!Direction::Out.is_input());
        assert!(Direction::ReturnValue.is_output());
        assert!(!Direction::In.is_output());
    }

    #[test]
    fn test_bare_name() {
        assert_eq!(Parameter::new("@user_id", None).bare_name(), "user_id");
        assert_eq!(Parameter::new(":name", None).bare_name(), "name");
        assert_eq!(Parameter::new("plain", None).bare_name(), "plain");
    }

    #[test]
    fn test_builder_methods() {
        let p = Parameter::new("@total", None)
            .with_type(ParamType::Decimal)
            .with_size(18)
            .with_direction(Direction::InOut);
        assert_eq!(p.param_type, ParamType::Decimal);
        assert_eq!(p.size, Some(18));
        assert_eq!(p.direction, Direction::InOut);
    }
}
