//! Parameter construction and attachment.
//!
//! Parameters are built with their value left as supplied. Normalization happens
//! once per execution, when the parameters are attached to a command: input
//! parameters without a value are rewritten to [`Value::Null`], output parameters
//! are attached untouched.

use crate::error::{DbError, DbResult};
use crate::models::{Direction, ParamType, Parameter, Value};

pub struct ParameterBuilder;

impl ParameterBuilder {
    /// Build an input parameter with an unspecified provider type.
    pub fn build(name: impl Into<String>, value: Option<Value>) -> Parameter {
        Parameter::new(name, value)
    }

    /// Build a fully specified parameter.
    pub fn build_typed(
        name: impl Into<String>,
        param_type: ParamType,
        size: Option<usize>,
        direction: Direction,
        value: Option<Value>,
    ) -> Parameter {
        Parameter {
            name: name.into(),
            value,
            param_type,
            size,
            direction,
        }
    }

    /// Overwrite an existing parameter in place, reusing its name buffer.
    pub fn reset(
        param: &mut Parameter,
        name: &str,
        param_type: ParamType,
        size: Option<usize>,
        direction: Direction,
        value: Option<Value>,
    ) {
        param.name.clear();
        param.name.push_str(name);
        param.value = value;
        param.param_type = param_type;
        param.size = size;
        param.direction = direction;
    }

    /// Reset the parameter in `slot` if there is one, otherwise build a new one there.
    pub fn reset_or_build<'a>(
        slot: &'a mut Option<Parameter>,
        name: &str,
        param_type: ParamType,
        size: Option<usize>,
        direction: Direction,
        value: Option<Value>,
    ) -> &'a mut Parameter {
        let param = match slot.take() {
            Some(mut existing) => {
                Self::reset(&mut existing, name, param_type, size, direction, value);
                existing
            }
            None => Self::build_typed(name, param_type, size, direction, value),
        };
        slot.insert(param)
    }

    /// Normalize one parameter for execution.
    pub fn normalize(param: &mut Parameter) -> DbResult<()> {
        if param.direction.is_input() && param.value.is_none() {
            param.value = Some(Value::Null);
        }

        if let Some(value) = &param.value {
            if !param.param_type.accepts(value) {
                return Err(DbError::type_mismatch(
                    &param.name,
                    param.param_type.name(),
                    value.type_name(),
                ));
            }
            if let (Some(size), Some(len)) = (param.size, value.len()) {
                if param.direction.is_input() && len > size {
                    return Err(DbError::invalid_argument(format!(
                        "value of parameter '{}' has length {} which exceeds its declared size {}",
                        param.name, len, size
                    )));
                }
            }
        }
        Ok(())
    }

    /// Replace `target` with normalized copies of `source`.
    ///
    /// On error `target` is left empty.
    pub fn attach(target: &mut Vec<Parameter>, source: &[Parameter]) -> DbResult<()> {
        target.clear();
        target.reserve(source.len());
        for param in source {
            let mut param = param.clone();
            if let Err(e) = Self::normalize(&mut param) {
                target.clear();
                return Err(e);
            }
            target.push(param);
        }
        Ok(())
    }
}
