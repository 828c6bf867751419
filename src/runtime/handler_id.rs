use crate::utils::error::{AppError, Result};
use std::fmt;
use std::str::FromStr;

/// `<module>.<function>`; the module part may itself be dotted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId {
    module: String,
    function: String,
}

impl HandlerId {
    pub fn new(module: &str, function: &str) -> Result<Self> {
        format!("{}.{}", module, function).parse()
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn function(&self) -> &str {
        &self.function
    }
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

impl FromStr for HandlerId {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self> {
        let invalid = |reason: &str| AppError::InvalidHandlerId {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let (module, function) = value
            .trim()
            .rsplit_once('.')
            .ok_or_else(|| invalid("expected <module>.<function>"))?;

        if !module.split('.').all(is_identifier) {
            return Err(invalid("module must be a dotted path of identifiers"));
        }
        if !is_identifier(function) {
            return Err(invalid("function must be an identifier"));
        }

        Ok(Self {
            module: module.to_string(),
            function: function.to_string(),
        })
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.function)
    }
}
