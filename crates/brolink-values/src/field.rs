//! Named record members.

use brolink_protocol::MarshalResult;

use crate::value::TypedValue;

/// One record member. An empty name marks a positional (list-mode) field.
#[derive(Debug, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: TypedValue,
}

impl Field {
    pub fn new(name: impl Into<String>, value: TypedValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn unnamed(value: TypedValue) -> Self {
        Self::new(String::new(), value)
    }

    pub fn is_named(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn try_clone(&self) -> MarshalResult<Self> {
        Ok(Self::new(self.name.clone(), self.value.try_clone()?))
    }
}

impl From<TypedValue> for Field {
    fn from(value: TypedValue) -> Self {
        Self::unnamed(value)
    }
}

impl<N: Into<String>> From<(N, TypedValue)> for Field {
    fn from((name, value): (N, TypedValue)) -> Self {
        Self::new(name, value)
    }
}
