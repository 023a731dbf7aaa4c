//! Outbound events assembled by the application.

use brolink_native::WireArg;
use brolink_protocol::{MarshalError, MarshalResult};
use brolink_values::TypedValue;

use crate::transport::lend_all;

#[derive(Debug)]
pub struct OutboundEvent {
    name: String,
    parameters: Vec<TypedValue>,
}

impl OutboundEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters(
        name: impl Into<String>,
        parameters: impl IntoIterator<Item = TypedValue>,
    ) -> Self {
        let mut event = Self::new(name);
        event.add_parameters(parameters);
        event
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_parameter(&mut self, value: TypedValue) -> &mut Self {
        self.parameters.push(value);
        self
    }

    pub fn add_parameters(&mut self, values: impl IntoIterator<Item = TypedValue>) -> &mut Self {
        self.parameters.extend(values);
        self
    }

    /// Swaps the parameter at `index`, returning the previous value.
    pub fn replace_parameter(&mut self, index: usize, value: TypedValue) -> MarshalResult<TypedValue> {
        let count = self.parameters.len();
        let slot = self.parameters.get_mut(index).ok_or_else(|| {
            MarshalError::invalid(format!("parameter {index} out of range for {count}"))
        })?;
        Ok(std::mem::replace(slot, value))
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    pub fn parameters(&self) -> &[TypedValue] {
        &self.parameters
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TypedValue> {
        self.parameters.iter()
    }

    /// Lends every parameter for the duration of `f`.
    pub fn with_native_args<R>(
        &self,
        f: &mut dyn FnMut(&[WireArg<'_>]) -> MarshalResult<R>,
    ) -> MarshalResult<R> {
        lend_all(&self.parameters, f)
    }
}

impl<'a> IntoIterator for &'a OutboundEvent {
    type Item = &'a TypedValue;
    type IntoIter = std::slice::Iter<'a, TypedValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brolink_protocol::TypeTag;

    #[test]
    fn builds_and_edits_parameters() -> anyhow::Result<()> {
        let mut event = OutboundEvent::with_parameters("pong", [TypedValue::count(1)]);
        event
            .add_parameter(TypedValue::string("peer"))
            .add_parameters([TypedValue::bool(true)]);
        assert_eq!(event.parameter_count(), 3);

        let previous = event.replace_parameter(0, TypedValue::count(2))?;
        assert_eq!(previous.as_unsigned(), Some(1));
        assert!(event.replace_parameter(3, TypedValue::count(0)).is_err());

        let tags: Vec<TypeTag> = event.iter().map(TypedValue::tag).collect();
        assert_eq!(tags, vec![TypeTag::Count, TypeTag::String, TypeTag::Bool]);
        Ok(())
    }

    #[test]
    fn lends_all_parameters_with_type_names() -> anyhow::Result<()> {
        let mut named = TypedValue::count(9);
        named.set_type_name(Some("seq_t".to_owned()));
        let event = OutboundEvent::with_parameters("pong", [named, TypedValue::double(0.5)]);
        let seen = event.with_native_args(&mut |args| {
            Ok(args
                .iter()
                .map(|arg| {
                    let name = arg.type_name().map(|n| n.to_string_lossy().into_owned());
                    (arg.tag(), name, !arg.data().is_null())
                })
                .collect::<Vec<_>>())
        })?;
        assert_eq!(
            seen,
            vec![
                (TypeTag::Count, Some("seq_t".to_owned()), true),
                (TypeTag::Double, None, true),
            ]
        );
        Ok(())
    }
}
