//! Explicit conversions between tags.
//!
//! Only the pairs listed on [`TypedValue::convert_to`] convert; every other
//! pair fails with `TypeMismatch`. Nothing converts implicitly.

use brolink_protocol::{Address, MarshalError, MarshalResult, Scalar, Time, TypeTag};

use crate::record::Record;
use crate::set::Set;
use crate::value::{Payload, TypedValue};
use crate::vector::Vector;

impl TypedValue {
    /// Converts into a new value of tag `target`.
    ///
    /// | from | to |
    /// |---|---|
    /// | any tag | the same tag (deep copy) |
    /// | bool | int family, double family, string (`T`/`F`) |
    /// | int family | bool, int family, double family, string |
    /// | double family | bool, int family (rounded), double family, string |
    /// | string | bool, int family, double family, addr |
    /// | port | bool, int family, double family, string |
    /// | addr | string |
    /// | subnet | string, addr (the network address) |
    /// | table | set (of its keys) |
    /// | record, list | record, list, vector, set |
    /// | vector | record, list, set |
    /// | set | record, list, vector |
    ///
    /// The int family is int, count, counter and enum; the double family is
    /// double, time and interval. Values that do not fit the target (a
    /// negative count, an unparsable string) are `TypeMismatch` as well.
    pub fn convert_to(&self, target: TypeTag) -> MarshalResult<TypedValue> {
        if target == self.tag() {
            return self.try_clone();
        }
        if target.is_unsupported() {
            return Err(MarshalError::UnsupportedType(target));
        }
        let refused = || MarshalError::mismatch(target, self.tag());
        match self.payload() {
            Payload::Scalar(scalar) => convert_scalar(self.tag(), *scalar, target)
                .ok_or_else(refused)?
                .map(|payload| TypedValue::from_parts(target, payload)),
            Payload::Str(bytes) => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|_| MarshalError::mismatch(target, "non-UTF-8 string"))?;
                convert_text(text.trim(), target)
                    .ok_or_else(refused)?
                    .map(|scalar| TypedValue::from_parts(target, Payload::Scalar(scalar)))
            }
            Payload::Empty if collection_pair(self.tag(), target) => TypedValue::null(target),
            Payload::Vector(vector) => match target {
                TypeTag::Record | TypeTag::List => {
                    Record::from_values(vector.api().clone(), vector.to_vec()?)
                        .map(|record| TypedValue::from_parts(target, Payload::Record(record)))
                }
                TypeTag::Set => Set::from_values(vector.api().clone(), vector.to_vec()?)
                    .map(TypedValue::set),
                _ => Err(refused()),
            },
            Payload::Record(record) => {
                let values = record
                    .to_fields()?
                    .into_iter()
                    .map(|field| field.value)
                    .collect::<Vec<_>>();
                match target {
                    TypeTag::Record | TypeTag::List => record
                        .try_clone()
                        .map(|record| TypedValue::from_parts(target, Payload::Record(record))),
                    TypeTag::Vector => {
                        Vector::from_values(record.api().clone(), values).map(TypedValue::vector)
                    }
                    TypeTag::Set => {
                        Set::from_values(record.api().clone(), values).map(TypedValue::set)
                    }
                    _ => Err(refused()),
                }
            }
            Payload::Set(set) => match target {
                TypeTag::Record | TypeTag::List => {
                    Record::from_values(set.api().clone(), set.to_vec()?)
                        .map(|record| TypedValue::from_parts(target, Payload::Record(record)))
                }
                TypeTag::Vector => {
                    Vector::from_values(set.api().clone(), set.to_vec()?).map(TypedValue::vector)
                }
                _ => Err(refused()),
            },
            Payload::Table(table) if target == TypeTag::Set => {
                Set::from_values(table.api().clone(), table.keys()?).map(TypedValue::set)
            }
            _ => Err(refused()),
        }
    }
}

fn collection_pair(from: TypeTag, to: TypeTag) -> bool {
    use TypeTag::{List, Record, Set, Table, Vector};
    matches!(
        (from, to),
        (Table, Set)
            | (Record | List, Record | List | Vector | Set)
            | (Vector, Record | List | Set)
            | (Set, Record | List | Vector)
    )
}

fn is_int_family(tag: TypeTag) -> bool {
    tag.is_unsigned_family()
}

fn is_double_family(tag: TypeTag) -> bool {
    matches!(tag, TypeTag::Double | TypeTag::Time | TypeTag::Interval)
}

/// `None` when the pair is not convertible at all.
fn convert_scalar(
    from: TypeTag,
    scalar: Scalar,
    target: TypeTag,
) -> Option<MarshalResult<Payload>> {
    let converted = match scalar {
        Scalar::Bool(flag) => {
            if is_int_family(target) {
                integral(target, i128::from(flag))
            } else if is_double_family(target) {
                Ok(real(target, if flag { 1.0 } else { 0.0 }))
            } else if target == TypeTag::String {
                return Some(Ok(text(if flag { "T" } else { "F" })));
            } else {
                return None;
            }
        }
        Scalar::Unsigned(raw) => {
            let number = if from == TypeTag::Int {
                i128::from(raw as i64)
            } else {
                i128::from(raw)
            };
            if target == TypeTag::Bool {
                Ok(Scalar::Bool(number != 0))
            } else if is_int_family(target) {
                integral(target, number)
            } else if is_double_family(target) {
                Ok(real(target, number as f64))
            } else if target == TypeTag::String {
                return Some(Ok(text(&number.to_string())));
            } else {
                return None;
            }
        }
        Scalar::Real(_) | Scalar::Time(_) => {
            let seconds = match scalar {
                Scalar::Time(time) => time.seconds(),
                Scalar::Real(value) => value,
                _ => return None,
            };
            if target == TypeTag::Bool {
                Ok(Scalar::Bool(seconds.round() != 0.0))
            } else if is_int_family(target) {
                rounded(target, seconds)
            } else if is_double_family(target) {
                Ok(real(target, seconds))
            } else if target == TypeTag::String {
                return Some(Ok(text(&seconds.to_string())));
            } else {
                return None;
            }
        }
        Scalar::Port(port) => {
            if target == TypeTag::Bool {
                Ok(Scalar::Bool(port.number != 0))
            } else if is_int_family(target) {
                integral(target, i128::from(port.number))
            } else if is_double_family(target) {
                Ok(real(target, port.number as f64))
            } else if target == TypeTag::String {
                return Some(Ok(text(&port.to_string())));
            } else {
                return None;
            }
        }
        Scalar::Addr(address) if target == TypeTag::String => {
            return Some(Ok(text(&address.to_string())));
        }
        Scalar::Subnet(subnet) => match target {
            TypeTag::String => return Some(Ok(text(&subnet.to_string()))),
            TypeTag::IpAddr => Ok(Scalar::Addr(subnet.address)),
            _ => return None,
        },
        Scalar::Addr(_) => return None,
    };
    Some(converted.map(Payload::Scalar))
}

/// `None` when strings never convert to `target`.
fn convert_text(text: &str, target: TypeTag) -> Option<MarshalResult<Scalar>> {
    let unparsable = || MarshalError::mismatch(target, format!("string `{text}`"));
    let converted = if target == TypeTag::Bool {
        match text.parse::<i64>() {
            Ok(number) => Ok(Scalar::Bool(number != 0)),
            Err(_) => match text.to_ascii_lowercase().as_str() {
                "true" | "t" => Ok(Scalar::Bool(true)),
                "false" | "f" => Ok(Scalar::Bool(false)),
                _ => Err(unparsable()),
            },
        }
    } else if is_int_family(target) {
        text.parse::<i128>()
            .map_err(|_| unparsable())
            .and_then(|number| integral(target, number))
    } else if is_double_family(target) {
        text.parse::<f64>()
            .map(|seconds| real(target, seconds))
            .map_err(|_| unparsable())
    } else if target == TypeTag::IpAddr {
        text.parse::<Address>()
            .map(Scalar::Addr)
            .map_err(|_| unparsable())
    } else {
        return None;
    };
    Some(converted)
}

fn integral(target: TypeTag, number: i128) -> MarshalResult<Scalar> {
    let out_of_range = || MarshalError::mismatch(target, format!("integer {number}"));
    if target == TypeTag::Int {
        let signed = i64::try_from(number).map_err(|_| out_of_range())?;
        return Ok(Scalar::Unsigned(signed as u64));
    }
    u64::try_from(number)
        .map(Scalar::Unsigned)
        .map_err(|_| out_of_range())
}

fn rounded(target: TypeTag, value: f64) -> MarshalResult<Scalar> {
    if !value.is_finite() {
        return Err(MarshalError::mismatch(target, format!("double {value}")));
    }
    integral(target, value.round() as i128)
}

fn real(target: TypeTag, value: f64) -> Scalar {
    if target == TypeTag::Time {
        Scalar::Time(Time::from_seconds(value))
    } else {
        Scalar::Real(value)
    }
}

fn text(value: &str) -> Payload {
    Payload::Str(value.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use crate::table::Table;
    use brolink_native::{HeapNative, SharedNative};
    use brolink_protocol::{Port, Subnet};
    use std::sync::Arc;

    fn api() -> SharedNative {
        Arc::new(HeapNative::new())
    }

    #[test]
    fn booleans() -> anyhow::Result<()> {
        let yes = TypedValue::bool(true);
        assert_eq!(yes.convert_to(TypeTag::Count)?.as_unsigned(), Some(1));
        assert_eq!(yes.convert_to(TypeTag::Double)?.as_double(), Some(1.0));
        assert_eq!(yes.convert_to(TypeTag::String)?.as_str(), Some("T"));
        assert_eq!(TypedValue::bool(false).convert_to(TypeTag::String)?.as_str(), Some("F"));
        assert!(yes.convert_to(TypeTag::Port).is_err());
        Ok(())
    }

    #[test]
    fn integers() -> anyhow::Result<()> {
        let negative = TypedValue::int(-3);
        assert_eq!(negative.convert_to(TypeTag::Double)?.as_double(), Some(-3.0));
        assert_eq!(negative.convert_to(TypeTag::String)?.as_str(), Some("-3"));
        assert!(matches!(
            negative.convert_to(TypeTag::Count),
            Err(MarshalError::TypeMismatch { .. })
        ));
        let count = TypedValue::count(5);
        assert_eq!(count.convert_to(TypeTag::Bool)?.as_bool(), Some(true));
        assert_eq!(count.convert_to(TypeTag::Int)?.as_int(), Some(5));
        assert_eq!(
            count.convert_to(TypeTag::Time)?.as_time(),
            Some(Time::from_seconds(5.0))
        );
        Ok(())
    }

    #[test]
    fn doubles_round() -> anyhow::Result<()> {
        assert_eq!(TypedValue::double(2.6).convert_to(TypeTag::Count)?.as_unsigned(), Some(3));
        assert_eq!(TypedValue::double(-2.6).convert_to(TypeTag::Int)?.as_int(), Some(-3));
        assert_eq!(TypedValue::double(0.4).convert_to(TypeTag::Bool)?.as_bool(), Some(false));
        assert!(TypedValue::double(-1.0).convert_to(TypeTag::Count).is_err());
        assert!(TypedValue::double(f64::NAN).convert_to(TypeTag::Int).is_err());
        assert_eq!(
            TypedValue::interval(1.5).convert_to(TypeTag::String)?.as_str(),
            Some("1.5")
        );
        Ok(())
    }

    #[test]
    fn strings_parse() -> anyhow::Result<()> {
        assert_eq!(TypedValue::string("0").convert_to(TypeTag::Bool)?.as_bool(), Some(false));
        assert_eq!(TypedValue::string("true").convert_to(TypeTag::Bool)?.as_bool(), Some(true));
        assert_eq!(TypedValue::string(" 42 ").convert_to(TypeTag::Count)?.as_unsigned(), Some(42));
        assert_eq!(TypedValue::string("2.5").convert_to(TypeTag::Interval)?.as_double(), Some(2.5));
        assert_eq!(
            TypedValue::string("10.1.2.3").convert_to(TypeTag::IpAddr)?.to_string(),
            "10.1.2.3"
        );
        assert!(TypedValue::string("nope").convert_to(TypeTag::Count).is_err());
        assert!(TypedValue::string("80/tcp").convert_to(TypeTag::Port).is_err());
        Ok(())
    }

    #[test]
    fn network_types() -> anyhow::Result<()> {
        let port = TypedValue::port(Port::udp(53));
        assert_eq!(port.convert_to(TypeTag::Count)?.as_unsigned(), Some(53));
        assert_eq!(port.convert_to(TypeTag::String)?.as_str(), Some("53/udp"));

        let subnet = TypedValue::subnet("10.0.0.0/8".parse::<Subnet>()?);
        assert_eq!(subnet.convert_to(TypeTag::IpAddr)?.to_string(), "10.0.0.0");
        assert_eq!(subnet.convert_to(TypeTag::String)?.as_str(), Some("10.0.0.0/8"));

        let addr = TypedValue::addr("::1".parse::<Address>()?);
        assert_eq!(addr.convert_to(TypeTag::String)?.as_str(), Some("::1"));
        assert!(addr.convert_to(TypeTag::Subnet).is_err());
        Ok(())
    }

    #[test]
    fn collections() -> anyhow::Result<()> {
        let api = api();
        let record = TypedValue::record(Record::from_fields(
            api.clone(),
            [
                Field::new("a", TypedValue::count(1)),
                Field::new("b", TypedValue::count(1)),
            ],
        )?);
        let set = record.convert_to(TypeTag::Set)?;
        assert_eq!(set.as_set().map(Set::len).transpose()?, Some(1));
        let vector = record.convert_to(TypeTag::Vector)?;
        assert_eq!(vector.as_vector().map(Vector::len).transpose()?, Some(2));
        let list = vector.convert_to(TypeTag::List)?;
        assert_eq!(list.tag(), TypeTag::List);
        assert!(vector.convert_to(TypeTag::Table).is_err());

        let table = TypedValue::table(Table::from_pairs(
            api,
            [(TypedValue::string("k"), TypedValue::count(9))],
        )?);
        let keys = table.convert_to(TypeTag::Set)?;
        let keys = keys.as_set().ok_or_else(|| anyhow::anyhow!("not a set"))?;
        assert!(keys.contains(&TypedValue::string("k"))?);
        assert!(table.convert_to(TypeTag::Vector).is_err());
        Ok(())
    }

    #[test]
    fn null_collections_stay_null() -> anyhow::Result<()> {
        let empty = TypedValue::null(TypeTag::Vector)?;
        assert!(!empty.convert_to(TypeTag::Set)?.has_value());
        assert!(empty.convert_to(TypeTag::Table).is_err());
        Ok(())
    }
}
