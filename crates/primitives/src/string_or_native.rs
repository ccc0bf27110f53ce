//! The beacon node API encodes every integer as a decimal string, while YAML key files and
//! test fixtures may carry plain numbers. These helpers accept both and always serialize
//! back to strings so that payloads round-trip with the node format.

use core::{
    fmt::{Display, Formatter, Result as FmtResult},
    marker::PhantomData,
    str::FromStr,
};

use serde::{
    Deserialize, Deserializer, Serializer,
    de::{Error, SeqAccess, Visitor},
};

struct StringOrU64Visitor<T>(PhantomData<T>);

impl<T> Visitor<'_> for StringOrU64Visitor<T>
where
    T: FromStr<Err: Display> + TryFrom<u64>,
{
    type Value = T;

    fn expecting(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        formatter.write_str("a string or integer")
    }

    fn visit_str<E: Error>(self, string: &str) -> Result<Self::Value, E> {
        string.parse().map_err(E::custom)
    }

    fn visit_u64<E: Error>(self, value: u64) -> Result<Self::Value, E> {
        T::try_from(value).map_err(|_| E::custom(format!("integer {value} out of range")))
    }
}

/// Deserialize a value from either its decimal string form or a native integer.
pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: FromStr<Err: Display> + TryFrom<u64>,
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(StringOrU64Visitor(PhantomData))
}

/// Serialize a value as its decimal string form.
pub fn serialize<S, T>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Display,
{
    serializer.collect_str(value)
}

/// Same as the parent module, for sequences such as `attesting_indices`.
pub mod sequence {
    use super::*;

    use serde::ser::SerializeSeq as _;

    #[derive(Deserialize)]
    #[serde(transparent)]
    struct Element<T: FromStr<Err: Display> + TryFrom<u64>>(
        #[serde(deserialize_with = "super::deserialize")] T,
    );

    struct SequenceVisitor<T>(PhantomData<T>);

    impl<'de, T> Visitor<'de> for SequenceVisitor<T>
    where
        T: FromStr<Err: Display> + TryFrom<u64>,
    {
        type Value = Vec<T>;

        fn expecting(&self, formatter: &mut Formatter<'_>) -> FmtResult {
            formatter.write_str("a sequence of strings or integers")
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut values = Vec::with_capacity(seq.size_hint().unwrap_or_default());
            while let Some(Element(value)) = seq.next_element::<Element<T>>()? {
                values.push(value);
            }
            Ok(values)
        }
    }

    /// Deserialize a sequence whose elements are strings or native integers.
    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        T: FromStr<Err: Display> + TryFrom<u64>,
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(SequenceVisitor(PhantomData))
    }

    /// Serialize every element as its decimal string form.
    pub fn serialize<S, T>(values: &[T], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Display,
    {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&value.to_string())?;
        }
        seq.end()
    }
}
