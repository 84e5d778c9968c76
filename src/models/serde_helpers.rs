// Serde helpers for fields the detection service may send as null.

use serde::{Deserialize, Deserializer};

/// Deserializes a field that may be `null` into its default value.
///
/// The image endpoint fills severity, description and recommendations from a
/// secondary diagnosis backend and passes `null` through when that backend fails.
pub fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    let value = Option::<T>::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}
