//! Device definitions embedded in the library.

use super::config::DeviceConfig;
use crate::LiftError;

const BUILTIN: &[(&str, &str)] = &[
    ("pic18f4620", include_str!("../../../devices/pic18f4620.json")),
    ("pic18f46k42", include_str!("../../../devices/pic18f46k42.json")),
];

/// Names of the embedded devices.
pub fn names() -> impl Iterator<Item = &'static str> {
    BUILTIN.iter().map(|(name, _)| *name)
}

/// Parse the embedded definition of `name` (case-insensitive).
pub fn builtin(name: &str) -> Result<DeviceConfig, LiftError> {
    let wanted = name.to_ascii_lowercase();
    let (_, json) = BUILTIN
        .iter()
        .find(|(n, _)| *n == wanted)
        .ok_or_else(|| LiftError::DeviceConfig(format!("no built-in device named '{}'", name)))?;
    DeviceConfig::from_json(json)
}
