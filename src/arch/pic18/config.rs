//! Device definitions: the register map a PIC18 catalog is loaded from.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::LiftError;

/// PIC18 instruction-set family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// 12-bit data addresses, 4-bit BSR.
    Traditional,
    /// 14-bit data addresses, 6-bit BSR, MOVFFL/MOVSFL.
    Enhanced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitFieldConfig {
    pub name: String,
    pub bit: u8,
    #[serde(default = "default_bit_width")]
    pub width: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterConfig {
    pub name: String,
    #[serde(deserialize_with = "address")]
    pub address: u32,
    /// Width in bits; joint registers such as FSR0 are 16 or 24 wide.
    #[serde(default = "default_register_width")]
    pub width: u32,
    #[serde(default)]
    pub bit_fields: Vec<BitFieldConfig>,
}

/// A named value of a configuration field, e.g. `HS` for `FOSC = 0b0010`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSettingConfig {
    pub name: String,
    pub value: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFieldConfig {
    pub name: String,
    pub bit: u8,
    #[serde(default = "default_bit_width")]
    pub width: u8,
    #[serde(default)]
    pub settings: Vec<ConfigSettingConfig>,
}

/// One configuration byte in program memory (`CONFIG1H` at `0x300001`...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigWordConfig {
    pub name: String,
    #[serde(deserialize_with = "address")]
    pub address: u32,
    #[serde(default)]
    pub fields: Vec<ConfigFieldConfig>,
}

/// A device's data-memory layout and special function registers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub family: Family,
    /// First access-bank offset that maps into the SFR window.
    #[serde(deserialize_with = "address")]
    pub access_split: u32,
    /// Base of the SFR window the upper access bank maps into.
    #[serde(deserialize_with = "address")]
    pub sfr_window: u32,
    pub data_address_bits: u32,
    pub registers: Vec<RegisterConfig>,
    /// Registers that far moves (MOVFF, MOVFFL, MOVSF, MOVSFL) may not write.
    #[serde(default = "default_forbidden")]
    pub forbidden_far_destinations: Vec<String>,
    /// Fuse bytes named by CONFIG directives.
    #[serde(default)]
    pub config_words: Vec<ConfigWordConfig>,
}

fn default_bit_width() -> u8 {
    1
}

fn default_register_width() -> u32 {
    8
}

fn default_forbidden() -> Vec<String> {
    ["PCL", "TOSL", "TOSH", "TOSU"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrHex {
    Number(u32),
    Text(String),
}

/// Accepts `4056` as well as `"0xFD8"`.
fn address<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    match NumberOrHex::deserialize(deserializer)? {
        NumberOrHex::Number(n) => Ok(n),
        NumberOrHex::Text(s) => parse_number(&s).map_err(serde::de::Error::custom),
    }
}

fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}

impl DeviceConfig {
    pub fn from_json(json: &str) -> Result<Self, LiftError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, LiftError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        log::debug!("loading device definition from {}", path.as_ref().display());
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"{
        "name": "PIC18TEST",
        "family": "traditional",
        "access_split": "0x80",
        "sfr_window": 3840,
        "data_address_bits": 12,
        "registers": [
            { "name": "STATUS", "address": "0xFD8",
              "bit_fields": [ { "name": "C", "bit": 0 }, { "name": "Z", "bit": 2 } ] },
            { "name": "FSR0", "address": "0xFE9", "width": 16 }
        ]
    }"#;

    #[test]
    fn test_parse_hex_and_decimal_addresses() {
        let config = DeviceConfig::from_json(MINIMAL).unwrap();
        assert_eq!(config.family, Family::Traditional);
        assert_eq!(config.access_split, 0x80);
        assert_eq!(config.sfr_window, 0xF00);
        assert_eq!(config.registers[0].address, 0xFD8);
        assert_eq!(config.registers[0].width, 8);
        assert_eq!(config.registers[0].bit_fields[1].width, 1);
        assert_eq!(config.registers[1].width, 16);
        assert_eq!(config.forbidden_far_destinations, vec!["PCL", "TOSL", "TOSH", "TOSU"]);
        assert!(config.config_words.is_empty());
    }

    #[test]
    fn test_parse_config_words() {
        let json = MINIMAL.replacen(
            "\"registers\"",
            r#""config_words": [
                { "name": "CONFIG1H", "address": "0x300001",
                  "fields": [ { "name": "FOSC", "bit": 0, "width": 4,
                                "settings": [ { "name": "HS", "value": 2 } ] },
                              { "name": "IESO", "bit": 7 } ] }
            ],
            "registers""#,
            1,
        );
        let config = DeviceConfig::from_json(&json).unwrap();
        let word = &config.config_words[0];
        assert_eq!(word.address, 0x300001);
        assert_eq!(word.fields[0].settings[0].name, "HS");
        assert_eq!(word.fields[1].width, 1);
        assert!(word.fields[1].settings.is_empty());
    }

    #[test]
    fn test_bad_address_is_rejected() {
        let json = MINIMAL.replace("\"0xFD8\"", "\"0xZZ\"");
        assert!(matches!(DeviceConfig::from_json(&json), Err(LiftError::Json(_))));
    }

    #[test]
    fn test_from_path() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = DeviceConfig::from_path(file.path()).unwrap();
        assert_eq!(config.name, "PIC18TEST");
        assert!(DeviceConfig::from_path("/nonexistent/device.json").is_err());
    }
}
