// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-sim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Turns a loaded [`Config`] into the initial [`DeviceRegistry`]
//!
//! Two shapes are accepted:
//!
//! - legacy: no `version` (or `version: 1`) and a single `registers` object,
//!   served as device 1;
//! - `version: 2` with a `devices` map whose keys are device ids or
//!   inclusive `start-end` ranges.
//!
//! Register literals are resolved here, once. Word banks take an integer in
//! 0..=65535 or a `0x` string of 1 to 4 hex digits; bit banks take a boolean
//! or an integer (0 is false). Address keys are decimal or `0x` hex.

use log::{debug, info, warn};
use serde_json::Value;

use super::registers::RegistersConfig;
use super::Config;
use crate::error::ConfigError;
use crate::registers::{DeviceRegistry, RegisterBank, RegisterKind, RegisterStore, RegisterValue};

/// Builds the registry described by a configuration.
pub struct ConfigBuilder;

impl ConfigBuilder {
    /// Build every configured device.
    ///
    /// Any malformed device spec, address or value aborts the build.
    pub fn build(config: &Config) -> Result<DeviceRegistry, ConfigError> {
        let mut registry = DeviceRegistry::new();

        match config.version {
            None | Some(1) => {
                let registers = config
                    .registers
                    .as_ref()
                    .ok_or(ConfigError::MissingRegisters)?;
                if config.devices.is_some() {
                    warn!("'devices' is only read with \"version\": 2, ignoring it");
                }
                registry.register_range("1", |id| Self::build_store(id, registers))?;
            }
            Some(2) => {
                let devices = config
                    .devices
                    .as_ref()
                    .filter(|devices| !devices.is_empty())
                    .ok_or(ConfigError::MissingRegisters)?;
                if config.registers.is_some() {
                    warn!("'registers' is not read with \"version\": 2, ignoring it");
                }
                for (spec, device) in devices {
                    let ids = registry
                        .register_range(spec.trim(), |id| Self::build_store(id, &device.registers))?;
                    debug!("Device spec '{}' expanded to {:?}", spec, ids);
                }
            }
            Some(version) => return Err(ConfigError::UnsupportedVersion(version)),
        }

        info!(
            "Configured {} device(s): {:?}",
            registry.len(),
            registry.device_ids().collect::<Vec<_>>()
        );
        Ok(registry)
    }

    /// Build the store of one device from its `registers` section.
    pub fn build_store(
        device_id: u8,
        registers: &RegistersConfig,
    ) -> Result<RegisterStore, ConfigError> {
        let options = registers.options();
        let mut banks = RegisterKind::ALL.map(|kind| {
            // A bank without any entry serves its whole address space.
            let entries = registers.entries(kind);
            RegisterBank::new(kind, options.initialize_undefined || entries.is_empty())
        });

        for bank in banks.iter_mut() {
            let kind = bank.kind();
            for (key, literal) in registers.entries(kind) {
                let address =
                    parse_address(key).ok_or_else(|| ConfigError::InvalidRegisterAddress {
                        device: device_id,
                        kind,
                        address: key.clone(),
                    })?;
                let invalid_value = || ConfigError::InvalidRegisterValue {
                    device: device_id,
                    kind,
                    address: key.clone(),
                    value: literal.to_string(),
                };
                let value = parse_value(kind, literal).ok_or_else(invalid_value)?;
                bank.write(u32::from(address), value)
                    .map_err(|_| invalid_value())?;
            }
            debug!(
                "Device {}: {} {}(s) configured",
                device_id,
                bank.len(),
                kind
            );
        }

        Ok(RegisterStore::from_banks(device_id, options, banks))
    }
}

/// Parse a register address key, decimal or `0x` hex.
pub fn parse_address(key: &str) -> Option<u16> {
    let key = key.trim();
    match key.strip_prefix("0x").or_else(|| key.strip_prefix("0X")) {
        Some(hex) => parse_hex(hex),
        None if !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit()) => key.parse().ok(),
        None => None,
    }
}

// `from_str_radix` alone would also accept a sign.
fn parse_hex(digits: &str) -> Option<u16> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u16::from_str_radix(digits, 16).ok()
}

/// Resolve a configuration literal into a value of `kind`'s bank.
pub fn parse_value(kind: RegisterKind, literal: &Value) -> Option<RegisterValue> {
    if kind.is_bit() {
        match literal {
            Value::Bool(bit) => Some(RegisterValue::Bit(*bit)),
            Value::Number(n) => n
                .as_i64()
                .map(|i| i != 0)
                .or_else(|| n.as_u64().map(|u| u != 0))
                .map(RegisterValue::Bit),
            _ => None,
        }
    } else {
        match literal {
            Value::Number(n) => n
                .as_u64()
                .and_then(|u| u16::try_from(u).ok())
                .map(RegisterValue::Word),
            Value::String(s) => {
                let hex = s.strip_prefix("0x")?;
                if hex.len() > 4 {
                    return None;
                }
                parse_hex(hex).map(RegisterValue::Word)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LookupError;
    use crate::registers::ReadOutcome;
    use serde_json::json;

    fn config(value: Value) -> Config {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("9"), Some(9));
        assert_eq!(parse_address("0x10"), Some(16));
        assert_eq!(parse_address("65535"), Some(65535));
        assert_eq!(parse_address("65536"), None);
        assert_eq!(parse_address("abc"), None);
        assert_eq!(parse_address("-1"), None);
        assert_eq!(parse_address("+9"), None);
        assert_eq!(parse_address("0x+1"), None);
        assert_eq!(parse_address("0x"), None);
    }

    #[test]
    fn test_parse_word_values() {
        let word = |v: Value| parse_value(RegisterKind::HoldingRegister, &v);
        assert_eq!(word(json!("0xAA00")), Some(RegisterValue::Word(43520)));
        assert_eq!(word(json!("0x1")), Some(RegisterValue::Word(1)));
        assert_eq!(word(json!(65535)), Some(RegisterValue::Word(65535)));
        assert_eq!(word(json!(65536)), None);
        assert_eq!(word(json!(-1)), None);
        assert_eq!(word(json!("0x")), None);
        assert_eq!(word(json!("0x12345")), None);
        assert_eq!(word(json!("0x+1")), None);
        assert_eq!(word(json!("0x-1")), None);
        assert_eq!(word(json!("0xg1")), None);
        assert_eq!(word(json!("12")), None);
        assert_eq!(word(json!(true)), None);
        assert_eq!(word(json!(1.5)), None);
    }

    #[test]
    fn test_parse_bit_values() {
        let bit = |v: Value| parse_value(RegisterKind::Coil, &v);
        assert_eq!(bit(json!(true)), Some(RegisterValue::Bit(true)));
        assert_eq!(bit(json!(0)), Some(RegisterValue::Bit(false)));
        assert_eq!(bit(json!(7)), Some(RegisterValue::Bit(true)));
        assert_eq!(bit(json!("true")), None);
    }

    #[test]
    fn test_legacy_end_to_end() {
        let config = config(json!({
            "registers": {"holdingRegister": {"9": "0xAA00"}, "coils": {"1": false}}
        }));
        let registry = ConfigBuilder::build(&config).unwrap();
        let store = registry.resolve(1).unwrap();

        assert_eq!(
            store.read(RegisterKind::HoldingRegister, 9),
            ReadOutcome::Value(RegisterValue::Word(43520))
        );
        store
            .write(RegisterKind::Coil, 5, RegisterValue::Bit(true))
            .unwrap();
        assert_eq!(
            store.read(RegisterKind::Coil, 5),
            ReadOutcome::Value(RegisterValue::Bit(true))
        );
        assert_eq!(registry.resolve(7).unwrap_err(), LookupError::NotFound(7));
        assert!(!store.dirty_kinds().contains(&RegisterKind::HoldingRegister));
    }

    #[test]
    fn test_sparse_and_empty_banks() {
        let config = config(json!({
            "registers": {"holdingRegister": {"0x10": 5}}
        }));
        let registry = ConfigBuilder::build(&config).unwrap();
        let store = registry.resolve(1).unwrap();

        assert!(store.read(RegisterKind::HoldingRegister, 17).is_miss());
        assert_eq!(
            store.read(RegisterKind::HoldingRegister, 16),
            ReadOutcome::Value(RegisterValue::Word(5))
        );
        assert_eq!(
            store.read(RegisterKind::InputRegister, 1234),
            ReadOutcome::Value(RegisterValue::Word(0))
        );
    }

    #[test]
    fn test_versioned_ranges() {
        let config = config(json!({
            "version": 2,
            "devices": {
                "1": {"registers": {"zeroMode": true, "inputRegister": {"0": 11}}},
                "2-3": {"registers": {"holdingRegister": {"1": "0x00FF"}}}
            }
        }));
        let registry = ConfigBuilder::build(&config).unwrap();

        assert_eq!(registry.device_ids().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(registry.resolve(1).unwrap().options().zero_mode);
        assert!(!registry.resolve(3).unwrap().options().zero_mode);
        assert_eq!(
            registry.resolve(3).unwrap().read(RegisterKind::HoldingRegister, 1),
            ReadOutcome::Value(RegisterValue::Word(255))
        );
    }

    #[test]
    fn test_invalid_value_names_location() {
        let config = config(json!({"registers": {"inputRegister": {"4": "0xZZ"}}}));
        assert_eq!(
            ConfigBuilder::build(&config).unwrap_err(),
            ConfigError::InvalidRegisterValue {
                device: 1,
                kind: RegisterKind::InputRegister,
                address: "4".to_string(),
                value: "\"0xZZ\"".to_string(),
            }
        );
    }

    #[test]
    fn test_invalid_address() {
        let config = config(json!({"registers": {"coils": {"first": true}}}));
        assert!(matches!(
            ConfigBuilder::build(&config).unwrap_err(),
            ConfigError::InvalidRegisterAddress { device: 1, kind: RegisterKind::Coil, .. }
        ));
    }

    #[test]
    fn test_shape_errors() {
        assert_eq!(
            ConfigBuilder::build(&config(json!({"server": {}}))).unwrap_err(),
            ConfigError::MissingRegisters
        );
        assert_eq!(
            ConfigBuilder::build(&config(json!({"version": 2, "registers": {}}))).unwrap_err(),
            ConfigError::MissingRegisters
        );
        assert_eq!(
            ConfigBuilder::build(&config(json!({"version": 3, "devices": {}}))).unwrap_err(),
            ConfigError::UnsupportedVersion(3)
        );
        assert!(matches!(
            ConfigBuilder::build(&config(json!({"version": 2, "devices": {"3-2": {}}}))).unwrap_err(),
            ConfigError::InvalidRange { .. }
        ));
        assert!(matches!(
            ConfigBuilder::build(&config(json!({
                "version": 2,
                "devices": {"1-3": {}, "3": {}}
            })))
            .unwrap_err(),
            ConfigError::OverlappingDevice { id: 3, .. }
        ));
    }
}
