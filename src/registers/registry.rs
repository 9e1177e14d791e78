// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-sim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Device id to register store mapping

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::str::FromStr;

use log::debug;

use super::store::RegisterStore;
use crate::error::{ConfigError, LookupError};

/// Lowest unicast Modbus device address.
pub const MIN_DEVICE_ID: u8 = 1;
/// Highest unicast Modbus device address.
pub const MAX_DEVICE_ID: u8 = 247;

/// A device id or an inclusive `start-end` range of ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSpec {
    start: u8,
    end: u8,
}

impl DeviceSpec {
    pub fn single(id: u8) -> Self {
        Self { start: id, end: id }
    }

    pub fn ids(&self) -> RangeInclusive<u8> {
        self.start..=self.end
    }

    fn parse_bound(spec: &str, bound: &str) -> Result<u8, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidRange {
            spec: spec.to_string(),
            reason,
        };
        let value: u32 = bound
            .trim()
            .parse()
            .map_err(|_| invalid(format!("'{}' is not a device id", bound.trim())))?;
        match u8::try_from(value) {
            Ok(id) if (MIN_DEVICE_ID..=MAX_DEVICE_ID).contains(&id) => Ok(id),
            _ => Err(invalid(format!(
                "{} is outside {}..={}",
                value, MIN_DEVICE_ID, MAX_DEVICE_ID
            ))),
        }
    }
}

impl FromStr for DeviceSpec {
    type Err = ConfigError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let (start, end) = match spec.split_once('-') {
            Some((start, end)) => (
                Self::parse_bound(spec, start)?,
                Self::parse_bound(spec, end)?,
            ),
            None => {
                let id = Self::parse_bound(spec, spec)?;
                (id, id)
            }
        };
        if start > end {
            return Err(ConfigError::InvalidRange {
                spec: spec.to_string(),
                reason: format!("start {} is greater than end {}", start, end),
            });
        }
        Ok(Self { start, end })
    }
}

/// Ordered set of simulated devices.
///
/// Devices that were not declared are absent; looking them up yields
/// [`LookupError::NotFound`] and the protocol layer stays silent.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<u8, RegisterStore>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the store serving `device_id`.
    pub fn resolve(&self, device_id: u8) -> Result<&RegisterStore, LookupError> {
        self.devices
            .get(&device_id)
            .ok_or(LookupError::NotFound(device_id))
    }

    /// Declare the devices named by `spec`, building one independent store per id.
    ///
    /// Either every id of the range is registered or none is.
    pub fn register_range<F>(&mut self, spec: &str, mut builder_fn: F) -> Result<Vec<u8>, ConfigError>
    where
        F: FnMut(u8) -> Result<RegisterStore, ConfigError>,
    {
        let parsed: DeviceSpec = spec.parse()?;
        if let Some(id) = parsed.ids().find(|id| self.devices.contains_key(id)) {
            return Err(ConfigError::OverlappingDevice {
                id,
                spec: spec.to_string(),
            });
        }

        let mut built = Vec::new();
        for id in parsed.ids() {
            built.push(builder_fn(id)?);
        }
        let ids: Vec<u8> = parsed.ids().collect();
        for store in built {
            debug!("Registered device {}", store.device_id());
            self.devices.insert(store.device_id(), store);
        }
        Ok(ids)
    }

    pub fn contains(&self, device_id: u8) -> bool {
        self.devices.contains_key(&device_id)
    }

    pub fn device_ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.devices.keys().copied()
    }

    pub fn stores(&self) -> impl Iterator<Item = &RegisterStore> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Whether any store has unpersisted writes.
    pub fn any_dirty(&self) -> bool {
        self.stores().any(RegisterStore::is_dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{ReadOutcome, RegisterKind, RegisterValue, StoreOptions};

    fn builder(id: u8) -> Result<RegisterStore, ConfigError> {
        let store = RegisterStore::new(id, StoreOptions::default());
        store
            .write(RegisterKind::HoldingRegister, 1, RegisterValue::Word(42))
            .map_err(|_| ConfigError::MissingRegisters)?;
        store.clear_dirty();
        Ok(store)
    }

    #[test]
    fn test_parse_specs() {
        assert_eq!("7".parse::<DeviceSpec>().unwrap().ids(), 7..=7);
        assert_eq!(" 2-3 ".trim().parse::<DeviceSpec>().unwrap().ids(), 2..=3);
        assert_eq!("10 - 12".parse::<DeviceSpec>().unwrap().ids(), 10..=12);
    }

    #[test]
    fn test_parse_invalid_specs() {
        for spec in ["3-2", "a-3", "2-b", "", "x", "0", "248", "1-300", "-3"] {
            let err = spec.parse::<DeviceSpec>().unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidRange { .. }),
                "{spec} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_range_creates_independent_stores() {
        let mut registry = DeviceRegistry::new();
        let ids = registry.register_range("2-3", builder).unwrap();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(registry.len(), 2);

        registry
            .resolve(2)
            .unwrap()
            .write(RegisterKind::HoldingRegister, 1, RegisterValue::Word(7))
            .unwrap();

        assert_eq!(
            registry.resolve(3).unwrap().read(RegisterKind::HoldingRegister, 1),
            ReadOutcome::Value(RegisterValue::Word(42))
        );
        assert!(registry.resolve(2).unwrap().is_dirty());
        assert!(!registry.resolve(3).unwrap().is_dirty());
    }

    #[test]
    fn test_unknown_device_not_found() {
        let mut registry = DeviceRegistry::new();
        registry.register_range("1", builder).unwrap();
        assert_eq!(registry.resolve(7).unwrap_err(), LookupError::NotFound(7));
        assert!(registry.contains(1));
    }

    #[test]
    fn test_overlap_rejected_atomically() {
        let mut registry = DeviceRegistry::new();
        registry.register_range("3", builder).unwrap();
        let err = registry.register_range("1-4", builder).unwrap_err();
        assert_eq!(
            err,
            ConfigError::OverlappingDevice {
                id: 3,
                spec: "1-4".to_string()
            }
        );
        assert_eq!(registry.device_ids().collect::<Vec<_>>(), vec![3]);
    }
}
