// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-sim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! A single addressable register table
//!
//! A bank holds one of the four Modbus data kinds for one device. Storage is
//! sparse: only materialized addresses occupy memory, while the address space
//! is always 0..=65535.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RegisterError;

/// Highest addressable register.
pub const MAX_ADDRESS: u32 = u16::MAX as u32;

/// The four Modbus register kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RegisterKind {
    DiscreteInput,
    Coil,
    HoldingRegister,
    InputRegister,
}

impl RegisterKind {
    /// All kinds, in snapshot order.
    pub const ALL: [RegisterKind; 4] = [
        RegisterKind::DiscreteInput,
        RegisterKind::Coil,
        RegisterKind::HoldingRegister,
        RegisterKind::InputRegister,
    ];

    /// Whether this kind stores single bits rather than 16-bit words.
    pub fn is_bit(self) -> bool {
        matches!(self, RegisterKind::DiscreteInput | RegisterKind::Coil)
    }

    /// The value an undefined address reads as when defaults are synthesized.
    pub fn default_value(self) -> RegisterValue {
        if self.is_bit() {
            RegisterValue::Bit(false)
        } else {
            RegisterValue::Word(0)
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            RegisterKind::DiscreteInput => 0,
            RegisterKind::Coil => 1,
            RegisterKind::HoldingRegister => 2,
            RegisterKind::InputRegister => 3,
        }
    }
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegisterKind::DiscreteInput => "discrete input",
            RegisterKind::Coil => "coil",
            RegisterKind::HoldingRegister => "holding register",
            RegisterKind::InputRegister => "input register",
        };
        f.write_str(name)
    }
}

/// A register value, already resolved to the representation of its bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterValue {
    Bit(bool),
    Word(u16),
}

impl RegisterValue {
    /// True for `false` and `0`, the values a snapshot omits.
    pub fn is_default(self) -> bool {
        matches!(self, RegisterValue::Bit(false) | RegisterValue::Word(0))
    }

    pub fn as_bit(self) -> Option<bool> {
        match self {
            RegisterValue::Bit(bit) => Some(bit),
            RegisterValue::Word(_) => None,
        }
    }

    pub fn as_word(self) -> Option<u16> {
        match self {
            RegisterValue::Word(word) => Some(word),
            RegisterValue::Bit(_) => None,
        }
    }

    fn type_name(self) -> &'static str {
        match self {
            RegisterValue::Bit(_) => "bit",
            RegisterValue::Word(_) => "word",
        }
    }

    fn fits(self, kind: RegisterKind) -> bool {
        matches!(self, RegisterValue::Bit(_)) == kind.is_bit()
    }
}

/// Result of reading one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Value(RegisterValue),
    /// The address is not materialized and the bank does not synthesize defaults.
    Miss,
}

impl ReadOutcome {
    pub fn value(self) -> Option<RegisterValue> {
        match self {
            ReadOutcome::Value(value) => Some(value),
            ReadOutcome::Miss => None,
        }
    }

    pub fn is_miss(self) -> bool {
        matches!(self, ReadOutcome::Miss)
    }
}

/// Sparse table of registers of one kind.
#[derive(Debug, Clone)]
pub struct RegisterBank {
    kind: RegisterKind,
    values: BTreeMap<u16, RegisterValue>,
    fill_undefined: bool,
    revision: u64,
}

impl RegisterBank {
    /// Create an empty bank.
    ///
    /// With `fill_undefined`, reads of absent addresses return the kind's
    /// default instead of [`ReadOutcome::Miss`].
    pub fn new(kind: RegisterKind, fill_undefined: bool) -> Self {
        Self {
            kind,
            values: BTreeMap::new(),
            fill_undefined,
            revision: 0,
        }
    }

    pub fn kind(&self) -> RegisterKind {
        self.kind
    }

    pub fn fills_undefined(&self) -> bool {
        self.fill_undefined
    }

    /// Number of materialized addresses.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Read one address.
    pub fn read(&self, address: u32) -> ReadOutcome {
        let Ok(address) = u16::try_from(address) else {
            return ReadOutcome::Miss;
        };
        match self.values.get(&address) {
            Some(value) => ReadOutcome::Value(*value),
            None if self.fill_undefined => ReadOutcome::Value(self.kind.default_value()),
            None => ReadOutcome::Miss,
        }
    }

    /// Store a value and bump the bank revision.
    pub fn write(&mut self, address: u32, value: RegisterValue) -> Result<(), RegisterError> {
        let address = self.check(address, value)?;
        self.values.insert(address, value);
        self.revision += 1;
        Ok(())
    }

    /// Validate a write without applying it.
    pub fn check(&self, address: u32, value: RegisterValue) -> Result<u16, RegisterError> {
        let address = u16::try_from(address).map_err(|_| RegisterError::OutOfRange(address))?;
        if !value.fits(self.kind) {
            return Err(RegisterError::TypeMismatch {
                kind: self.kind,
                value: value.type_name(),
            });
        }
        Ok(address)
    }

    /// Whether the address holds an explicitly stored value.
    pub fn contains(&self, address: u32) -> bool {
        u16::try_from(address).is_ok_and(|address| self.values.contains_key(&address))
    }

    /// Every materialized address whose value is not the default, ascending.
    pub fn non_default_entries(&self) -> impl Iterator<Item = (u16, RegisterValue)> + '_ {
        self.values
            .iter()
            .filter(|(_, value)| !value.is_default())
            .map(|(address, value)| (*address, *value))
    }

    /// Replace the bank contents with `values`.
    ///
    /// Previously materialized addresses stay addressable but fall back to the
    /// default value; addresses in `values` are materialized. The revision is
    /// left untouched: the caller decides whether the new contents are clean.
    pub fn replace_values(
        &mut self,
        values: impl IntoIterator<Item = (u16, RegisterValue)>,
    ) -> Result<(), RegisterError> {
        let mut next: BTreeMap<u16, RegisterValue> = self
            .values
            .keys()
            .map(|address| (*address, self.kind.default_value()))
            .collect();
        for (address, value) in values {
            let address = self.check(u32::from(address), value)?;
            next.insert(address, value);
        }
        self.values = next;
        Ok(())
    }

    pub(crate) fn revision(&self) -> u64 {
        self.revision
    }
}
