// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-sim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register sections of the configuration
//!
//! Values are kept as raw JSON here; [`super::ConfigBuilder`] resolves them
//! into typed register values once, at startup.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registers::{RegisterKind, StoreOptions};

/// Address key to literal value, as written in the configuration file.
pub type RawRegisters = BTreeMap<String, Value>;

/// Initial contents and behaviour of one device's registers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistersConfig {
    /// Protocol address N maps to register N instead of N + 1.
    #[serde(default)]
    pub zero_mode: bool,

    /// Reads of unconfigured addresses return 0 / false instead of an exception.
    #[serde(default)]
    pub initialize_undefined_registers: bool,

    #[serde(default)]
    pub discrete_input: RawRegisters,

    #[serde(default)]
    pub coils: RawRegisters,

    #[serde(default)]
    pub holding_register: RawRegisters,

    #[serde(default)]
    pub input_register: RawRegisters,
}

impl RegistersConfig {
    pub fn options(&self) -> StoreOptions {
        StoreOptions {
            initialize_undefined: self.initialize_undefined_registers,
            zero_mode: self.zero_mode,
        }
    }

    /// Configured literals of one bank.
    pub fn entries(&self, kind: RegisterKind) -> &RawRegisters {
        match kind {
            RegisterKind::DiscreteInput => &self.discrete_input,
            RegisterKind::Coil => &self.coils,
            RegisterKind::HoldingRegister => &self.holding_register,
            RegisterKind::InputRegister => &self.input_register,
        }
    }
}

/// One entry of the `devices` map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub registers: RegistersConfig,
}
