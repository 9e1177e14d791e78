// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-sim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! In-memory register model
//!
//! This module holds the data the simulator serves to Modbus masters.
//!
//! ## Key Components
//!
//! - `RegisterBank`: sparse table of one kind (bit or 16-bit word)
//! - `RegisterStore`: the four banks of one device, with dirty tracking
//! - `DeviceRegistry`: device id to store mapping, with `start-end` ranges
//!
//! ## Usage
//!
//! ```
//! use modbus_sim::registers::{
//!     DeviceRegistry, ReadOutcome, RegisterKind, RegisterStore, RegisterValue, StoreOptions,
//! };
//!
//! let mut registry = DeviceRegistry::new();
//! registry
//!     .register_range("1", |id| Ok(RegisterStore::new(id, StoreOptions::default())))
//!     .unwrap();
//!
//! let store = registry.resolve(1).unwrap();
//! store.write(RegisterKind::Coil, 5, RegisterValue::Bit(true)).unwrap();
//! assert_eq!(
//!     store.read(RegisterKind::Coil, 5),
//!     ReadOutcome::Value(RegisterValue::Bit(true))
//! );
//! ```

pub mod bank;
pub mod registry;
pub mod store;

pub use bank::{ReadOutcome, RegisterBank, RegisterKind, RegisterValue, MAX_ADDRESS};
pub use registry::{DeviceRegistry, DeviceSpec, MAX_DEVICE_ID, MIN_DEVICE_ID};
pub use store::{BankGuard, RegisterStore, StoreCapture, StoreOptions};
