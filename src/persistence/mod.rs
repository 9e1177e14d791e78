// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-sim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Durable register snapshots
//!
//! [`snapshot`] defines the on-disk JSON format and the atomic file storage,
//! [`engine`] drives loading at startup, periodic flushing and the final
//! flush on shutdown.

pub mod engine;
pub mod snapshot;

pub use engine::{EngineState, FlushOutcome, LoadOutcome, PersistenceEngine, DEFAULT_SAVE_INTERVAL};
pub use snapshot::{DeviceSnapshot, JsonSnapshotStorage, Snapshot, SnapshotStorage};
