// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-sim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Error types for the register store and its configuration
//!
//! Configuration errors are fatal at startup and name the offending field.
//! Register and lookup errors are request-time outcomes: the protocol adapter
//! turns them into Modbus exception codes or into no response at all.

use thiserror::Error;

use crate::registers::RegisterKind;

/// Errors raised while turning a startup configuration into a registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A device id specification is not a number or a valid `start-end` range.
    #[error("invalid device range '{spec}': {reason}")]
    InvalidRange { spec: String, reason: String },

    /// Two device specifications expand to the same device id.
    #[error("device {id} is declared more than once (in '{spec}')")]
    OverlappingDevice { id: u8, spec: String },

    /// A register literal cannot be stored in its bank.
    #[error("invalid value {value} for device {device}, {kind} address {address}")]
    InvalidRegisterValue {
        device: u8,
        kind: RegisterKind,
        address: String,
        value: String,
    },

    /// A register address key is not an integer in [0, 65535].
    #[error("invalid register address '{address}' for device {device}, {kind}")]
    InvalidRegisterAddress {
        device: u8,
        kind: RegisterKind,
        address: String,
    },

    /// The configuration carries a version tag this build does not understand.
    #[error("unsupported configuration version {0}")]
    UnsupportedVersion(u64),

    /// Neither a `registers` nor a `devices` section is present.
    #[error("configuration must contain either 'registers' or 'devices'")]
    MissingRegisters,
}

/// Errors returned by register writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("register address {0} is outside 0..=65535")]
    OutOfRange(u32),

    #[error("{kind} bank cannot hold a {value} value")]
    TypeMismatch {
        kind: RegisterKind,
        value: &'static str,
    },
}

/// Errors returned by device lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("device {0} is not configured")]
    NotFound(u8),
}
