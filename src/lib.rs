// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-sim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus slave simulator library
//!
//! This library provides the simulated register banks of one or more Modbus
//! devices, their crash-safe persistence and a Modbus TCP service on top.

pub mod config;
pub mod daemon;
pub mod error;
pub mod modbus;
pub mod persistence;
pub mod registers;
