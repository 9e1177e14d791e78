// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-sim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! The four register banks of one simulated device
//!
//! All banks of a store live behind a single `Mutex`. A lock is held for one
//! read, one write request or one snapshot copy, never across file I/O.
//! Dirty tracking uses per-bank revisions: a flush records the revisions it
//! copied and only marks those clean, so a write racing with a flush keeps
//! the store dirty for the next tick.

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::bank::{ReadOutcome, RegisterBank, RegisterKind, RegisterValue};
use crate::error::RegisterError;

/// Per-device behaviour flags taken from the `registers` configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Reads of absent addresses return the kind default instead of a miss.
    pub initialize_undefined: bool,
    /// Protocol address N maps to store address N (otherwise N + 1).
    pub zero_mode: bool,
}

struct StoreInner {
    banks: [RegisterBank; 4],
    clean: [u64; 4],
}

/// Point-in-time copy of a store's non-default values, taken under the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCapture {
    pub entries: [Vec<(u16, RegisterValue)>; 4],
    revisions: [u64; 4],
}

impl StoreCapture {
    pub fn bank(&self, kind: RegisterKind) -> &[(u16, RegisterValue)] {
        &self.entries[kind.index()]
    }
}

/// Register banks of one device.
pub struct RegisterStore {
    device_id: u8,
    options: StoreOptions,
    inner: Mutex<StoreInner>,
}

impl RegisterStore {
    /// Create a store with four empty banks.
    pub fn new(device_id: u8, options: StoreOptions) -> Self {
        let banks = RegisterKind::ALL.map(|kind| RegisterBank::new(kind, options.initialize_undefined));
        Self::from_banks(device_id, options, banks)
    }

    /// Create a store from pre-filled banks, ordered as [`RegisterKind::ALL`].
    ///
    /// Initial contents are considered persisted: the store starts clean.
    pub fn from_banks(device_id: u8, options: StoreOptions, banks: [RegisterBank; 4]) -> Self {
        let clean = [0, 1, 2, 3].map(|i| banks[i].revision());
        Self {
            device_id,
            options,
            inner: Mutex::new(StoreInner { banks, clean }),
        }
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    /// Translate a protocol address into a store address.
    pub fn store_address(&self, protocol_address: u16) -> u32 {
        let address = u32::from(protocol_address);
        if self.options.zero_mode {
            address
        } else {
            address + 1
        }
    }

    /// Lock the store and return a handle on one bank.
    pub fn get_bank(&self, kind: RegisterKind) -> BankGuard<'_> {
        BankGuard {
            inner: self.lock(),
            kind,
        }
    }

    pub fn read(&self, kind: RegisterKind, address: u32) -> ReadOutcome {
        self.get_bank(kind).read(address)
    }

    pub fn write(
        &self,
        kind: RegisterKind,
        address: u32,
        value: RegisterValue,
    ) -> Result<(), RegisterError> {
        self.get_bank(kind).write(address, value)
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty_kinds().is_empty()
    }

    /// Banks written since the last successful flush.
    pub fn dirty_kinds(&self) -> Vec<RegisterKind> {
        let inner = self.lock();
        RegisterKind::ALL
            .into_iter()
            .filter(|kind| inner.banks[kind.index()].revision() != inner.clean[kind.index()])
            .collect()
    }

    /// Mark every bank clean, regardless of what was persisted.
    pub fn clear_dirty(&self) {
        let mut inner = self.lock();
        let revisions = [0, 1, 2, 3].map(|i| inner.banks[i].revision());
        inner.clean = revisions;
    }

    /// Copy out the non-default contents of all banks.
    pub fn capture(&self) -> StoreCapture {
        let inner = self.lock();
        StoreCapture {
            entries: [0, 1, 2, 3].map(|i| inner.banks[i].non_default_entries().collect()),
            revisions: [0, 1, 2, 3].map(|i| inner.banks[i].revision()),
        }
    }

    /// Mark the revisions contained in `capture` as persisted.
    ///
    /// Banks written after the capture was taken stay dirty.
    pub fn mark_persisted(&self, capture: &StoreCapture) {
        let mut inner = self.lock();
        for i in 0..4 {
            if inner.clean[i] < capture.revisions[i] {
                inner.clean[i] = capture.revisions[i];
            }
        }
    }

    /// Replace the contents of every bank and mark the store clean.
    ///
    /// Banks missing from `banks` are reset to defaults. Nothing is applied if
    /// any value does not fit its bank.
    pub fn restore(
        &self,
        banks: &[(RegisterKind, Vec<(u16, RegisterValue)>)],
    ) -> Result<(), RegisterError> {
        let mut inner = self.lock();
        let mut next = inner.banks.clone();
        for kind in RegisterKind::ALL {
            let values = banks
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, values)| values.clone())
                .unwrap_or_default();
            next[kind.index()].replace_values(values)?;
        }
        inner.clean = [0, 1, 2, 3].map(|i| next[i].revision());
        inner.banks = next;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // Concurrent writers follow last-write-wins; a panicked holder leaves
        // the banks in a usable state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RegisterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterStore")
            .field("device_id", &self.device_id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Locked access to one bank of a store.
///
/// The store stays locked until the guard is dropped, so a multi-register
/// request can validate and apply all its addresses atomically.
pub struct BankGuard<'a> {
    inner: MutexGuard<'a, StoreInner>,
    kind: RegisterKind,
}

impl BankGuard<'_> {
    pub fn kind(&self) -> RegisterKind {
        self.kind
    }

    pub fn read(&self, address: u32) -> ReadOutcome {
        self.bank().read(address)
    }

    pub fn write(&mut self, address: u32, value: RegisterValue) -> Result<(), RegisterError> {
        let kind = self.kind;
        self.inner.banks[kind.index()].write(address, value)
    }

    pub fn check(&self, address: u32, value: RegisterValue) -> Result<(), RegisterError> {
        self.bank().check(address, value).map(|_| ())
    }

    pub fn contains(&self, address: u32) -> bool {
        self.bank().contains(address)
    }

    fn bank(&self) -> &RegisterBank {
        &self.inner.banks[self.kind.index()]
    }
}
