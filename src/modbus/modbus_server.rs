// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-sim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus service backed by the device registry
//!
//! For avoiding confusion with the Modbus master/slave terminology, this module uses
//! the terms "server" and "client" instead. The server is the device that provides data,
//! while the client is the device that requests data.
//!
//! Every request carries the unit id it is addressed to. Unit ids that are not
//! configured get no response at all, as a missing device on a shared bus would.
//!
//! | Function | Code | Bank | Max quantity |
//! |----------|------|------|--------------|
//! | Read Coils | 1 | coils | 2000 |
//! | Read Discrete Inputs | 2 | discrete inputs | 2000 |
//! | Read Holding Registers | 3 | holding registers | 125 |
//! | Read Input Registers | 4 | input registers | 125 |
//! | Write Single Coil | 5 | coils | 1 |
//! | Write Single Register | 6 | holding registers | 1 |
//! | Write Multiple Coils | 15 | coils | 1968 |
//! | Write Multiple Registers | 16 | holding registers | 123 |
//! | Read/Write Multiple Registers | 23 | holding registers | 125 / 121 |

use std::{future, sync::Arc};

use log::{debug, error};
use tokio_modbus::server::Service;
use tokio_modbus::{ExceptionCode, Request, Response, SlaveRequest};

use crate::error::RegisterError;
use crate::registers::{DeviceRegistry, ReadOutcome, RegisterKind, RegisterStore, RegisterValue};

pub const MAX_READ_BITS: u16 = 2000;
pub const MAX_READ_WORDS: u16 = 125;
pub const MAX_WRITE_BITS: u16 = 1968;
pub const MAX_WRITE_WORDS: u16 = 123;
pub const MAX_READ_WRITE_WORDS: u16 = 121;

/// Serves Modbus requests from a shared [`DeviceRegistry`].
#[derive(Debug, Clone)]
pub struct RegisterService {
    registry: Arc<DeviceRegistry>,
}

impl Service for RegisterService {
    type Request = SlaveRequest<'static>;
    type Response = Option<Response>;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let SlaveRequest { slave, request } = req;
        debug!("Received Modbus request for unit {}: {:?}", slave, request);

        let store = match self.registry.resolve(slave) {
            Ok(store) => store,
            Err(e) => {
                debug!("{}, not answering", e);
                return future::ready(Ok(None));
            }
        };

        let res = handle_request(store, request).map(Some);
        if let Err(e) = &res {
            error!("Modbus request error for unit {}: {:?}", slave, e);
        }
        future::ready(res)
    }
}

impl RegisterService {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }
}

fn handle_request(store: &RegisterStore, request: Request<'static>) -> Result<Response, ExceptionCode> {
    match request {
        Request::ReadCoils(addr, cnt) => {
            read_bits(store, RegisterKind::Coil, addr, cnt).map(Response::ReadCoils)
        }
        Request::ReadDiscreteInputs(addr, cnt) => {
            read_bits(store, RegisterKind::DiscreteInput, addr, cnt)
                .map(Response::ReadDiscreteInputs)
        }
        Request::ReadHoldingRegisters(addr, cnt) => {
            read_words(store, RegisterKind::HoldingRegister, addr, cnt)
                .map(Response::ReadHoldingRegisters)
        }
        Request::ReadInputRegisters(addr, cnt) => {
            read_words(store, RegisterKind::InputRegister, addr, cnt)
                .map(Response::ReadInputRegisters)
        }
        Request::WriteSingleCoil(addr, coil) => {
            debug!("Writing {} to coil {}", coil, addr);
            write_values(store, RegisterKind::Coil, addr, &[RegisterValue::Bit(coil)], 1)
                .map(|_| Response::WriteSingleCoil(addr, coil))
        }
        Request::WriteSingleRegister(addr, word) => {
            debug!("Writing value {} to holding register {}", word, addr);
            write_values(
                store,
                RegisterKind::HoldingRegister,
                addr,
                &[RegisterValue::Word(word)],
                1,
            )
            .map(|_| Response::WriteSingleRegister(addr, word))
        }
        Request::WriteMultipleCoils(addr, coils) => {
            let values: Vec<RegisterValue> = coils.iter().copied().map(RegisterValue::Bit).collect();
            write_values(store, RegisterKind::Coil, addr, &values, MAX_WRITE_BITS)
                .map(|cnt| Response::WriteMultipleCoils(addr, cnt))
        }
        Request::WriteMultipleRegisters(addr, words) => {
            let values: Vec<RegisterValue> = words.iter().copied().map(RegisterValue::Word).collect();
            write_values(store, RegisterKind::HoldingRegister, addr, &values, MAX_WRITE_WORDS)
                .map(|cnt| Response::WriteMultipleRegisters(addr, cnt))
        }
        Request::ReadWriteMultipleRegisters(read_addr, read_cnt, write_addr, words) => {
            read_write_words(store, read_addr, read_cnt, write_addr, &words)
                .map(Response::ReadWriteMultipleRegisters)
        }
        _ => {
            error!("Exception::IllegalFunction - Unimplemented function code in request: {request:?}");
            Err(ExceptionCode::IllegalFunction)
        }
    }
}

fn check_quantity(cnt: usize, max: u16) -> Result<u16, ExceptionCode> {
    match u16::try_from(cnt) {
        Ok(cnt) if (1..=max).contains(&cnt) => Ok(cnt),
        _ => {
            debug!("Quantity {} outside 1..={}", cnt, max);
            Err(ExceptionCode::IllegalDataValue)
        }
    }
}

fn register_exception(err: RegisterError) -> ExceptionCode {
    match err {
        RegisterError::OutOfRange(_) => ExceptionCode::IllegalDataAddress,
        RegisterError::TypeMismatch { .. } => ExceptionCode::ServerDeviceFailure,
    }
}

fn read_values(
    store: &RegisterStore,
    kind: RegisterKind,
    addr: u16,
    cnt: u16,
) -> Result<Vec<RegisterValue>, ExceptionCode> {
    let start = store.store_address(addr);
    let bank = store.get_bank(kind);
    (0..u32::from(cnt))
        .map(|offset| match bank.read(start + offset) {
            ReadOutcome::Value(value) => Ok(value),
            ReadOutcome::Miss => {
                debug!("No {} at address {}", kind, start + offset);
                Err(ExceptionCode::IllegalDataAddress)
            }
        })
        .collect()
}

fn read_bits(
    store: &RegisterStore,
    kind: RegisterKind,
    addr: u16,
    cnt: u16,
) -> Result<Vec<bool>, ExceptionCode> {
    debug!("Reading {} {}(s) starting from address {}", cnt, kind, addr);
    let cnt = check_quantity(usize::from(cnt), MAX_READ_BITS)?;
    let values = read_values(store, kind, addr, cnt)?;
    Ok(values.into_iter().filter_map(RegisterValue::as_bit).collect())
}

fn read_words(
    store: &RegisterStore,
    kind: RegisterKind,
    addr: u16,
    cnt: u16,
) -> Result<Vec<u16>, ExceptionCode> {
    debug!("Reading {} {}(s) starting from address {}", cnt, kind, addr);
    let cnt = check_quantity(usize::from(cnt), MAX_READ_WORDS)?;
    let values = read_values(store, kind, addr, cnt)?;
    Ok(values.into_iter().filter_map(RegisterValue::as_word).collect())
}

/// Write consecutive values; every address is checked before any is written.
fn write_values(
    store: &RegisterStore,
    kind: RegisterKind,
    addr: u16,
    values: &[RegisterValue],
    max: u16,
) -> Result<u16, ExceptionCode> {
    let cnt = check_quantity(values.len(), max)?;
    let start = store.store_address(addr);
    let mut bank = store.get_bank(kind);
    for (address, value) in (start..).zip(values) {
        bank.check(address, *value).map_err(register_exception)?;
    }
    for (address, value) in (start..).zip(values) {
        bank.write(address, *value).map_err(register_exception)?;
    }
    Ok(cnt)
}

/// Function 23: the write is applied before the read, under one lock.
fn read_write_words(
    store: &RegisterStore,
    read_addr: u16,
    read_cnt: u16,
    write_addr: u16,
    words: &[u16],
) -> Result<Vec<u16>, ExceptionCode> {
    let read_cnt = check_quantity(usize::from(read_cnt), MAX_READ_WORDS)?;
    check_quantity(words.len(), MAX_READ_WRITE_WORDS)?;

    let kind = RegisterKind::HoldingRegister;
    let read_start = store.store_address(read_addr);
    let write_start = store.store_address(write_addr);
    let mut bank = store.get_bank(kind);

    for offset in 0..u32::from(read_cnt) {
        let address = read_start + offset;
        // Addresses about to be written count as present.
        let written = address >= write_start && address - write_start < words.len() as u32;
        if !written && bank.read(address).is_miss() {
            return Err(ExceptionCode::IllegalDataAddress);
        }
    }
    for (address, word) in (write_start..).zip(words) {
        bank.check(address, RegisterValue::Word(*word))
            .map_err(register_exception)?;
    }
    for (address, word) in (write_start..).zip(words) {
        bank.write(address, RegisterValue::Word(*word))
            .map_err(register_exception)?;
    }

    (0..u32::from(read_cnt))
        .map(|offset| match bank.read(read_start + offset) {
            ReadOutcome::Value(RegisterValue::Word(word)) => Ok(word),
            _ => Err(ExceptionCode::IllegalDataAddress),
        })
        .collect()
}
