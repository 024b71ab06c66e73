//! In-process memory emulator implementing the [`Transport`] contract.
//!
//! Useful for simulations and tests: a sparse, page-backed address space
//! shared by any number of per-block [`EmulatedTransport`] handles.
//! Transactions are queued on request and executed when waited on, which
//! mirrors the asynchronous request/wait split of a real memory master.

use core::time::Duration;
use std::collections::HashMap;
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use crate::block::{
    TransactionKind,
    transport::{Transaction, Transport},
};

const PAGE_SIZE: u64 = 4096;

#[derive(Debug, Default)]
struct EmulatorState {
    pages: HashMap<u64, Box<[u8]>>,
    requests: Option<Vec<Transaction>>,
    next_error: Option<String>,
    unresponsive: bool,
    stuck: HashMap<u64, (u8, u8)>,
}

impl EmulatorState {
    fn byte(&self, addr: u64) -> u8 {
        self.pages
            .get(&(addr / PAGE_SIZE))
            .map_or(0, |page| page[(addr % PAGE_SIZE) as usize])
    }

    fn store(&mut self, addr: u64, value: u8) {
        let value = match self.stuck.get(&addr) {
            Some((mask, forced)) => (value & !mask) | (forced & mask),
            None => value,
        };
        let page = self
            .pages
            .entry(addr / PAGE_SIZE)
            .or_insert_with(|| vec![0u8; PAGE_SIZE as usize].into_boxed_slice());
        page[(addr % PAGE_SIZE) as usize] = value;
    }
}

/// Shared emulated address space. Cloning yields another handle to the same memory.
#[derive(Debug, Clone)]
pub struct MemoryEmulator {
    state: Arc<Mutex<EmulatorState>>,
    min_access: usize,
    max_access: usize,
    base: u64,
}

impl MemoryEmulator {
    pub fn new(min_access: usize, max_access: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(EmulatorState::default())),
            min_access,
            max_access,
            base: 0,
        }
    }

    /// Sets the base address reported to blocks for diagnostics.
    pub fn with_base(mut self, base: u64) -> Self {
        self.base = base;
        self
    }

    /// Creates a transport handle for a single block.
    pub fn transport(&self) -> EmulatedTransport {
        EmulatedTransport {
            emulator: self.clone(),
            pending: None,
            error: None,
        }
    }

    /// Starts recording every requested transaction, see [`MemoryEmulator::requests`].
    ///
    /// Off by default, since the log grows with every transaction.
    pub fn with_request_log(self) -> Self {
        self.state.lock().requests.get_or_insert_with(Vec::new);
        self
    }

    /// Reads memory directly, bypassing the transaction path.
    pub fn read(&self, addr: u64, len: usize) -> Vec<u8> {
        let state = self.state.lock();
        (addr..addr + len as u64).map(|a| state.byte(a)).collect()
    }

    /// Writes memory directly, bypassing the transaction path.
    pub fn write(&self, addr: u64, data: &[u8]) {
        let mut state = self.state.lock();
        for (a, b) in (addr..).zip(data) {
            state.store(a, *b);
        }
    }

    /// Every transaction requested since recording started, as issued.
    pub fn requests(&self) -> Vec<Transaction> {
        self.state.lock().requests.clone().unwrap_or_default()
    }

    pub fn clear_requests(&self) {
        if let Some(log) = self.state.lock().requests.as_mut() {
            log.clear();
        }
    }

    /// Fails the next executed transaction with `msg`.
    pub fn inject_error(&self, msg: impl Into<String>) {
        self.state.lock().next_error = Some(msg.into());
    }

    /// While set, transactions never complete and waits report a timeout.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.state.lock().unresponsive = unresponsive;
    }

    /// Forces the bits in `mask` at `addr` to `value`, ignoring writes to them.
    pub fn stick_bits(&self, addr: u64, mask: u8, value: u8) {
        let mut state = self.state.lock();
        state.stuck.insert(addr, (mask, value));
        let current = state.byte(addr);
        state.store(addr, current);
    }

    fn execute(&self, mut txn: Transaction) -> Result<Transaction, String> {
        let mut state = self.state.lock();

        if let Some(msg) = state.next_error.take() {
            return Err(msg);
        }
        if self.min_access == 0 || self.max_access == 0 {
            return Err(format!(
                "Invalid min/max size {}/{}",
                self.min_access, self.max_access
            ));
        }
        if txn.size() > self.max_access {
            return Err(format!("Size error. Size={}", txn.size()));
        }
        if txn.offset % self.min_access as u64 != 0 || txn.size() % self.min_access != 0 {
            return Err(format!(
                "Alignment error. Offset={:#x}, Size={}",
                txn.offset,
                txn.size()
            ));
        }

        match txn.kind {
            TransactionKind::Write | TransactionKind::Post => {
                for (a, b) in (txn.offset..).zip(txn.data.iter()) {
                    state.store(a, *b);
                }
            }
            TransactionKind::Read | TransactionKind::Verify => {
                for (a, b) in (txn.offset..).zip(txn.data.iter_mut()) {
                    *b = state.byte(a);
                }
            }
        }

        trace!(
            "emulated {:?} at {:#x}, size {}",
            txn.kind,
            txn.offset,
            txn.size()
        );
        Ok(txn)
    }
}

/// Per-block handle onto a [`MemoryEmulator`].
#[derive(Debug)]
pub struct EmulatedTransport {
    emulator: MemoryEmulator,
    pending: Option<Transaction>,
    error: Option<String>,
}

impl Transport for EmulatedTransport {
    fn request_transaction(&mut self, transaction: Transaction) {
        if let Some(log) = self.emulator.state.lock().requests.as_mut() {
            log.push(transaction.clone());
        }
        self.pending = Some(transaction);
    }

    fn wait_transaction(&mut self, timeout: Option<Duration>) -> Option<Transaction> {
        let txn = self.pending.take()?;

        if self.emulator.state.lock().unresponsive {
            self.error = Some(match timeout {
                Some(t) => format!("Timeout after {t:?}"),
                None => "Timeout".to_owned(),
            });
            return None;
        }

        match self.emulator.execute(txn) {
            Ok(done) => Some(done),
            Err(msg) => {
                self.error = Some(msg);
                None
            }
        }
    }

    fn error(&self) -> Option<String> {
        self.error.clone()
    }

    fn clear_error(&mut self) {
        self.error = None;
    }

    fn min_access_size(&self) -> usize {
        self.emulator.min_access
    }

    fn max_access_size(&self) -> usize {
        self.emulator.max_access
    }

    fn address(&self) -> u64 {
        self.emulator.base
    }
}
