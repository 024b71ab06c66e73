//! Raw memory window without variables.
//!
//! A [`MemoryBlock`] moves a caller-supplied byte image to and from the
//! transport. Every byte is verified after a write and the block always
//! takes part in bulk sweeps.

use core::{fmt, time::Duration};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::block::{
    AccessMode, Block, BlockError, Device, ErrorKind, TransactionKind, TransactionState,
    bits::hex_dump,
    remote::DEFAULT_TIMEOUT,
    transport::{Transaction, Transport},
};

struct MemoryState<T> {
    transport: T,
    data: Vec<u8>,
    verify: Vec<u8>,
    stale: bool,
    pending: Option<TransactionKind>,
    verify_pending_write: bool,
    do_verify: bool,
    timeout: Option<Duration>,
}

/// Block over a raw memory region whose contents are set as a whole.
pub struct MemoryBlock<T: Transport> {
    path: String,
    mode: AccessMode,
    offset: u64,
    address: u64,
    min_access: usize,
    max_access: usize,
    device: Arc<Device>,
    state: Mutex<MemoryState<T>>,
}

impl<T: Transport> fmt::Debug for MemoryBlock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBlock")
            .field("path", &self.path)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> MemoryBlock<T> {
    /// Creates an empty memory block at `offset`.
    ///
    /// Nothing is transferred until [`set`](Self::set) or
    /// [`resize`](Self::resize) gives the block a size.
    pub fn new(
        path: impl Into<String>,
        mode: AccessMode,
        device: Arc<Device>,
        transport: T,
        offset: u64,
    ) -> Result<Self, BlockError> {
        let path = path.into();
        let min_access = transport.min_access_size();
        let max_access = transport.max_access_size();
        let address = offset | transport.address();

        if min_access == 0 || max_access == 0 {
            return Err(BlockError::new(
                ErrorKind::Configuration,
                path,
                address,
                format!("Invalid min/max size {min_access}/{max_access}"),
            ));
        }

        Ok(Self {
            path,
            mode,
            offset,
            address,
            min_access,
            max_access,
            device,
            state: Mutex::new(MemoryState {
                transport,
                data: Vec::new(),
                verify: Vec::new(),
                stale: false,
                pending: None,
                verify_pending_write: false,
                do_verify: false,
                timeout: Some(DEFAULT_TIMEOUT),
            }),
        })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn size(&self) -> usize {
        self.state.lock().data.len()
    }

    /// Returns true if data was set but not yet written.
    pub fn stale(&self) -> bool {
        self.state.lock().stale
    }

    pub fn state(&self) -> TransactionState {
        match self.state.lock().pending {
            Some(kind) => TransactionState::Pending(kind),
            None => TransactionState::Idle,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.state.lock().timeout
    }

    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.state.lock().timeout = timeout;
    }

    /// Replaces the whole image with `data`, to be pushed by the next write.
    pub fn set(&self, data: &[u8]) -> Result<(), BlockError> {
        self.check_size(data.len())?;
        let mut state = self.state.lock();
        self.wait_locked(&mut state);
        state.data = data.to_vec();
        state.verify = vec![0; data.len()];
        state.stale = true;
        Ok(())
    }

    /// Packs `values` into `stride` little-endian bytes each and sets them.
    pub fn set_elements(&self, values: &[u64], stride: usize) -> Result<(), BlockError> {
        if stride == 0 || stride > 8 {
            return Err(self.error(
                ErrorKind::Configuration,
                format!("Invalid element stride {stride}"),
            ));
        }
        let data: Vec<u8> = values
            .iter()
            .flat_map(|v| v.to_le_bytes().into_iter().take(stride))
            .collect();
        self.set(&data)
    }

    /// Sets the window size for reads, zeroing the local image.
    pub fn resize(&self, len: usize) -> Result<(), BlockError> {
        self.check_size(len)?;
        let mut state = self.state.lock();
        self.wait_locked(&mut state);
        state.data = vec![0; len];
        state.verify = vec![0; len];
        state.stale = false;
        Ok(())
    }

    /// Current local image: the last set data or the last read result.
    pub fn get(&self) -> Vec<u8> {
        self.state.lock().data.clone()
    }

    fn check_size(&self, len: usize) -> Result<(), BlockError> {
        if len > self.max_access {
            return Err(self.error(
                ErrorKind::Configuration,
                format!("Tried to set a transaction that is too big. Size={len}"),
            ));
        }
        if len % self.min_access != 0 {
            return Err(self.error(
                ErrorKind::Configuration,
                format!("Size {len} is not a multiple of {}", self.min_access),
            ));
        }
        Ok(())
    }

    fn wait_locked(&self, state: &mut MemoryState<T>) {
        let Some(kind) = state.pending.take() else {
            return;
        };

        let done = state.transport.wait_transaction(state.timeout);
        if state.transport.error().is_some() {
            return;
        }

        if let Some(done) = done {
            let target = match kind {
                TransactionKind::Read => &mut state.data,
                TransactionKind::Verify => &mut state.verify,
                TransactionKind::Write | TransactionKind::Post => return,
            };
            let len = done.data.len().min(target.len());
            target[..len].copy_from_slice(&done.data[..len]);
        }
    }

    fn error(&self, kind: ErrorKind, msg: String) -> BlockError {
        BlockError::new(kind, &self.path, self.address, msg)
    }
}

impl<T: Transport> Block for MemoryBlock<T> {
    fn path(&self) -> &str {
        &self.path
    }

    fn mode(&self) -> AccessMode {
        self.mode
    }

    fn bulk_enabled(&self) -> bool {
        true
    }

    fn start_transaction(&self, kind: TransactionKind) -> Result<(), BlockError> {
        if !self.device.enabled() || !kind.allowed_for(self.mode) {
            return Ok(());
        }

        let mut state = self.state.lock();
        if kind == TransactionKind::Verify && !state.verify_pending_write {
            return Ok(());
        }

        self.wait_locked(&mut state);
        state.transport.clear_error();
        if state.data.is_empty() {
            return Ok(());
        }

        let data = if kind.is_write() {
            state.stale = false;
            state.data.clone()
        } else {
            vec![0; state.data.len()]
        };
        if kind == TransactionKind::Write {
            state.verify_pending_write = true;
        }
        state.do_verify = kind == TransactionKind::Verify;

        debug!(
            "Memory block {} start {:?} at {:#x}, size {}",
            self.path,
            kind,
            self.address,
            data.len()
        );

        state.transport.request_transaction(Transaction {
            offset: self.offset,
            kind,
            data,
        });
        state.pending = Some(kind);
        Ok(())
    }

    fn check_transaction(&self) -> Result<(), BlockError> {
        let mut state = self.state.lock();
        self.wait_locked(&mut state);
        let do_verify = core::mem::take(&mut state.do_verify);

        if let Some(msg) = state.transport.error() {
            state.transport.clear_error();
            warn!("Memory block {} transaction failed: {}", self.path, msg);
            return Err(self.error(
                ErrorKind::Transport,
                format!("{msg} Size={}.", state.data.len()),
            ));
        }

        if do_verify {
            state.verify_pending_write = false;
            if state.verify != state.data {
                let msg = format!(
                    "Local={}. Verify={}",
                    hex_dump(&state.data),
                    hex_dump(&state.verify)
                );
                warn!("Memory block {} verify mismatch: {}", self.path, msg);
                return Err(self.error(ErrorKind::VerifyMismatch, msg));
            }
        }
        Ok(())
    }
}
