use core::{fmt, ops::Range, time::Duration};
use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::block::{
    AccessMode, Block, BlockError, Device, ErrorKind, TransactionKind, TransactionState, Variable,
    access::{impl_typed_access, impl_typed_accessors},
    bits::{align_span, any_bits_set, copy_bits, hex_dump, masked_eq, nonzero_span, set_bits},
    layout::BlockLayout,
    transport::{Transaction, Transport},
};

/// Transaction timeout applied unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct PendingTransaction {
    kind: TransactionKind,
    range: Range<usize>,
}

/// Everything guarded by the block lock.
struct BlockState<T> {
    transport: T,
    staged: Vec<u8>,
    staged_mask: Vec<u8>,
    committed: Vec<u8>,
    verify: Vec<u8>,
    pending: Option<PendingTransaction>,
    verify_pending_write: bool,
    verify_range: Option<Range<usize>>,
    do_update: bool,
    timeout: Option<Duration>,
}

impl<T> BlockState<T> {
    /// Folds staged bits into committed data, returning the span of staged bytes.
    fn fold_staged(&mut self) -> Option<Range<usize>> {
        for ((c, s), m) in self
            .committed
            .iter_mut()
            .zip(self.staged.iter())
            .zip(self.staged_mask.iter())
        {
            *c = (*c & !*m) | (*s & *m);
        }
        nonzero_span(&self.staged_mask)
    }

    fn clear_staged(&mut self) {
        self.staged.fill(0);
        self.staged_mask.fill(0);
    }

    fn stage(&mut self, var: &Variable, bits: &[u8]) {
        let mut src = 0;
        for seg in var.segments() {
            copy_bits(&mut self.staged, seg.bit_offset, bits, src, seg.bit_size);
            set_bits(&mut self.staged_mask, seg.bit_offset, seg.bit_size);
            src += seg.bit_size;
        }
    }
}

/// Register block backed by a remote memory transport.
///
/// Holds the committed, staged and verify images of a contiguous region
/// shared by one or more variables. Writes are staged locally and only
/// reach the transport on a `Write`/`Post` transaction; reads always see
/// the caller's own staged bits first.
///
/// All buffers and transaction bookkeeping sit behind a single lock.
/// Variable notifications run after the lock is released, so listeners may
/// read the block again.
pub struct RemoteBlock<T: Transport> {
    path: String,
    mode: AccessMode,
    offset: u64,
    address: u64,
    size: usize,
    min_access: usize,
    verify_mask: Vec<u8>,
    verify_enabled: bool,
    bulk_enabled: bool,
    exclusive_only: bool,
    overlap_only: bool,
    device: Arc<Device>,
    variables: Vec<Arc<Variable>>,
    state: Mutex<BlockState<T>>,
}

impl<T: Transport> fmt::Debug for RemoteBlock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteBlock")
            .field("path", &self.path)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> RemoteBlock<T> {
    /// Creates a block at `offset` and attaches `variables` to it.
    ///
    /// Fails with [`ErrorKind::Configuration`] if the transport reports a
    /// zero access size, and with [`ErrorKind::Overlap`] if variables
    /// collide. The block is forced stale so that its first write pushes
    /// every variable-owned bit.
    pub fn new(
        device: Arc<Device>,
        transport: T,
        offset: u64,
        variables: Vec<Arc<Variable>>,
        timeout: Option<Duration>,
    ) -> Result<Self, BlockError> {
        let min_access = transport.min_access_size();
        let max_access = transport.max_access_size();
        let address = offset | transport.address();

        if min_access == 0 || max_access == 0 {
            let path = variables.first().map_or(device.path(), |v| v.path());
            return Err(BlockError::new(
                ErrorKind::Configuration,
                path,
                address,
                format!("Invalid min/max size {min_access}/{max_access}"),
            ));
        }

        let layout = BlockLayout::add_variables(&variables, min_access, max_access, address)?;

        let staged_mask = if layout.mode.can_write() {
            layout.owned_mask.clone()
        } else {
            vec![0; layout.size]
        };

        debug!(
            "Created block {} at {:#x}, size {}, {} variables",
            layout.path,
            address,
            layout.size,
            variables.len()
        );

        Ok(Self {
            path: layout.path,
            mode: layout.mode,
            offset,
            address,
            size: layout.size,
            min_access,
            verify_mask: layout.verify_mask,
            verify_enabled: layout.verify_enabled,
            bulk_enabled: layout.bulk_enabled,
            exclusive_only: layout.exclusive_only,
            overlap_only: layout.overlap_only,
            device,
            variables,
            state: Mutex::new(BlockState {
                transport,
                staged: vec![0; layout.size],
                staged_mask,
                committed: vec![0; layout.size],
                verify: vec![0; layout.size],
                pending: None,
                verify_pending_write: false,
                verify_range: None,
                do_update: false,
                timeout,
            }),
        })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Absolute address for diagnostics: block offset OR'd with the transport base.
    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn variables(&self) -> &[Arc<Variable>] {
        &self.variables
    }

    pub fn verify_enabled(&self) -> bool {
        self.verify_enabled
    }

    /// Returns true if no attached variable permits bit overlap.
    pub fn exclusive_only(&self) -> bool {
        self.exclusive_only
    }

    /// Returns true if every attached variable permits bit overlap.
    pub fn overlap_only(&self) -> bool {
        self.overlap_only
    }

    /// Returns true if any bit is staged and not yet pushed to the transport.
    pub fn stale(&self) -> bool {
        self.state.lock().staged_mask.iter().any(|b| *b != 0)
    }

    pub fn state(&self) -> TransactionState {
        match &self.state.lock().pending {
            Some(p) => TransactionState::Pending(p.kind),
            None => TransactionState::Idle,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() != TransactionState::Idle
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.state.lock().timeout
    }

    /// Sets the transaction timeout; `None` waits indefinitely.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.state.lock().timeout = timeout;
    }

    /// Stages `bits` (packed LSB first) into every segment of `var`.
    ///
    /// Committed data is left untouched until the next write transaction.
    pub fn set(&self, var: &Variable, bits: &[u8]) -> Result<(), BlockError> {
        self.check_buffer(var, bits.len())?;
        self.state.lock().stage(var, bits);
        Ok(())
    }

    /// Reads `var` into `out` (packed LSB first).
    ///
    /// Segments with any staged bit are read from the staged image, all
    /// others from committed data.
    pub fn get(&self, var: &Variable, out: &mut [u8]) -> Result<(), BlockError> {
        self.check_buffer(var, out.len())?;
        out[..var.value_bytes()].fill(0);

        let state = self.state.lock();
        let mut dst = 0;
        for seg in var.segments() {
            let src = if any_bits_set(&state.staged_mask, seg.bit_offset, seg.bit_size) {
                &state.staged
            } else {
                &state.committed
            };
            copy_bits(out, dst, src, seg.bit_offset, seg.bit_size);
            dst += seg.bit_size;
        }
        Ok(())
    }

    /// Reads `var` into a freshly allocated buffer.
    pub fn get_bytes(&self, var: &Variable) -> Result<Vec<u8>, BlockError> {
        let mut out = vec![0; var.value_bytes()];
        self.get(var, &mut out)?;
        Ok(out)
    }

    /// Seeds both committed and staged state with `bits`.
    ///
    /// The bits stay marked staged so the next write still pushes them.
    pub fn set_default(&self, var: &Variable, bits: &[u8]) -> Result<(), BlockError> {
        self.check_buffer(var, bits.len())?;
        let mut state = self.state.lock();
        state.stage(var, bits);
        state.fold_staged();
        Ok(())
    }

    /// Starts a transaction over an optional byte range of the block.
    ///
    /// Invalid kind/mode combinations, a disabled device and a verify with
    /// no preceding verified write are silent no-ops. Write and post
    /// transactions always cover every byte holding staged bits. The final
    /// range is widened to the transport's minimum access size.
    pub fn start_transaction_range(
        &self,
        kind: TransactionKind,
        range: Option<Range<usize>>,
    ) -> Result<(), BlockError> {
        if !self.device.enabled() || !kind.allowed_for(self.mode) {
            trace!("Block {} skipping {:?}", self.path, kind);
            return Ok(());
        }

        if let Some(r) = &range {
            if r.start >= r.end || r.end > self.size {
                return Err(self.error(
                    ErrorKind::Configuration,
                    format!("invalid byte range {r:?} for block size {}", self.size),
                ));
            }
        }

        let mut state = self.state.lock();

        if kind == TransactionKind::Verify && !state.verify_pending_write {
            return Ok(());
        }

        self.wait_locked(&mut state);
        state.transport.clear_error();

        let range = if kind.is_write() {
            let staged = state.fold_staged();
            state.clear_staged();
            match (range, staged) {
                (Some(r), Some(s)) => r.start.min(s.start)..r.end.max(s.end),
                (Some(r), None) => r,
                (None, Some(s)) => s,
                (None, None) => 0..self.size,
            }
        } else {
            range.unwrap_or(0..self.size)
        };

        if kind == TransactionKind::Write {
            state.verify_pending_write = self.verify_enabled;
        }

        let range = align_span(range, self.min_access, self.size);

        let data = match kind {
            TransactionKind::Write | TransactionKind::Post => state.committed[range.clone()].to_vec(),
            TransactionKind::Read | TransactionKind::Verify => vec![0; range.len()],
        };

        state.verify_range = (kind == TransactionKind::Verify).then(|| range.clone());
        state.do_update = kind == TransactionKind::Read;

        debug!(
            "Block {} start {:?} at {:#x}, bytes {:?}",
            self.path,
            kind,
            self.address + range.start as u64,
            range
        );

        state.transport.request_transaction(Transaction {
            offset: self.offset + range.start as u64,
            kind,
            data,
        });
        state.pending = Some(PendingTransaction { kind, range });

        Ok(())
    }

    /// Waits for the outstanding transaction, if any, and lands its data.
    ///
    /// Nothing is applied if the transport reports an error.
    fn wait_locked(&self, state: &mut BlockState<T>) {
        let Some(pending) = state.pending.take() else {
            return;
        };

        let done = state.transport.wait_transaction(state.timeout);
        if state.transport.error().is_some() {
            return;
        }

        if let Some(done) = done {
            let target = match pending.kind {
                TransactionKind::Read => &mut state.committed,
                TransactionKind::Verify => &mut state.verify,
                TransactionKind::Write | TransactionKind::Post => return,
            };
            let len = done.data.len().min(pending.range.len());
            let start = pending.range.start;
            target[start..start + len].copy_from_slice(&done.data[..len]);
        }
    }

    /// Completes the outstanding transaction: error check, verify, notify.
    fn complete(&self) -> Result<(), BlockError> {
        let notify = {
            let mut state = self.state.lock();
            self.wait_locked(&mut state);

            if let Some(msg) = state.transport.error() {
                state.transport.clear_error();
                state.do_update = false;
                state.verify_range = None;
                warn!("Block {} transaction failed: {}", self.path, msg);
                return Err(self.error(
                    ErrorKind::Transport,
                    format!("{msg} Size={}.", self.size),
                ));
            }

            if let Some(range) = state.verify_range.take() {
                state.verify_pending_write = false;
                if !masked_eq(&state.verify, &state.committed, &self.verify_mask, range) {
                    state.do_update = false;
                    let msg = format!(
                        "Local={}. Verify={}. Mask={}",
                        hex_dump(&state.committed),
                        hex_dump(&state.verify),
                        hex_dump(&self.verify_mask)
                    );
                    warn!("Block {} verify mismatch: {}", self.path, msg);
                    return Err(self.error(ErrorKind::VerifyMismatch, msg));
                }
            }

            core::mem::take(&mut state.do_update)
        };

        if notify {
            debug!("Block {} updated", self.path);
            for var in &self.variables {
                var.notify_updated();
            }
        }

        Ok(())
    }

    fn error(&self, kind: ErrorKind, msg: String) -> BlockError {
        BlockError::new(kind, &self.path, self.address, msg)
    }

    fn check_buffer(&self, var: &Variable, len: usize) -> Result<(), BlockError> {
        if !self.variables.iter().any(|v| core::ptr::eq(v.as_ref(), var)) {
            return Err(self.error(
                ErrorKind::Configuration,
                format!("variable {} is not attached to this block", var.path()),
            ));
        }
        if len < var.value_bytes() {
            return Err(self.error(
                ErrorKind::Value,
                format!(
                    "buffer of {len} bytes too short for {} ({} bits)",
                    var.path(),
                    var.bit_count()
                ),
            ));
        }
        Ok(())
    }

    fn check_width(&self, var: &Variable, bits: usize) -> Result<(), BlockError> {
        if var.bit_count() > bits {
            return Err(self.error(
                ErrorKind::Value,
                format!("{} is {} bits wide, accessor holds {bits}", var.path(), var.bit_count()),
            ));
        }
        Ok(())
    }

    impl_typed_accessors!();
}

impl<T: Transport> Block for RemoteBlock<T> {
    fn path(&self) -> &str {
        &self.path
    }

    fn mode(&self) -> AccessMode {
        self.mode
    }

    fn bulk_enabled(&self) -> bool {
        self.bulk_enabled
    }

    fn start_transaction(&self, kind: TransactionKind) -> Result<(), BlockError> {
        self.start_transaction_range(kind, None)
    }

    fn check_transaction(&self) -> Result<(), BlockError> {
        self.complete()
    }
}
