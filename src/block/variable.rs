use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use heapless::Vec;
use parking_lot::Mutex;

use crate::block::{AccessMode, BitSegment, BlockError, ErrorKind};

/// Maximum number of bit segments a single variable may be split into.
pub const MAX_SEGMENTS: usize = 16;

type Listener = Arc<dyn Fn(&Variable) + Send + Sync>;

/// Owning device of a set of blocks.
///
/// Blocks only consult the enable gate; a disabled device turns every
/// remote transaction into a silent no-op.
#[derive(Debug)]
pub struct Device {
    path: String,
    enabled: AtomicBool,
}

impl Device {
    pub fn new(path: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            enabled: AtomicBool::new(true),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

/// Describes where a value's bits live inside its owning block.
///
/// Segments are applied in order: the first segment receives the least
/// significant bits of the packed value.
pub struct Variable {
    path: String,
    segments: Vec<BitSegment, MAX_SEGMENTS>,
    mode: AccessMode,
    verify: bool,
    overlap_enabled: bool,
    bulk_enabled: bool,
    updates: AtomicU64,
    listeners: Mutex<std::vec::Vec<Listener>>,
}

impl core::fmt::Debug for Variable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Variable")
            .field("path", &self.path)
            .field("segments", &self.segments.as_slice())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl Variable {
    pub fn builder(path: impl Into<String>) -> VariableBuilder {
        VariableBuilder {
            path: path.into(),
            segments: Vec::new(),
            overflow: false,
            mode: AccessMode::ReadWrite,
            verify: true,
            overlap_enabled: false,
            bulk_enabled: true,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn segments(&self) -> &[BitSegment] {
        &self.segments
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Returns true if this variable's bits take part in post-write verification.
    pub fn verify(&self) -> bool {
        self.verify
    }

    pub fn overlap_enabled(&self) -> bool {
        self.overlap_enabled
    }

    pub fn bulk_enabled(&self) -> bool {
        self.bulk_enabled
    }

    /// Total number of bits across all segments.
    pub fn bit_count(&self) -> usize {
        self.segments.iter().map(|s| s.bit_size).sum()
    }

    /// Bytes needed to hold the packed value.
    pub fn value_bytes(&self) -> usize {
        self.bit_count().div_ceil(8)
    }

    /// Bytes of block storage needed to reach the highest bit of this variable.
    pub fn block_bytes(&self) -> usize {
        self.segments
            .iter()
            .map(BitSegment::end_bit)
            .max()
            .unwrap_or(0)
            .div_ceil(8)
    }

    /// Registers a callback invoked whenever the owning block reports fresh data.
    ///
    /// Listeners run on the thread that completed the transaction and may
    /// start further transactions on the owning block.
    pub fn on_update(&self, f: impl Fn(&Variable) + Send + Sync + 'static) {
        self.listeners.lock().push(Arc::new(f));
    }

    /// Number of update notifications received so far.
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Acquire)
    }

    /// Called by the owning block after a successful update.
    pub fn notify_updated(&self) {
        self.updates.fetch_add(1, Ordering::AcqRel);
        let listeners = self.listeners.lock().clone();
        for listener in &listeners {
            listener(self);
        }
    }
}

/// Builder for [`Variable`].
#[derive(Debug)]
pub struct VariableBuilder {
    path: String,
    segments: Vec<BitSegment, MAX_SEGMENTS>,
    overflow: bool,
    mode: AccessMode,
    verify: bool,
    overlap_enabled: bool,
    bulk_enabled: bool,
}

impl VariableBuilder {
    /// Appends a `(bit_offset, bit_size)` segment.
    pub fn bits(mut self, bit_offset: usize, bit_size: usize) -> Self {
        if self
            .segments
            .push(BitSegment::new(bit_offset, bit_size))
            .is_err()
        {
            self.overflow = true;
        }
        self
    }

    pub fn mode(mut self, mode: AccessMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn overlap(mut self, enabled: bool) -> Self {
        self.overlap_enabled = enabled;
        self
    }

    pub fn bulk(mut self, enabled: bool) -> Self {
        self.bulk_enabled = enabled;
        self
    }

    pub fn build(self) -> Result<Arc<Variable>, BlockError> {
        let fail = |msg: String| Err(BlockError::new(ErrorKind::Configuration, &self.path, 0, msg));

        if self.overflow {
            return fail(format!("more than {MAX_SEGMENTS} bit segments"));
        }
        if self.segments.is_empty() {
            return fail("no bit segments".into());
        }
        if let Some(seg) = self.segments.iter().find(|s| s.bit_size == 0) {
            return fail(format!("zero sized segment at bit {}", seg.bit_offset));
        }

        Ok(Arc::new(Variable {
            path: self.path,
            segments: self.segments,
            mode: self.mode,
            verify: self.verify,
            overlap_enabled: self.overlap_enabled,
            bulk_enabled: self.bulk_enabled,
            updates: AtomicU64::new(0),
            listeners: Mutex::new(std::vec::Vec::new()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn sizes_for_sliced_variable() {
        let var = Variable::builder("v")
            .bits(4, 4)
            .bits(20, 6)
            .build()
            .unwrap();

        assert_eq!(var.bit_count(), 10);
        assert_eq!(var.value_bytes(), 2);
        assert_eq!(var.block_bytes(), 4);
    }

    #[test]
    fn builder_defaults() {
        let var = Variable::builder("v").bits(0, 8).build().unwrap();
        assert_eq!(var.mode(), AccessMode::ReadWrite);
        assert!(var.verify());
        assert!(!var.overlap_enabled());
        assert!(var.bulk_enabled());
    }

    #[test]
    fn builder_rejects_bad_segments() {
        let err = Variable::builder("v").build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = Variable::builder("v").bits(0, 0).build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let mut b = Variable::builder("v");
        for i in 0..=MAX_SEGMENTS {
            b = b.bits(i, 1);
        }
        assert_eq!(b.build().unwrap_err().kind(), ErrorKind::Configuration);
    }

    #[test]
    fn notify_runs_listeners_and_counts() {
        let var = Variable::builder("v").bits(0, 1).build().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        var.on_update(move |v| {
            assert_eq!(v.path(), "v");
            h.fetch_add(1, Ordering::SeqCst);
        });

        var.notify_updated();
        var.notify_updated();

        assert_eq!(var.update_count(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listener_may_notify_and_register_again() {
        let var = Variable::builder("v").bits(0, 1).build().unwrap();
        let nested = Arc::new(AtomicUsize::new(0));
        let n = nested.clone();
        var.on_update(move |v| {
            if n.fetch_add(1, Ordering::SeqCst) == 0 {
                v.on_update(|_| {});
                v.notify_updated();
            }
        });

        var.notify_updated();

        assert_eq!(nested.load(Ordering::SeqCst), 2);
        assert_eq!(var.update_count(), 2);
    }

    #[test]
    fn device_enable_gate() {
        let dev = Device::new("Top");
        assert!(dev.enabled());
        dev.set_enabled(false);
        assert!(!dev.enabled());
        assert_eq!(dev.path(), "Top");
    }
}
