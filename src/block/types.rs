use crate::block::BlockError;

/// Access mode of a variable or block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    #[default]
    ReadWrite,
}

impl AccessMode {
    /// Returns true if blocks in this mode may issue write transactions.
    #[inline]
    pub fn can_write(self) -> bool {
        !matches!(self, AccessMode::ReadOnly)
    }

    /// Returns true if blocks in this mode may issue read transactions.
    #[inline]
    pub fn can_read(self) -> bool {
        !matches!(self, AccessMode::WriteOnly)
    }
}

/// Kind of transaction issued against a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    /// Pull fresh data from the transport into the committed buffer.
    Read,
    /// Push staged data and remember that a verify is owed.
    Write,
    /// Push staged data without verify tracking.
    Post,
    /// Read back into the verify buffer and compare against committed data.
    Verify,
}

impl TransactionKind {
    #[inline]
    pub fn is_write(self) -> bool {
        matches!(self, TransactionKind::Write | TransactionKind::Post)
    }

    /// Returns true if the kind is permitted on a block with the given mode.
    pub fn allowed_for(self, mode: AccessMode) -> bool {
        match self {
            TransactionKind::Write | TransactionKind::Post => mode.can_write(),
            TransactionKind::Read => mode.can_read(),
            TransactionKind::Verify => mode == AccessMode::ReadWrite,
        }
    }
}

/// A contiguous run of bits inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitSegment {
    pub bit_offset: usize,
    pub bit_size: usize,
}

impl BitSegment {
    pub const fn new(bit_offset: usize, bit_size: usize) -> Self {
        Self {
            bit_offset,
            bit_size,
        }
    }

    /// One past the last bit covered by this segment.
    #[inline]
    pub const fn end_bit(&self) -> usize {
        self.bit_offset + self.bit_size
    }
}

/// Transaction state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Pending(TransactionKind),
}

/// Transaction interface shared by local and remote blocks.
pub trait Block: Send + Sync {
    /// Identifying path, used for diagnostics.
    fn path(&self) -> &str;

    fn mode(&self) -> AccessMode;

    /// Returns true if the block takes part in whole-device sweeps.
    fn bulk_enabled(&self) -> bool;

    /// Starts a transaction of the given kind without waiting for it.
    fn start_transaction(&self, kind: TransactionKind) -> Result<(), BlockError>;

    /// Waits for the outstanding transaction and notifies variables on update.
    fn check_transaction(&self) -> Result<(), BlockError>;

    /// Starts a transaction and leaves it in flight.
    fn background_transaction(&self, kind: TransactionKind) -> Result<(), BlockError> {
        self.start_transaction(kind)
    }

    /// Starts a transaction and waits for it to complete.
    fn blocking_transaction(&self, kind: TransactionKind) -> Result<(), BlockError> {
        self.start_transaction(kind)?;
        self.check_transaction()
    }
}
