use core::time::Duration;

use crate::block::TransactionKind;

/// A single memory transaction handed to a [`Transport`].
///
/// For writes `data` holds the bytes to store. For reads and verifies it is
/// a zeroed buffer of the requested size which the transport fills before
/// handing the transaction back from [`Transport::wait_transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Address of the first byte, relative to the transport base.
    pub offset: u64,
    pub kind: TransactionKind,
    pub data: Vec<u8>,
}

impl Transaction {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Memory master executing block transactions.
///
/// Each block owns its transport handle, so "the most recent transaction"
/// always refers to the block's own request.
pub trait Transport: Send {
    /// Issues a transaction. Must return without waiting for completion.
    fn request_transaction(&mut self, transaction: Transaction);

    /// Blocks until the outstanding transaction completes or `timeout`
    /// elapses (`None` waits indefinitely).
    ///
    /// Returns the completed transaction, or `None` if nothing was
    /// outstanding or it failed; failures are reported through
    /// [`Transport::error`].
    fn wait_transaction(&mut self, timeout: Option<Duration>) -> Option<Transaction>;

    /// Last transport level error, if any.
    fn error(&self) -> Option<String>;

    fn clear_error(&mut self);

    /// Smallest access granularity in bytes.
    fn min_access_size(&self) -> usize;

    /// Largest single transaction in bytes.
    fn max_access_size(&self) -> usize;

    /// Transport-relative base address, OR'd with block offsets for diagnostics.
    fn address(&self) -> u64;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn request_transaction(&mut self, transaction: Transaction) {
        (**self).request_transaction(transaction)
    }

    fn wait_transaction(&mut self, timeout: Option<Duration>) -> Option<Transaction> {
        (**self).wait_transaction(timeout)
    }

    fn error(&self) -> Option<String> {
        (**self).error()
    }

    fn clear_error(&mut self) {
        (**self).clear_error()
    }

    fn min_access_size(&self) -> usize {
        (**self).min_access_size()
    }

    fn max_access_size(&self) -> usize {
        (**self).max_access_size()
    }

    fn address(&self) -> u64 {
        (**self).address()
    }
}
