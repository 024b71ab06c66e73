mod access;
pub mod bits;
pub mod builder;
pub mod emulate;
pub mod error;
pub(crate) mod layout;
pub mod local;
pub mod memory;
pub mod remote;
pub mod transport;
pub mod types;
pub mod value;
pub mod variable;

#[cfg(test)]
mod test_support;

pub use builder::RemoteBlockBuilder;
pub use emulate::{EmulatedTransport, MemoryEmulator};
pub use error::{BlockError, ErrorKind};
pub use local::{GetHook, HookContext, HookError, LocalBlock, SetHook};
pub use memory::MemoryBlock;
pub use remote::{DEFAULT_TIMEOUT, RemoteBlock};
pub use transport::{Transaction, Transport};
pub use types::{AccessMode, BitSegment, Block, TransactionKind, TransactionState};
pub use value::{BinaryOp, Value, ValueError};
pub use variable::{Device, MAX_SEGMENTS, Variable, VariableBuilder};

pub mod prelude {
    pub use super::{
        AccessMode, BinaryOp, BitSegment, Block, BlockError, Device, EmulatedTransport, ErrorKind,
        LocalBlock, MemoryBlock, MemoryEmulator, RemoteBlock, RemoteBlockBuilder, Transaction,
        TransactionKind, TransactionState, Transport, Value, Variable,
    };
}
