//! Staged, verified register blocks for remote memory.
//!
//! This crate maps logical, possibly bit-sliced variables onto a region of
//! remote memory reached through a [`Transport`](block::Transport). Several
//! variables may share or subdivide the same words; writes are staged
//! locally, coalesced into aligned transactions and optionally read back for
//! verification.
//!
//! # Features
//!
//! - **Bit-level packing** - Variables made of arbitrary bit segments
//! - **Staged writes** - `set` never touches the transport; reads see your own writes
//! - **Range coalescing** - Only bytes holding staged bits are pushed, widened to the
//!   transport's minimum access size
//! - **Write verification** - Masked read-back comparison after a write
//! - **Local blocks** - Software-only values with get/set hooks
//! - **Memory blocks** - Raw memory windows set and verified as a whole
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  set()   ┌──────────────────────────┐  request   ┌───────────┐
//! │   Owner          │─────────▶│  RemoteBlock             │──────────▶│ Transport │
//! │                  │          │  staged ─┐               │            │           │
//! │  start_txn()     │─────────▶│          ▼ fold on write │◀──────────│  (wait)   │
//! │  check_txn()     │◀─────────│  committed / verify      │  complete  │           │
//! └──────────────────┘  notify  └──────────────────────────┘            └───────────┘
//! ```
//!
//! - **`set`** stages bits and marks them in the staged mask
//! - **`start_transaction(Write)`** folds staged bits into committed data and
//!   dispatches the covering byte range
//! - **`check_transaction`** waits, reports transport errors, compares verify
//!   data and notifies variables after a read
//!
//! # Example
//!
//! ```rust
//! use register_blocks::prelude::*;
//!
//! let memory = MemoryEmulator::new(4, 1024);
//! let device = Device::new("Top.Dev");
//! let mode = Variable::builder("Top.Dev.Mode").bits(0, 4).build().unwrap();
//! let gain = Variable::builder("Top.Dev.Gain").bits(4, 12).build().unwrap();
//!
//! let block = RemoteBlockBuilder::new()
//!     .device(device)
//!     .transport(memory.transport())
//!     .offset(0x100)
//!     .variables([mode.clone(), gain.clone()])
//!     .build()
//!     .unwrap();
//!
//! block.set_u8(&mode, 0x3).unwrap();
//! block.set_u16(&gain, 0x5A5).unwrap();
//! block.blocking_transaction(TransactionKind::Write).unwrap();
//! block.blocking_transaction(TransactionKind::Verify).unwrap();
//!
//! assert_eq!(memory.read(0x100, 2), [0x53, 0x5A]);
//! assert_eq!(block.get_u16(&gain).unwrap(), 0x5A5);
//! ```

#![deny(unsafe_code)]

pub mod block;

pub mod prelude {
    pub use crate::block::prelude::*;
}
