//! Test support utilities - only compiled in test builds.

use std::sync::Arc;

use crate::block::{
    Device, RemoteBlock, Variable,
    builder::RemoteBlockBuilder,
    emulate::{EmulatedTransport, MemoryEmulator},
};

pub type TestBlock = RemoteBlock<EmulatedTransport>;

/// Helper to create an enabled device named `Dev`.
pub fn test_device() -> Arc<Device> {
    Device::new("Dev")
}

/// Helper to create a read-write, verified, exclusive single-segment variable.
pub fn var(path: &str, bit_offset: usize, bit_size: usize) -> Arc<Variable> {
    Variable::builder(path)
        .bits(bit_offset, bit_size)
        .build()
        .unwrap()
}

/// Builds a block on `emu` owned by `device`.
pub fn block_on(
    device: &Arc<Device>,
    emu: &MemoryEmulator,
    offset: u64,
    variables: Vec<Arc<Variable>>,
) -> TestBlock {
    RemoteBlockBuilder::new()
        .device(device.clone())
        .transport(emu.transport())
        .offset(offset)
        .variables(variables)
        .build()
        .unwrap()
}

/// Builds a block on `emu` owned by a fresh test device.
pub fn test_block(emu: &MemoryEmulator, offset: u64, variables: Vec<Arc<Variable>>) -> TestBlock {
    block_on(&test_device(), emu, offset, variables)
}
