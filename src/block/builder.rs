use core::{marker::PhantomData, time::Duration};
use std::sync::Arc;

use crate::block::{
    BlockError, Device, Variable,
    remote::{DEFAULT_TIMEOUT, RemoteBlock},
    transport::Transport,
};

// Builder states
pub struct NeedDevice;
pub struct NeedTransport;
pub struct NeedOffset;
pub struct NeedVariables;
pub struct Ready;

/// Typestate builder for [`RemoteBlock`].
///
/// Device, transport, offset and at least one variable are required, in
/// that order; the timeout is optional.
pub struct RemoteBlockBuilder<D, T, State> {
    device: D,
    transport: T,
    offset: u64,
    variables: Vec<Arc<Variable>>,
    timeout: Option<Duration>,
    _phantom: PhantomData<State>,
}

// Start the builder
impl RemoteBlockBuilder<(), (), NeedDevice> {
    pub fn new() -> Self {
        RemoteBlockBuilder {
            device: (),
            transport: (),
            offset: 0,
            variables: Vec::new(),
            timeout: Some(DEFAULT_TIMEOUT),
            _phantom: PhantomData,
        }
    }
}

impl Default for RemoteBlockBuilder<(), (), NeedDevice> {
    fn default() -> Self {
        Self::new()
    }
}

// Set owning device
impl RemoteBlockBuilder<(), (), NeedDevice> {
    pub fn device(self, device: Arc<Device>) -> RemoteBlockBuilder<Arc<Device>, (), NeedTransport> {
        RemoteBlockBuilder {
            device,
            transport: (),
            offset: 0,
            variables: Vec::new(),
            timeout: self.timeout,
            _phantom: PhantomData,
        }
    }
}

// Set transport
impl RemoteBlockBuilder<Arc<Device>, (), NeedTransport> {
    pub fn transport<T: Transport>(
        self,
        transport: T,
    ) -> RemoteBlockBuilder<Arc<Device>, T, NeedOffset> {
        RemoteBlockBuilder {
            device: self.device,
            transport,
            offset: 0,
            variables: Vec::new(),
            timeout: self.timeout,
            _phantom: PhantomData,
        }
    }
}

// Set offset
impl<T: Transport> RemoteBlockBuilder<Arc<Device>, T, NeedOffset> {
    /// Base address of the block within the device address space.
    pub fn offset(self, offset: u64) -> RemoteBlockBuilder<Arc<Device>, T, NeedVariables> {
        RemoteBlockBuilder {
            device: self.device,
            transport: self.transport,
            offset,
            variables: Vec::new(),
            timeout: self.timeout,
            _phantom: PhantomData,
        }
    }
}

// Attach variables
impl<T: Transport> RemoteBlockBuilder<Arc<Device>, T, NeedVariables> {
    pub fn variables(
        self,
        variables: impl IntoIterator<Item = Arc<Variable>>,
    ) -> RemoteBlockBuilder<Arc<Device>, T, Ready> {
        RemoteBlockBuilder {
            device: self.device,
            transport: self.transport,
            offset: self.offset,
            variables: variables.into_iter().collect(),
            timeout: self.timeout,
            _phantom: PhantomData,
        }
    }

    pub fn variable(self, variable: Arc<Variable>) -> RemoteBlockBuilder<Arc<Device>, T, Ready> {
        self.variables([variable])
    }
}

impl<T: Transport> RemoteBlockBuilder<Arc<Device>, T, Ready> {
    /// Attaches one more variable.
    pub fn variable(mut self, variable: Arc<Variable>) -> Self {
        self.variables.push(variable);
        self
    }

    /// Transaction timeout; `None` waits indefinitely.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validates the variables against each other and the transport and builds the block.
    pub fn build(self) -> Result<RemoteBlock<T>, BlockError> {
        RemoteBlock::new(
            self.device,
            self.transport,
            self.offset,
            self.variables,
            self.timeout,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{
        Block, ErrorKind,
        emulate::MemoryEmulator,
        test_support::{test_device, var},
    };

    #[test]
    fn test_simple_builder() {
        let block = RemoteBlockBuilder::new()
            .device(test_device())
            .transport(MemoryEmulator::new(4, 1024).transport())
            .offset(0x100)
            .variable(var("Dev.A", 0, 8))
            .variable(var("Dev.B", 8, 8))
            .build()
            .unwrap();

        assert_eq!(block.path(), "Dev.A");
        assert_eq!(block.offset(), 0x100);
        assert_eq!(block.size(), 4);
        assert_eq!(block.timeout(), Some(DEFAULT_TIMEOUT));
    }

    #[test]
    fn test_builder_with_timeout() {
        let block = RemoteBlockBuilder::new()
            .device(test_device())
            .transport(MemoryEmulator::new(4, 1024).transport())
            .offset(0)
            .variables([var("A", 0, 32)])
            .timeout(None)
            .build()
            .unwrap();

        assert_eq!(block.timeout(), None);
    }

    #[test]
    fn test_builder_rejects_zero_access_size() {
        for (min, max) in [(0, 8), (4, 0)] {
            let err = RemoteBlockBuilder::new()
                .device(test_device())
                .transport(MemoryEmulator::new(min, max).transport())
                .offset(0)
                .variable(var("A", 0, 8))
                .build()
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration);
        }
    }

    #[test]
    fn test_builder_rejects_overlap() {
        let err = RemoteBlockBuilder::new()
            .device(test_device())
            .transport(MemoryEmulator::new(4, 1024).transport())
            .offset(0)
            .variable(var("A", 0, 8))
            .variable(var("B", 4, 8))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overlap);
    }
}
