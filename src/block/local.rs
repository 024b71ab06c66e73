use core::cell::RefCell;
use std::sync::Arc;

use log::debug;
use parking_lot::ReentrantMutex;

use crate::block::{
    AccessMode, Block, BlockError, Device, ErrorKind, TransactionKind, Variable,
    value::{BinaryOp, Value},
};

pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Arguments passed to local get/set hooks.
///
/// `value` and `changed` are only meaningful for set hooks.
#[derive(Debug)]
pub struct HookContext<'a> {
    pub device: &'a Device,
    pub variable: &'a Variable,
    pub value: Option<&'a Value>,
    pub changed: bool,
}

/// Called after a value is stored. May return a replacement value, or an
/// error to reject the set.
pub type SetHook = Box<dyn Fn(&HookContext<'_>) -> Result<Option<Value>, HookError> + Send + Sync>;

/// Produces the current value on every get.
pub type GetHook = Box<dyn Fn(&HookContext<'_>) -> Result<Value, HookError> + Send + Sync>;

struct LocalState {
    value: Value,
    do_update: bool,
}

/// Block holding a single software value.
///
/// Shares the transaction interface of remote blocks but performs no I/O:
/// a transaction only schedules an update notification for its variable.
/// Each block has its own re-entrant lock, so hooks may call back into
/// the block while other blocks stay available to other threads.
pub struct LocalBlock {
    device: Arc<Device>,
    variable: Arc<Variable>,
    state: ReentrantMutex<RefCell<LocalState>>,
    set_hook: Option<SetHook>,
    get_hook: Option<GetHook>,
}

impl core::fmt::Debug for LocalBlock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocalBlock")
            .field("path", &self.variable.path())
            .finish_non_exhaustive()
    }
}

impl LocalBlock {
    pub fn new(device: Arc<Device>, variable: Arc<Variable>, value: Value) -> Self {
        Self {
            device,
            variable,
            state: ReentrantMutex::new(RefCell::new(LocalState {
                value,
                do_update: false,
            })),
            set_hook: None,
            get_hook: None,
        }
    }

    pub fn with_set_hook(
        mut self,
        hook: impl Fn(&HookContext<'_>) -> Result<Option<Value>, HookError> + Send + Sync + 'static,
    ) -> Self {
        self.set_hook = Some(Box::new(hook));
        self
    }

    pub fn with_get_hook(
        mut self,
        hook: impl Fn(&HookContext<'_>) -> Result<Value, HookError> + Send + Sync + 'static,
    ) -> Self {
        self.get_hook = Some(Box::new(hook));
        self
    }

    pub fn variable(&self) -> &Arc<Variable> {
        &self.variable
    }

    /// Last stored value, without consulting the get hook.
    pub fn value(&self) -> Value {
        self.state.lock().borrow().value.clone()
    }

    /// Stores `value` and runs the set hook.
    ///
    /// If the hook rejects the value the previous one is restored.
    pub fn set(&self, value: Value) -> Result<(), BlockError> {
        self.set_in(&self.state.lock(), value)
    }

    /// Returns the current value, refreshed through the get hook if present.
    pub fn get(&self) -> Result<Value, BlockError> {
        self.get_in(&self.state.lock())
    }

    /// Reads the current value, combines it with `operand`, stores and notifies.
    ///
    /// Returns the stored result, which a set hook may have replaced.
    pub fn apply_binary_op(&self, op: BinaryOp, operand: &Value) -> Result<Value, BlockError> {
        let result = {
            let state = self.state.lock();
            let current = self.get_in(&state)?;
            let next = current
                .apply(op, operand)
                .map_err(|e| self.error(ErrorKind::Value, e.to_string()))?;
            self.set_in(&state, next)?;
            state.borrow().value.clone()
        };

        self.variable.notify_updated();
        Ok(result)
    }

    fn set_in(&self, state: &RefCell<LocalState>, value: Value) -> Result<(), BlockError> {
        let previous = core::mem::replace(&mut state.borrow_mut().value, value.clone());
        let changed = value.changed_from(&previous);

        let Some(hook) = &self.set_hook else {
            return Ok(());
        };

        let ctx = HookContext {
            device: &self.device,
            variable: &self.variable,
            value: Some(&value),
            changed,
        };

        match hook(&ctx) {
            Ok(Some(replacement)) => state.borrow_mut().value = replacement,
            Ok(None) => {}
            Err(e) => {
                state.borrow_mut().value = previous;
                return Err(self.error(ErrorKind::Hook, format!("set hook failed: {e}")));
            }
        }
        Ok(())
    }

    fn get_in(&self, state: &RefCell<LocalState>) -> Result<Value, BlockError> {
        if let Some(hook) = &self.get_hook {
            let ctx = HookContext {
                device: &self.device,
                variable: &self.variable,
                value: None,
                changed: false,
            };
            let value = hook(&ctx)
                .map_err(|e| self.error(ErrorKind::Hook, format!("get hook failed: {e}")))?;
            state.borrow_mut().value = value;
        }
        Ok(state.borrow().value.clone())
    }

    fn error(&self, kind: ErrorKind, msg: String) -> BlockError {
        BlockError::new(kind, self.variable.path(), 0, msg)
    }
}

impl Block for LocalBlock {
    fn path(&self) -> &str {
        self.variable.path()
    }

    fn mode(&self) -> AccessMode {
        self.variable.mode()
    }

    fn bulk_enabled(&self) -> bool {
        self.variable.bulk_enabled()
    }

    fn start_transaction(&self, _kind: TransactionKind) -> Result<(), BlockError> {
        self.state.lock().borrow_mut().do_update = true;
        Ok(())
    }

    fn check_transaction(&self) -> Result<(), BlockError> {
        let notify = core::mem::take(&mut self.state.lock().borrow_mut().do_update);

        if notify {
            debug!("Local block {} updated", self.variable.path());
            self.variable.notify_updated();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::block::test_support::{test_device, var};

    fn local(value: Value) -> LocalBlock {
        LocalBlock::new(test_device(), var("Dev.Local", 0, 32), value)
    }

    #[test]
    fn set_then_get_returns_value() {
        let block = local(Value::Int(0));
        block.set(Value::Int(42)).unwrap();
        assert_eq!(block.get().unwrap(), Value::Int(42));
        assert_eq!(block.value(), Value::Int(42));
    }

    #[test]
    fn set_hook_sees_changed_flag() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let s = seen.clone();
        let block = local(Value::Int(1)).with_set_hook(move |ctx| {
            assert_eq!(ctx.device.path(), "Dev");
            assert_eq!(ctx.variable.path(), "Dev.Local");
            s.lock().push((ctx.value.cloned(), ctx.changed));
            Ok(None)
        });

        block.set(Value::Int(1)).unwrap();
        block.set(Value::Int(2)).unwrap();
        block.set(Value::List(vec![])).unwrap();
        block.set(Value::List(vec![])).unwrap();

        let seen = seen.lock();
        assert_eq!(seen[0], (Some(Value::Int(1)), false));
        assert_eq!(seen[1], (Some(Value::Int(2)), true));
        assert!(seen[2].1);
        assert!(seen[3].1);
    }

    #[test]
    fn set_hook_can_replace_value() {
        let block = local(Value::Int(0)).with_set_hook(|ctx| match ctx.value {
            Some(Value::Int(v)) if *v > 100 => Ok(Some(Value::Int(100))),
            _ => Ok(None),
        });

        block.set(Value::Int(500)).unwrap();
        assert_eq!(block.get().unwrap(), Value::Int(100));
    }

    #[test]
    fn set_hook_rejection_restores_previous() {
        let block = local(Value::Int(5)).with_set_hook(|ctx| match ctx.value {
            Some(Value::Int(v)) if *v < 0 => Err("negative values not allowed".into()),
            _ => Ok(None),
        });

        let err = block.set(Value::Int(-1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Hook);
        assert!(err.message().contains("negative"));
        assert_eq!(block.value(), Value::Int(5));
    }

    #[test]
    fn get_hook_supplies_value() {
        let block = local(Value::Int(0)).with_get_hook(|ctx| {
            assert!(ctx.value.is_none());
            Ok(Value::Str("live".into()))
        });
        assert_eq!(block.get().unwrap(), Value::Str("live".into()));
        assert_eq!(block.value(), Value::Str("live".into()));
    }

    #[test]
    fn get_hook_failure_propagates() {
        let block = local(Value::Int(0)).with_get_hook(|_| Err("sensor offline".into()));
        assert_eq!(block.get().unwrap_err().kind(), ErrorKind::Hook);
    }

    #[test]
    fn transaction_notifies_variable_once() {
        let block = local(Value::Int(0));
        block.check_transaction().unwrap();
        assert_eq!(block.variable().update_count(), 0);

        block.start_transaction(TransactionKind::Write).unwrap();
        block.check_transaction().unwrap();
        block.check_transaction().unwrap();
        assert_eq!(block.variable().update_count(), 1);

        block.blocking_transaction(TransactionKind::Read).unwrap();
        assert_eq!(block.variable().update_count(), 2);
    }

    #[test]
    fn binary_op_applies_and_notifies() {
        let block = local(Value::UInt(0x0F));
        let r = block.apply_binary_op(BinaryOp::Shl, &Value::UInt(4)).unwrap();
        assert_eq!(r, Value::UInt(0xF0));
        let r = block.apply_binary_op(BinaryOp::Or, &Value::UInt(0x01)).unwrap();
        assert_eq!(r, Value::UInt(0xF1));
        assert_eq!(block.value(), Value::UInt(0xF1));
        assert_eq!(block.variable().update_count(), 2);
    }

    #[test]
    fn binary_op_errors_leave_value() {
        let block = local(Value::Int(9));
        let err = block.apply_binary_op(BinaryOp::Div, &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Value);
        assert_eq!(block.value(), Value::Int(9));
        assert_eq!(block.variable().update_count(), 0);
    }

    #[test]
    fn binary_op_runs_through_hooks() {
        let called = Arc::new(AtomicBool::new(false));
        let c = called.clone();
        let block = local(Value::Int(1)).with_set_hook(move |_| {
            c.store(true, Ordering::SeqCst);
            Ok(None)
        });
        assert_eq!(
            block.apply_binary_op(BinaryOp::Add, &Value::Int(1)).unwrap(),
            Value::Int(2)
        );
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn hook_may_reenter_block() {
        let block = Arc::new_cyclic(|weak: &std::sync::Weak<LocalBlock>| {
            let weak = weak.clone();
            local(Value::Int(0)).with_set_hook(move |_| {
                let block = weak.upgrade().ok_or("dropped")?;
                // re-entrant read while the block lock is held
                let _ = block.value();
                Ok(None)
            })
        });
        block.set(Value::Int(3)).unwrap();
        assert_eq!(block.value(), Value::Int(3));
    }

    #[test]
    fn slow_hook_does_not_hold_other_blocks() {
        let other = Arc::new(local(Value::Int(7)));
        let o = other.clone();
        let block = local(Value::Int(0)).with_set_hook(move |_| {
            // another thread must be able to use an unrelated block meanwhile
            let o = o.clone();
            let seen = std::thread::spawn(move || {
                o.set(Value::Int(8)).unwrap();
                o.get().unwrap()
            })
            .join()
            .unwrap();
            assert_eq!(seen, Value::Int(8));
            Ok(None)
        });

        block.set(Value::Int(1)).unwrap();
        assert_eq!(other.value(), Value::Int(8));
    }

    #[test]
    fn block_trait_reports_variable_metadata() {
        let block = local(Value::Bool(false));
        assert_eq!(block.path(), "Dev.Local");
        assert_eq!(block.mode(), AccessMode::ReadWrite);
        assert!(block.bulk_enabled());
    }
}
