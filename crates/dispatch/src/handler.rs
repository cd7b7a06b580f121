//! The operation handler contract.

use crate::view::{ReadView, WriteView};
use velox_core::VeloxResult;
use velox_txn::Mode;

/// One registered operation: its declared transaction mode and its body.
///
/// Exactly one of `invoke_read`/`invoke_write` is ever called for a given
/// handler, matching its declared [`OperationHandler::mode`] — enforced by
/// the dispatcher, which only ever builds the view matching that mode.
pub trait OperationHandler: Send + Sync {
    /// The transaction mode this operation requires.
    fn mode(&self) -> Mode;

    /// Execute a `Read`-mode operation. Default panics; override when
    /// `mode()` returns `Mode::Read`.
    fn invoke_read(&self, _view: &ReadView<'_>, _args: serde_json::Value) -> VeloxResult<serde_json::Value> {
        unreachable!("dispatcher invoked invoke_read on a handler that declared a ReadWrite mode")
    }

    /// Execute a `ReadWrite`-mode operation. Default panics; override when
    /// `mode()` returns `Mode::ReadWrite`.
    fn invoke_write(&self, _view: &mut WriteView<'_>, _args: serde_json::Value) -> VeloxResult<serde_json::Value> {
        unreachable!("dispatcher invoked invoke_write on a handler that declared a Read mode")
    }
}
