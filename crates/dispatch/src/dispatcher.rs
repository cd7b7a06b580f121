//! `invoke`: the single seam that opens a transaction, runs a handler, and
//! commits or aborts based on its result.

use crate::registry::OperationRegistry;
use crate::view::{ReadView, WriteView};
use std::sync::Arc;
use tracing::{debug, warn};
use velox_core::{SchemaRegistry, VeloxError, VeloxResult};
use velox_storage::Heap;
use velox_txn::{Mode, TransactionManager};

/// Opens exactly one transaction per call, in the handler's declared mode,
/// and commits or aborts it before returning: a handler may not span
/// transactions, structurally enforced here by never handing the
/// `Transaction` itself to the caller.
pub struct Dispatcher {
    registry: Arc<OperationRegistry>,
    txn_manager: Arc<TransactionManager>,
    heap: Arc<Heap>,
    schema: Arc<SchemaRegistry>,
}

impl Dispatcher {
    /// Build a dispatcher over a registry, the shared heap, and schema.
    /// WAL durability and replication are owned by `txn_manager` itself, so
    /// group commit can batch many callers' flushes without any one caller
    /// holding a WAL lock across the others' waits.
    pub fn new(
        registry: Arc<OperationRegistry>,
        txn_manager: Arc<TransactionManager>,
        heap: Arc<Heap>,
        schema: Arc<SchemaRegistry>,
    ) -> Self {
        Self {
            registry,
            txn_manager,
            heap,
            schema,
        }
    }

    /// Run `apiName.opName` against `args`, returning the handler's result
    /// or a typed [`VeloxError`].
    pub fn invoke(
        &self,
        api_name: &str,
        op_name: &str,
        args: serde_json::Value,
    ) -> VeloxResult<serde_json::Value> {
        let handler = self
            .registry
            .get(api_name, op_name)
            .ok_or_else(|| VeloxError::operation_unknown(api_name, op_name))?;

        debug!(api_name, op_name, "dispatching operation");
        tracing::info!(target: "user", api_name, op_name, "operation invoked");

        match handler.mode() {
            Mode::Read => {
                let txn = self.txn_manager.begin(Mode::Read);
                let _snapshot = self.txn_manager.register_active_snapshot(txn.snapshot_csn());
                let view = ReadView::new(&txn, &self.heap, &self.schema);
                handler.invoke_read(&view, args)
            }
            Mode::ReadWrite => {
                let mut txn = self.txn_manager.begin(Mode::ReadWrite);
                let _snapshot = self.txn_manager.register_active_snapshot(txn.snapshot_csn());
                let outcome = {
                    let mut view = WriteView::new(&mut txn, &self.heap, &self.schema);
                    handler.invoke_write(&mut view, args)
                };
                match outcome {
                    Ok(result) => {
                        self.txn_manager.commit(txn, &self.heap)?;
                        Ok(result)
                    }
                    Err(e) => {
                        warn!(api_name, op_name, error = %e, "operation failed, aborting transaction");
                        self.txn_manager.abort(txn);
                        Err(e)
                    }
                }
            }
        }
    }

    /// Reclaim version-chain history no currently registered snapshot can
    /// still observe. Returns the number of versions reclaimed.
    ///
    /// Safe to call concurrently with `invoke`: the watermark is read from
    /// the same registry `invoke` pins snapshots into, so a version is only
    /// ever reclaimed after every transaction that could read it has ended.
    pub fn collect_garbage(&self) -> usize {
        let watermark = self.txn_manager.oldest_active_snapshot();
        self.heap.gc(watermark)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::OperationHandler;
    use std::collections::HashMap;
    use velox_core::{ClassDescriptor, ClassId, ObjectStore};

    struct CreateBlog;
    impl OperationHandler for CreateBlog {
        fn mode(&self) -> Mode {
            Mode::ReadWrite
        }
        fn invoke_write(
            &self,
            view: &mut WriteView<'_>,
            _args: serde_json::Value,
        ) -> VeloxResult<serde_json::Value> {
            let id = view.create(ClassId(1), HashMap::new(), HashMap::new())?;
            Ok(serde_json::json!({ "objectId": id.0 }))
        }
    }

    struct FailingWrite;
    impl OperationHandler for FailingWrite {
        fn mode(&self) -> Mode {
            Mode::ReadWrite
        }
        fn invoke_write(
            &self,
            _view: &mut WriteView<'_>,
            _args: serde_json::Value,
        ) -> VeloxResult<serde_json::Value> {
            Err(VeloxError::ArgumentError("always fails".into()))
        }
    }

    fn setup() -> Dispatcher {
        let schema = Arc::new(SchemaRegistry::new());
        schema.register(ClassDescriptor {
            class_id: ClassId(1),
            name: "Blog".into(),
            properties: vec![],
            references: vec![],
        });
        let heap = Arc::new(Heap::new(1));
        let txn_manager = Arc::new(TransactionManager::new(Arc::clone(&schema), 0, None, None));
        let registry = Arc::new(OperationRegistry::new());
        registry.register("BlogApi", "CreateBlog", Arc::new(CreateBlog));
        registry.register("BlogApi", "FailingWrite", Arc::new(FailingWrite));
        Dispatcher::new(registry, txn_manager, heap, schema)
    }

    #[test]
    fn successful_write_commits_and_is_visible_afterward() {
        let dispatcher = setup();
        let result = dispatcher
            .invoke("BlogApi", "CreateBlog", serde_json::json!({}))
            .unwrap();
        let object_id = result["objectId"].as_u64().unwrap();
        assert!(dispatcher.heap.read(velox_core::ObjectId(object_id), velox_core::Csn::MAX).unwrap().is_some());
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let dispatcher = setup();
        let err = dispatcher.invoke("BlogApi", "NoSuchOp", serde_json::json!({}));
        assert!(matches!(err, Err(VeloxError::OperationUnknown { .. })));
    }

    #[test]
    fn failing_handler_aborts_without_installing_anything() {
        let dispatcher = setup();
        let err = dispatcher.invoke("BlogApi", "FailingWrite", serde_json::json!({}));
        assert!(err.is_err());
    }
}
