//! # VeloxDB
//!
//! An in-memory, transactional, object-oriented database engine with
//! synchronous cluster replication.
//!
//! This crate is the embeddable facade: it wires together the object store
//! ([`velox_storage`]), the commit pipeline ([`velox_txn`]), the
//! write-ahead log ([`velox_wal`]), and the operation dispatcher
//! ([`velox_dispatch`]) into a single in-process handle, the way
//! `velox-server` wires the same pieces plus [`velox_endpoint`] and
//! [`velox_replication`] for networked, replicated deployment.
//!
//! # Quick start
//!
//! ```no_run
//! use veloxdb::Velox;
//! use velox_core::{ClassDescriptor, ClassId};
//! use velox_dispatch::{OperationHandler, ReadView};
//! use velox_txn::Mode;
//! use std::sync::Arc;
//!
//! struct Ping;
//! impl OperationHandler for Ping {
//!     fn mode(&self) -> Mode {
//!         Mode::Read
//!     }
//!     fn invoke_read(&self, _view: &ReadView<'_>, args: serde_json::Value) -> velox_core::VeloxResult<serde_json::Value> {
//!         Ok(args)
//!     }
//! }
//!
//! fn main() -> velox_core::VeloxResult<()> {
//!     let db = Velox::open("./my-data")?;
//!     db.register_class(ClassDescriptor {
//!         class_id: ClassId(1),
//!         name: "Note".into(),
//!         properties: vec![],
//!         references: vec![],
//!     });
//!     db.register_operation("NoteApi", "Ping", Arc::new(Ping));
//!     db.invoke("NoteApi", "Ping", serde_json::json!({"hello": "world"}))?;
//!     Ok(())
//! }
//! ```
//!
//! Embedding does not by itself join a replication cluster; build a
//! `velox-server` process (or call [`Velox::with_replication`]) for that.

pub use velox_core::{
    Cardinality, ClassDescriptor, ClassId, Csn, Lsn, Object, ObjectId, ObjectStore, ObjectVersion,
    OnDelete, PropertyDescriptor, PropertyType, ReferenceDescriptor, Timestamp, Value, VeloxError,
    VeloxResult,
};
pub use velox_dispatch::{Dispatcher, OperationHandler, OperationRegistry, ReadView, WriteView};
pub use velox_storage::Heap;
pub use velox_txn::{Mode, TransactionManager};
pub use velox_wal::ReplicationSink;

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An open, in-process VeloxDB database.
///
/// Owns the object heap, schema registry, commit pipeline, and a WAL writer
/// rooted at the directory passed to [`Velox::open`]. Operations are
/// registered per `(apiName, operationName)` and invoked by name, each
/// running in its own transaction.
pub struct Velox {
    db_root: PathBuf,
    heap: Arc<Heap>,
    schema: Arc<velox_core::SchemaRegistry>,
    registry: Arc<OperationRegistry>,
    dispatcher: Dispatcher,
}

impl Velox {
    /// Open (or create) a database rooted at `db_root`, replaying its WAL
    /// if one exists.
    ///
    /// `db_root/schema/classes.json` is loaded if present; otherwise the
    /// database starts with an empty schema and classes must be registered
    /// with [`Velox::register_class`] before use. No replication is
    /// configured; use [`Velox::with_replication`] to join a cluster.
    pub fn open(db_root: impl AsRef<Path>) -> VeloxResult<Self> {
        Self::with_replication(db_root, None)
    }

    /// Open a database and ship every commit through `replication`.
    /// Pass `None` for a standalone, unreplicated engine (what
    /// [`Velox::open`] does).
    pub fn with_replication(
        db_root: impl AsRef<Path>,
        replication: Option<Arc<dyn ReplicationSink>>,
    ) -> VeloxResult<Self> {
        let db_root = db_root.as_ref().to_path_buf();
        let wal_dir = db_root.join("wal");

        let schema = load_schema(&db_root)?;

        let recovery = velox_wal::recover(&wal_dir).map_err(wal_to_velox_error)?;

        let next_object_id = recovery
            .records
            .iter()
            .flat_map(|r| r.mutations.iter())
            .map(|m| match m {
                velox_wal::MutationEntry::Created { object_id, .. } => *object_id,
                velox_wal::MutationEntry::Updated { object_id, .. } => *object_id,
                velox_wal::MutationEntry::Deleted { object_id } => *object_id,
            })
            .max_by_key(|id| id.0)
            .map(|id| id.0 + 1)
            .unwrap_or(1);
        let heap = Arc::new(Heap::new(next_object_id));

        let last_csn = velox_txn::replay(&recovery.records, &heap)?;

        let wal =
            velox_wal::WalWriter::open(&wal_dir, *b"velox-database-0").map_err(wal_to_velox_error)?;

        let txn_manager = Arc::new(TransactionManager::new(
            Arc::clone(&schema),
            last_csn.0,
            Some(wal),
            replication,
        ));

        let registry = Arc::new(OperationRegistry::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            txn_manager,
            Arc::clone(&heap),
            Arc::clone(&schema),
        );

        Ok(Self {
            db_root,
            heap,
            schema,
            registry,
            dispatcher,
        })
    }

    /// The database's root directory.
    pub fn db_root(&self) -> &Path {
        &self.db_root
    }

    /// Register (or replace) a class descriptor.
    ///
    /// Does not persist to `schema/classes.json`; schema authoring tooling
    /// owns that file.
    pub fn register_class(&self, class: ClassDescriptor) {
        self.schema.register(class);
    }

    /// Register (or replace) the handler for `(api_name, op_name)`.
    pub fn register_operation(
        &self,
        api_name: impl Into<String>,
        op_name: impl Into<String>,
        handler: Arc<dyn OperationHandler>,
    ) {
        self.registry.register(api_name, op_name, handler);
    }

    /// Run `api_name.op_name` against `args` in its own transaction.
    pub fn invoke(
        &self,
        api_name: &str,
        op_name: &str,
        args: serde_json::Value,
    ) -> VeloxResult<serde_json::Value> {
        self.dispatcher.invoke(api_name, op_name, args)
    }

    /// Direct access to the object heap, for embedders that need to read
    /// objects outside of a registered operation (e.g. diagnostics).
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Reclaim version-chain history no currently open transaction can
    /// still observe. `velox-server` runs this on a timer; an embedder
    /// without a background loop should call it periodically itself.
    ///
    /// Returns the number of versions reclaimed.
    pub fn collect_garbage(&self) -> usize {
        self.dispatcher.collect_garbage()
    }
}

fn load_schema(db_root: &Path) -> VeloxResult<Arc<velox_core::SchemaRegistry>> {
    let path = db_root.join("schema").join("classes.json");
    let registry = velox_core::SchemaRegistry::new();
    if !path.exists() {
        return Ok(Arc::new(registry));
    }
    let text = std::fs::read_to_string(&path).map_err(VeloxError::Io)?;
    let classes: Vec<ClassDescriptor> = serde_json::from_str(&text)
        .map_err(|e| VeloxError::Serialization(format!("{}: {e}", path.display())))?;
    for class in classes {
        registry.register(class);
    }
    Ok(Arc::new(registry))
}

fn wal_to_velox_error(e: velox_wal::WalError) -> VeloxError {
    VeloxError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}
