//! Loads the `schema/` directory under `SystemDatabasePath` into a
//! [`SchemaRegistry`] at startup.
//!
//! Schema/DTO authoring tooling lives outside this process; this module
//! only reads the serialized descriptors that tooling produces.

use std::path::Path;
use std::sync::Arc;
use velox_core::{ClassDescriptor, SchemaRegistry, VeloxError, VeloxResult};

const CLASSES_FILE: &str = "classes.json";

/// Load class descriptors from `db_root/schema/classes.json`, or return an
/// empty registry if the directory or file is absent (a fresh database).
pub fn load(db_root: &Path) -> VeloxResult<Arc<SchemaRegistry>> {
    let path = db_root.join("schema").join(CLASSES_FILE);
    let registry = SchemaRegistry::new();
    if !path.exists() {
        return Ok(Arc::new(registry));
    }
    let text = std::fs::read_to_string(&path)?;
    let classes: Vec<ClassDescriptor> = serde_json::from_str(&text)
        .map_err(|e| VeloxError::Serialization(format!("{}: {e}", path.display())))?;
    for class in classes {
        registry.register(class);
    }
    Ok(Arc::new(registry))
}
