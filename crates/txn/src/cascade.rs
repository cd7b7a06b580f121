//! Cascade delete and reference-integrity resolution.
//!
//! Per Design Note "Cascade semantics": implemented as an explicit BFS over
//! an indexed worklist, not recursive call chains, so the traversal depth
//! is bounded by object-graph size rather than call-stack depth.

use crate::transaction::Transaction;
use std::collections::{HashSet, VecDeque};
use velox_core::{Cardinality, OnDelete, ReferenceValue, SchemaRegistry, VeloxError, VeloxResult};
use velox_storage::Heap;

/// Walk the deletion worklist, expanding it with `CascadeDelete` targets and
/// rewriting `SetNull` sources, failing if a `Block` edge remains.
///
/// Mutates `txn` in place: additional objects are staged for deletion, and
/// `SetNull` sources get a rewritten reference slot staged as an update.
pub fn resolve(txn: &mut Transaction, heap: &Heap, schema: &SchemaRegistry) -> VeloxResult<()> {
    let mut worklist: VecDeque<_> = txn.deleted_ids().iter().copied().collect();
    let mut visited: HashSet<_> = worklist.iter().copied().collect();
    let mut additional_deletes = Vec::new();

    while let Some(target) = worklist.pop_front() {
        let Some(target_version) = txn.get(heap, target)? else {
            continue;
        };
        let Some(class) = schema.get(target_version.class_id) else {
            continue;
        };

        for (slot_index, reference) in class.references.iter().enumerate() {
            if !reference.indexed {
                continue;
            }
            let sources = heap
                .inverse_index()
                .members_at(target, slot_index, txn.snapshot_csn());
            for source in sources {
                if txn.deleted_ids().contains(&source) {
                    continue;
                }
                match reference.on_delete {
                    OnDelete::Block => {
                        return Err(VeloxError::IntegrityError(format!(
                            "cannot delete object {}: blocked by live reference from {}",
                            target.0, source.0
                        )));
                    }
                    OnDelete::CascadeDelete => {
                        if visited.insert(source) {
                            worklist.push_back(source);
                            additional_deletes.push(source);
                        }
                    }
                    OnDelete::SetNull => {
                        if reference.cardinality != Cardinality::One {
                            return Err(VeloxError::IntegrityError(format!(
                                "SetNull on non-one cardinality slot {}",
                                reference.name
                            )));
                        }
                        if !txn.write_set().contains_key(&source) {
                            if let Some(current) = txn.get(heap, source)? {
                                txn.stage_update(source, current)?;
                            }
                        }
                        txn.set_null(source, &reference.name);
                    }
                }
            }
        }
    }

    for id in additional_deletes {
        txn.stage_delete(id)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Mode;
    use std::collections::HashMap;
    use velox_core::{ClassId, ClassDescriptor, Csn, ObjectStore, ObjectVersion, PropertyType, ReferenceDescriptor};

    fn register_blog_and_post(schema: &SchemaRegistry) {
        schema.register(ClassDescriptor {
            class_id: ClassId(1),
            name: "Blog".into(),
            properties: vec![],
            references: vec![ReferenceDescriptor {
                name: "Posts".into(),
                target_class: ClassId(2),
                cardinality: Cardinality::Many,
                on_delete: OnDelete::CascadeDelete,
                indexed: true,
            }],
        });
        schema.register(ClassDescriptor {
            class_id: ClassId(2),
            name: "Post".into(),
            properties: vec![],
            references: vec![ReferenceDescriptor {
                name: "Blog".into(),
                target_class: ClassId(1),
                cardinality: Cardinality::One,
                on_delete: OnDelete::Block,
                indexed: false,
            }],
        });
    }

    fn version(class_id: ClassId) -> ObjectVersion {
        ObjectVersion {
            class_id,
            properties: HashMap::new(),
            references: HashMap::new(),
            create_csn: Csn(1),
            tombstone_csn: None,
        }
    }

    #[test]
    fn cascade_delete_pulls_in_referencing_children() {
        let heap = Heap::new(1);
        let schema = SchemaRegistry::new();
        register_blog_and_post(&schema);

        let blog = heap.allocate(ClassId(1));
        let post = heap.allocate(ClassId(2));
        heap.write_version(blog, version(ClassId(1)), Csn(1)).unwrap();
        heap.write_version(post, version(ClassId(2)), Csn(1)).unwrap();
        heap.inverse_index().insert(blog, 0, post, Csn(1));

        let mut txn = Transaction::begin(Mode::ReadWrite, Csn(1));
        txn.stage_delete(blog).unwrap();

        resolve(&mut txn, &heap, &schema).unwrap();

        assert!(txn.deleted_ids().contains(&blog));
        assert!(txn.deleted_ids().contains(&post));
    }

    #[test]
    fn block_policy_rejects_deletion_while_reference_remains() {
        let heap = Heap::new(1);
        let schema = SchemaRegistry::new();
        schema.register(ClassDescriptor {
            class_id: ClassId(3),
            name: "Owner".into(),
            properties: vec![],
            references: vec![ReferenceDescriptor {
                name: "Items".into(),
                target_class: ClassId(4),
                cardinality: Cardinality::Many,
                on_delete: OnDelete::Block,
                indexed: true,
            }],
        });

        let owner = heap.allocate(ClassId(3));
        let item = heap.allocate(ClassId(4));
        heap.write_version(owner, version(ClassId(3)), Csn(1)).unwrap();
        heap.inverse_index().insert(owner, 0, item, Csn(1));

        let mut txn = Transaction::begin(Mode::ReadWrite, Csn(1));
        txn.stage_delete(owner).unwrap();

        let result = resolve(&mut txn, &heap, &schema);
        assert!(matches!(result, Err(VeloxError::IntegrityError(_))));
    }

    #[test]
    fn set_null_rewrites_source_slot_instead_of_deleting_it() {
        let heap = Heap::new(1);
        let schema = SchemaRegistry::new();
        schema.register(ClassDescriptor {
            class_id: ClassId(5),
            name: "Category".into(),
            properties: vec![],
            references: vec![ReferenceDescriptor {
                name: "Items".into(),
                target_class: ClassId(6),
                cardinality: Cardinality::Many,
                on_delete: OnDelete::SetNull,
                indexed: true,
            }],
        });

        let category = heap.allocate(ClassId(5));
        let item = heap.allocate(ClassId(6));
        heap.write_version(category, version(ClassId(5)), Csn(1)).unwrap();
        let mut item_version = version(ClassId(6));
        item_version
            .references
            .insert("Category".into(), ReferenceValue::Single(category));
        heap.write_version(item, item_version, Csn(1)).unwrap();
        heap.inverse_index().insert(category, 0, item, Csn(1));

        let mut txn = Transaction::begin(Mode::ReadWrite, Csn(1));
        txn.stage_update(item, heap.read(item, Csn(1)).unwrap().unwrap())
            .unwrap();
        txn.stage_delete(category).unwrap();

        resolve(&mut txn, &heap, &schema).unwrap();

        assert!(!txn.deleted_ids().contains(&item));
        let updated = txn.write_set().get(&item).unwrap();
        assert_eq!(
            updated.references.get("Category"),
            Some(&ReferenceValue::Null)
        );
    }
}
