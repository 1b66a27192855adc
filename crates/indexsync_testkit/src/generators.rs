//! Property-based test generators using proptest.
//!
//! Mutation scripts draw ids from a small key space so that saves,
//! updates and deletes of the same entity interleave.

use crate::fixtures::{page, page_type};
use indexsync_core::{
    EntityId, EntityType, IndexOperation, MemoryEntityStore, OperationKind, SequenceNumber, SiteId,
};
use proptest::prelude::*;

/// Strategy for generating valid entity IDs.
pub fn entity_id_strategy() -> impl Strategy<Value = EntityId> {
    prop_oneof![
        (1..u64::MAX).prop_map(EntityId::Int),
        (1..u128::MAX).prop_map(|n| EntityId::Uuid(uuid::Uuid::from_u128(n))),
    ]
}

/// Strategy for generating valid entity type names.
pub fn entity_type_strategy() -> impl Strategy<Value = EntityType> {
    prop::string::string_regex("[a-z][a-z_]{0,15}")
        .expect("Invalid regex")
        .prop_map(EntityType::new)
}

/// Strategy for generating operation kinds.
pub fn operation_kind_strategy() -> impl Strategy<Value = OperationKind> {
    prop_oneof![
        Just(OperationKind::Insert),
        Just(OperationKind::Update),
        Just(OperationKind::Delete),
    ]
}

/// Strategy for generating valid index operations.
pub fn operation_strategy() -> impl Strategy<Value = IndexOperation> {
    (
        operation_kind_strategy(),
        entity_type_strategy(),
        entity_id_strategy(),
        prop::option::of(any::<u32>()),
        any::<u64>(),
        prop::option::of(prop::collection::vec(any::<u8>(), 0..64)),
    )
        .prop_map(|(kind, entity_type, entity_id, site, sequence, payload)| {
            let mut op = IndexOperation::new(kind, entity_type, entity_id)
                .with_sequence(SequenceNumber::new(sequence));
            if let Some(site) = site {
                op = op.with_site(SiteId::new(site));
            }
            if let Some(payload) = payload {
                op = op.with_payload(payload);
            }
            op
        })
}

/// One step of a mutation script against a page store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Create or replace page `id` with a title.
    Save(u64, String),
    /// Delete page `id` if it exists.
    Delete(u64),
}

/// Strategy for generating mutation scripts over ids `1..=ids`.
pub fn mutations_strategy(ids: u64, max_len: usize) -> impl Strategy<Value = Vec<Mutation>> {
    let ids = ids.max(1);
    let step = prop_oneof![
        3 => (1..=ids, "[a-z]{1,8}").prop_map(|(id, title)| Mutation::Save(id, title)),
        1 => (1..=ids).prop_map(Mutation::Delete),
    ];
    prop::collection::vec(step, 1..=max_len.max(1))
}

/// Applies a mutation to the store and returns the committed operations.
pub fn apply_mutation(store: &MemoryEntityStore, mutation: &Mutation) -> Vec<IndexOperation> {
    match mutation {
        Mutation::Save(id, title) => store
            .save(page(*id, title))
            .map(|op| vec![op])
            .unwrap_or_default(),
        Mutation::Delete(id) => store
            .delete(&page_type(), &EntityId::Int(*id))
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_operations_are_valid(op in operation_strategy()) {
            prop_assert!(op.validate().is_ok());
        }

        #[test]
        fn mutation_scripts_commit_in_sequence(script in mutations_strategy(4, 20)) {
            let store = MemoryEntityStore::new();
            let mut last = SequenceNumber::UNSEQUENCED;
            for mutation in &script {
                for op in apply_mutation(&store, mutation) {
                    prop_assert!(op.sequence > last);
                    last = op.sequence;
                }
            }
        }
    }
}
