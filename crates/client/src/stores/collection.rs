//! Entity collections and the create/update/delete rules applied to them.

use std::fmt;

use kinderlink_shared::EntityAction;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A domain object synchronized in real time.
pub trait Entity: Clone + DeserializeOwned + Send + Sync + 'static {
    type Id: PartialEq + Clone + DeserializeOwned + fmt::Debug + Send + Sync;

    fn id(&self) -> Self::Id;
}

/// Untyped documents: the id is the `id` field, falling back to `_id`.
impl Entity for Value {
    type Id = Value;

    fn id(&self) -> Value {
        self.get("id")
            .or_else(|| self.get("_id"))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

/// Either one entity or an ordered list of them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Collection<T> {
    Single(Option<T>),
    Many(Vec<T>),
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Collection::Many(Vec::new())
    }
}

impl<T: Entity> Collection<T> {
    pub fn many() -> Self {
        Collection::Many(Vec::new())
    }

    pub fn single() -> Self {
        Collection::Single(None)
    }

    /// An empty collection of the same shape.
    pub fn emptied(&self) -> Self {
        match self {
            Collection::Single(_) => Collection::single(),
            Collection::Many(_) => Collection::many(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Collection::Single(entity) => usize::from(entity.is_some()),
            Collection::Many(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            Collection::Single(entity) => entity.as_slice().iter(),
            Collection::Many(items) => items.iter(),
        }
    }

    pub fn get(&self, id: &T::Id) -> Option<&T> {
        self.iter().find(|entity| entity.id() == *id)
    }

    pub fn as_single(&self) -> Option<&T> {
        match self {
            Collection::Single(entity) => entity.as_ref(),
            Collection::Many(_) => None,
        }
    }

    pub fn as_slice(&self) -> &[T] {
        match self {
            Collection::Single(entity) => entity.as_slice(),
            Collection::Many(items) => items,
        }
    }

    pub fn created(&mut self, entity: T) {
        match self {
            Collection::Single(slot) => *slot = Some(entity),
            Collection::Many(items) => items.push(entity),
        }
    }

    /// Replace the entity with the same id. Returns whether one matched.
    pub fn updated(&mut self, entity: T) -> bool {
        let id = entity.id();
        match self {
            Collection::Single(slot) => match slot {
                Some(current) if current.id() == id => {
                    *current = entity;
                    true
                }
                _ => false,
            },
            Collection::Many(items) => match items.iter_mut().find(|item| item.id() == id) {
                Some(item) => {
                    *item = entity;
                    true
                }
                None => false,
            },
        }
    }

    /// Remove the entity with `id`. Returns whether one matched.
    pub fn deleted(&mut self, id: &T::Id) -> bool {
        match self {
            Collection::Single(slot) => {
                if slot.as_ref().is_some_and(|current| current.id() == *id) {
                    *slot = None;
                    true
                } else {
                    false
                }
            }
            Collection::Many(items) => {
                let before = items.len();
                items.retain(|item| item.id() != *id);
                items.len() != before
            }
        }
    }

    /// Apply one pushed change. Returns whether the collection changed.
    pub fn apply(&mut self, action: EntityAction, payload: &Value) -> Result<bool, serde_json::Error> {
        match action {
            EntityAction::Created => {
                self.created(T::deserialize(payload)?);
                Ok(true)
            }
            EntityAction::Updated => Ok(self.updated(T::deserialize(payload)?)),
            EntityAction::Deleted => Ok(self.deleted(&deleted_id::<T::Id>(payload)?)),
            EntityAction::Subscribe | EntityAction::Unsubscribe => Ok(false),
        }
    }

    /// Decode a subscribe snapshot: an array becomes `Many`, an object
    /// `Single`, `null` an empty collection of the current shape.
    pub fn from_snapshot(&self, data: &Value) -> Result<Self, serde_json::Error> {
        Ok(match data {
            Value::Null => self.emptied(),
            Value::Array(_) => Collection::Many(Vec::<T>::deserialize(data)?),
            _ => Collection::Single(Some(T::deserialize(data)?)),
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DeletedRef<Id> {
    Wrapped {
        #[serde(alias = "_id")]
        id: Id,
    },
    Bare(Id),
}

/// The id in a delete payload: either the bare id or `{ "id": .. }`.
pub fn deleted_id<Id: DeserializeOwned>(payload: &Value) -> Result<Id, serde_json::Error> {
    Ok(match DeletedRef::<Id>::deserialize(payload)? {
        DeletedRef::Wrapped { id } | DeletedRef::Bare(id) => id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Item {
        id: u64,
        name: String,
    }

    impl Entity for Item {
        type Id = u64;

        fn id(&self) -> u64 {
            self.id
        }
    }

    fn item(id: u64, name: &str) -> Item {
        Item {
            id,
            name: name.to_string(),
        }
    }

    #[test]
    fn sequence_scenario() {
        let mut items = Collection::Many(vec![item(1, "A")]);

        items.apply(EntityAction::Created, &json!({"id": 2, "name": "B"})).unwrap();
        assert_eq!(items, Collection::Many(vec![item(1, "A"), item(2, "B")]));

        items.apply(EntityAction::Updated, &json!({"id": 1, "name": "A2"})).unwrap();
        assert_eq!(items, Collection::Many(vec![item(1, "A2"), item(2, "B")]));

        items.apply(EntityAction::Deleted, &json!(2)).unwrap();
        assert_eq!(items, Collection::Many(vec![item(1, "A2")]));
    }

    #[test]
    fn create_update_delete_same_id() {
        let mut items: Collection<Item> = Collection::many();
        items.created(item(5, "x"));
        assert_eq!(items.get(&5), Some(&item(5, "x")));
        assert!(items.updated(item(5, "y")));
        assert_eq!(items.get(&5), Some(&item(5, "y")));
        assert!(items.deleted(&5));
        assert!(items.get(&5).is_none());
    }

    #[test]
    fn unmatched_update_and_delete_are_ignored() {
        let mut items = Collection::Many(vec![item(1, "A")]);
        assert!(!items.updated(item(9, "Z")));
        assert!(!items.deleted(&9));
        assert_eq!(items.as_slice(), &[item(1, "A")]);
    }

    #[test]
    fn single_entity_rules() {
        let mut one: Collection<Item> = Collection::single();
        one.created(item(1, "A"));
        assert_eq!(one.as_single(), Some(&item(1, "A")));

        assert!(!one.updated(item(2, "B")));
        assert_eq!(one.as_single(), Some(&item(1, "A")));
        assert!(one.updated(item(1, "A2")));

        assert!(!one.deleted(&2));
        assert!(one.deleted(&1));
        assert!(one.is_empty());

        one.created(item(3, "C"));
        one.created(item(4, "D"));
        assert_eq!(one.as_single(), Some(&item(4, "D")));
    }

    #[test]
    fn delete_payload_shapes() {
        assert_eq!(deleted_id::<u64>(&json!(7)).unwrap(), 7);
        assert_eq!(deleted_id::<u64>(&json!({"id": 7})).unwrap(), 7);
        assert_eq!(deleted_id::<String>(&json!({"_id": "abc", "by": "x"})).unwrap(), "abc");
        assert!(deleted_id::<u64>(&json!("seven")).is_err());
    }

    #[test]
    fn malformed_payload_leaves_collection_alone() {
        let mut items = Collection::Many(vec![item(1, "A")]);
        assert!(items.apply(EntityAction::Created, &json!({"name": "no id"})).is_err());
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn snapshot_shapes() {
        let many: Collection<Item> = Collection::many();
        assert_eq!(
            many.from_snapshot(&json!([{"id": 1, "name": "A"}])).unwrap(),
            Collection::Many(vec![item(1, "A")])
        );
        assert_eq!(
            many.from_snapshot(&json!({"id": 1, "name": "A"})).unwrap(),
            Collection::Single(Some(item(1, "A")))
        );
        let single: Collection<Item> = Collection::Single(Some(item(1, "A")));
        assert_eq!(single.from_snapshot(&Value::Null).unwrap(), Collection::single());
    }

    #[test]
    fn untyped_documents_use_mongo_ids() {
        let mut docs: Collection<Value> = Collection::many();
        docs.created(json!({"_id": "c1", "name": "Mia"}));
        docs.created(json!({"_id": "c2", "name": "Noah"}));
        assert!(docs.updated(json!({"_id": "c1", "name": "Mia K."})));
        assert!(docs.apply(EntityAction::Deleted, &json!({"_id": "c2"})).unwrap());
        assert_eq!(docs.as_slice(), &[json!({"_id": "c1", "name": "Mia K."})]);
    }

    #[test]
    fn serializes_as_plain_json() {
        let docs = Collection::Many(vec![json!({"id": 1})]);
        assert_eq!(serde_json::to_value(&docs).unwrap(), json!([{"id": 1}]));
        let none: Collection<Value> = Collection::single();
        assert_eq!(serde_json::to_value(&none).unwrap(), Value::Null);
    }
}
