//! In-memory entity store, one ordered list of JSON documents per type.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tokio::sync::RwLock;

#[derive(Default)]
struct Table {
    rows: Vec<Value>,
    next_id: u64,
}

#[derive(Default)]
pub struct EntityStore {
    tables: RwLock<HashMap<String, Table>>,
}

/// Does the document's `id` equal the path segment `id`?
///
/// Numbers and strings compare by their text, so `/child/7` finds `{"id": 7}`.
pub fn id_matches(entity: &Value, id: &str) -> bool {
    match entity.get("id") {
        Some(Value::String(s)) => s == id,
        Some(Value::Number(n)) => n.to_string() == id,
        _ => false,
    }
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every document of `entity_type`, in insertion order.
    pub async fn list(&self, entity_type: &str) -> Vec<Value> {
        self.tables
            .read()
            .await
            .get(entity_type)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub async fn get(&self, entity_type: &str, id: &str) -> Option<Value> {
        let tables = self.tables.read().await;
        tables
            .get(entity_type)?
            .rows
            .iter()
            .find(|row| id_matches(row, id))
            .cloned()
    }

    /// Insert `fields`, assigning the next numeric id when none is given.
    /// Returns `None` if a document with the given id already exists.
    pub async fn insert(&self, entity_type: &str, mut fields: Map<String, Value>) -> Option<Value> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(entity_type.to_string()).or_default();

        match fields.get("id").filter(|id| !id.is_null()).cloned() {
            None => {
                table.next_id += 1;
                fields.insert("id".to_string(), Value::from(table.next_id));
            }
            Some(given) => {
                if table.rows.iter().any(|row| row.get("id") == Some(&given)) {
                    return None;
                }
                if let Some(n) = given.as_u64() {
                    table.next_id = table.next_id.max(n);
                }
            }
        }

        let entity = Value::Object(fields);
        table.rows.push(entity.clone());
        Some(entity)
    }

    /// Merge `fields` into the document with `id`. The id itself is kept.
    pub async fn update(
        &self,
        entity_type: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Option<Value> {
        let mut tables = self.tables.write().await;
        let row = tables
            .get_mut(entity_type)?
            .rows
            .iter_mut()
            .find(|row| id_matches(row, id))?;
        let Value::Object(current) = row else {
            return None;
        };
        for (key, value) in fields {
            if key != "id" {
                current.insert(key, value);
            }
        }
        Some(row.clone())
    }

    /// Remove and return the document with `id`.
    pub async fn remove(&self, entity_type: &str, id: &str) -> Option<Value> {
        let mut tables = self.tables.write().await;
        let rows = &mut tables.get_mut(entity_type)?.rows;
        let index = rows.iter().position(|row| id_matches(row, id))?;
        Some(rows.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn assigns_sequential_ids_per_type() {
        let store = EntityStore::new();
        let a = store.insert("child", fields(json!({"name": "Mia"}))).await.unwrap();
        let b = store.insert("child", fields(json!({"name": "Ben"}))).await.unwrap();
        let g = store.insert("group", fields(json!({"name": "Bears"}))).await.unwrap();
        assert_eq!(a["id"], 1);
        assert_eq!(b["id"], 2);
        assert_eq!(g["id"], 1);
        assert_eq!(store.list("child").await.len(), 2);
    }

    #[tokio::test]
    async fn explicit_ids_are_unique() {
        let store = EntityStore::new();
        assert!(store.insert("group", fields(json!({"id": "bears"}))).await.is_some());
        assert!(store.insert("group", fields(json!({"id": "bears"}))).await.is_none());
        store.insert("child", fields(json!({"id": 10}))).await.unwrap();
        let next = store.insert("child", fields(json!({}))).await.unwrap();
        assert_eq!(next["id"], 11);
    }

    #[tokio::test]
    async fn update_merges_and_keeps_id() {
        let store = EntityStore::new();
        store.insert("child", fields(json!({"name": "Mia", "group": 1}))).await;
        let updated = store
            .update("child", "1", fields(json!({"id": 99, "group": 2})))
            .await
            .unwrap();
        assert_eq!(updated, json!({"id": 1, "name": "Mia", "group": 2}));
        assert!(store.update("child", "2", Map::new()).await.is_none());
    }

    #[tokio::test]
    async fn remove_by_string_or_number_id() {
        let store = EntityStore::new();
        store.insert("child", fields(json!({"name": "Mia"}))).await;
        store.insert("group", fields(json!({"id": "bears"}))).await;
        assert_eq!(store.remove("child", "1").await.unwrap()["name"], "Mia");
        assert!(store.remove("group", "bears").await.is_some());
        assert!(store.remove("group", "bears").await.is_none());
        assert!(store.get("child", "1").await.is_none());
    }
}
