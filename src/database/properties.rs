// database/properties.rs
use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, Bson, Document},
    Collection, Database,
};
use tokio::sync::RwLock;

use crate::errors::Result;

pub const PROPERTIES_COLLECTION: &str = "properties";

/// Read-only view of property ownership owned by the listings service.
#[async_trait]
pub trait PropertyDirectory: Send + Sync {
    /// `None` when the property does not exist.
    async fn owner_of(&self, property_id: &str) -> Result<Option<String>>;

    async fn owned_by(&self, user_id: &str) -> Result<Vec<String>>;
}

#[derive(Default)]
pub struct InMemoryPropertyDirectory {
    owners: RwLock<HashMap<String, String>>,
}

impl InMemoryPropertyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, property_id: impl Into<String>, owner_id: impl Into<String>) {
        self.owners
            .write()
            .await
            .insert(property_id.into(), owner_id.into());
    }
}

#[async_trait]
impl PropertyDirectory for InMemoryPropertyDirectory {
    async fn owner_of(&self, property_id: &str) -> Result<Option<String>> {
        Ok(self.owners.read().await.get(property_id).cloned())
    }

    async fn owned_by(&self, user_id: &str) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .owners
            .read()
            .await
            .iter()
            .filter(|(_, owner)| owner.as_str() == user_id)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[derive(Clone)]
pub struct MongoPropertyDirectory {
    collection: Collection<Document>,
}

impl MongoPropertyDirectory {
    pub fn new(db: &Database) -> Self {
        MongoPropertyDirectory {
            collection: db.collection(PROPERTIES_COLLECTION),
        }
    }
}

/// Listing ids may be ObjectIds or plain strings depending on who wrote them.
fn id_candidates(id: &str) -> Vec<Bson> {
    let mut candidates = vec![Bson::String(id.to_string())];
    if let Ok(oid) = ObjectId::parse_str(id) {
        candidates.push(Bson::ObjectId(oid));
    }
    candidates
}

fn bson_id_to_string(value: &Bson) -> Option<String> {
    match value {
        Bson::String(s) => Some(s.clone()),
        Bson::ObjectId(oid) => Some(oid.to_hex()),
        Bson::Int32(i) => Some(i.to_string()),
        Bson::Int64(i) => Some(i.to_string()),
        _ => None,
    }
}

#[async_trait]
impl PropertyDirectory for MongoPropertyDirectory {
    async fn owner_of(&self, property_id: &str) -> Result<Option<String>> {
        let mut candidates = id_candidates(property_id);
        if let Ok(n) = property_id.parse::<i64>() {
            candidates.push(Bson::Int64(n));
            if let Ok(small) = i32::try_from(n) {
                candidates.push(Bson::Int32(small));
            }
        }

        let property = self
            .collection
            .find_one(doc! { "_id": { "$in": candidates } })
            .await?;

        Ok(property.and_then(|p| p.get("owner_id").and_then(bson_id_to_string)))
    }

    async fn owned_by(&self, user_id: &str) -> Result<Vec<String>> {
        let cursor = self
            .collection
            .find(doc! { "owner_id": { "$in": id_candidates(user_id) } })
            .projection(doc! { "_id": 1 })
            .await?;
        let properties: Vec<Document> = cursor.try_collect().await?;

        Ok(properties
            .iter()
            .filter_map(|p| p.get("_id").and_then(bson_id_to_string))
            .collect())
    }
}
