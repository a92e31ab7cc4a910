//! Source adapter for Azure Cosmos DB's Mongo API.

use std::time::Duration;

use async_trait::async_trait;
use compare_core::{AdapterError, BusinessKey, DocumentFetch, DocumentValue, KeySource};
use futures::stream::BoxStream;
use futures::StreamExt;
use mongodb::bson::{doc, Document};
use mongodb::{options::ClientOptions, Client, Database};

use super::{
    bson_to_business_key, bson_to_document, business_key_to_bson, classify, extract_field,
    with_retries,
};

/// Cursor batch size for the key scan. The scan is projection-only, so large
/// batches keep round trips down without much memory.
const KEY_SCAN_BATCH_SIZE: u32 = 10_000;

#[derive(Clone)]
pub struct CosmosSource {
    database: Database,
}

impl CosmosSource {
    pub async fn connect(uri: &str, database: &str) -> anyhow::Result<Self> {
        tracing::debug!("Parsing Cosmos connection options");
        let mut options = ClientOptions::parse(uri).await?;
        // Connection timeouts to prevent hanging
        options.connect_timeout = Some(Duration::from_secs(10));
        options.server_selection_timeout = Some(Duration::from_secs(10));
        let client = Client::with_options(options)?;
        let database = client.database(database);
        tracing::info!("Connected to Cosmos database {}", database.name());
        Ok(CosmosSource { database })
    }

    /// Collection names in the source database, sorted for a stable run order.
    pub async fn list_collections(&self) -> anyhow::Result<Vec<String>> {
        let mut names = self.database.list_collection_names().await?;
        names.sort();
        Ok(names)
    }

    fn collection(&self, name: &str) -> mongodb::Collection<Document> {
        self.database.collection::<Document>(name)
    }

    fn key_projection(business_key: &str) -> Document {
        if business_key == "_id" {
            doc! { "_id": 1 }
        } else {
            doc! { business_key: 1, "_id": 0 }
        }
    }
}

#[async_trait]
impl KeySource for CosmosSource {
    async fn estimate_size(&self, collection: &str) -> Result<u64, AdapterError> {
        let coll = self.collection(collection);
        with_retries("count_documents", || {
            let coll = coll.clone();
            async move { coll.count_documents(doc! {}).await }
        })
        .await
    }

    async fn keys(
        &self,
        collection: &str,
        business_key: &str,
    ) -> Result<BoxStream<'static, Result<BusinessKey, AdapterError>>, AdapterError> {
        let coll = self.collection(collection);
        let filter = doc! { business_key: { "$exists": true } };
        let cursor = coll
            .find(filter)
            .projection(Self::key_projection(business_key))
            .batch_size(KEY_SCAN_BATCH_SIZE)
            .await
            .map_err(classify)?;
        let field = business_key.to_string();
        let stream = cursor.filter_map(move |item| {
            let field = field.clone();
            async move {
                match item {
                    Ok(doc) => extract_field(&doc, &field)
                        .and_then(bson_to_business_key)
                        .map(Ok),
                    Err(e) => Some(Err(classify(e))),
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn sample_fast(
        &self,
        collection: &str,
        business_key: &str,
        size: u64,
    ) -> Result<Vec<BusinessKey>, AdapterError> {
        let coll = self.collection(collection);
        let pipeline = vec![
            doc! { "$match": { business_key: { "$exists": true } } },
            doc! { "$sample": { "size": size as i64 } },
            doc! { "$project": Self::key_projection(business_key) },
        ];
        let mut cursor = coll.aggregate(pipeline).await.map_err(classify)?;
        let mut keys = Vec::new();
        while let Some(item) = cursor.next().await {
            let doc = item.map_err(classify)?;
            if let Some(key) = extract_field(&doc, business_key).and_then(bson_to_business_key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl DocumentFetch for CosmosSource {
    async fn fetch(
        &self,
        collection: &str,
        business_key: &str,
        key: &BusinessKey,
    ) -> Result<Option<DocumentValue>, AdapterError> {
        let coll = self.collection(collection);
        let filter = doc! { business_key: business_key_to_bson(key)? };
        let found = with_retries("find_one", || {
            let coll = coll.clone();
            let filter = filter.clone();
            async move { coll.find_one(filter).await }
        })
        .await?;
        Ok(found.map(bson_to_document))
    }
}
