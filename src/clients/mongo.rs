//! Target adapter for MongoDB.

use std::time::Duration;

use async_trait::async_trait;
use compare_core::{AdapterError, BusinessKey, DocumentFetch, DocumentValue};
use mongodb::bson::{doc, Document};
use mongodb::{options::ClientOptions, Client, Database};

use super::{bson_to_document, business_key_to_bson, with_retries};

#[derive(Clone)]
pub struct MongoTarget {
    database: Database,
}

impl MongoTarget {
    pub async fn connect(uri: &str, database: &str) -> anyhow::Result<Self> {
        tracing::debug!("Parsing MongoDB connection options");
        let mut options = ClientOptions::parse(uri).await?;
        // Connection timeouts to prevent hanging
        options.connect_timeout = Some(Duration::from_secs(10));
        options.server_selection_timeout = Some(Duration::from_secs(10));
        let client = Client::with_options(options)?;
        let database = client.database(database);
        tracing::info!("Connected to MongoDB database {}", database.name());
        Ok(MongoTarget { database })
    }

    pub async fn count_documents(&self, collection: &str) -> Result<u64, AdapterError> {
        let coll = self.database.collection::<Document>(collection);
        with_retries("count_documents", || {
            let coll = coll.clone();
            async move { coll.count_documents(doc! {}).await }
        })
        .await
    }
}

#[async_trait]
impl DocumentFetch for MongoTarget {
    async fn fetch(
        &self,
        collection: &str,
        business_key: &str,
        key: &BusinessKey,
    ) -> Result<Option<DocumentValue>, AdapterError> {
        let coll = self.database.collection::<Document>(collection);
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
