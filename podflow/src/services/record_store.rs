//! PostgREST-style record store.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use tracing::debug;

use super::{check_status, RecordStore};
use crate::config::PodflowConfig;
use crate::errors::ServiceError;

/// Record store speaking the PostgREST protocol (`/rest/v1/{table}`).
#[derive(Debug, Clone)]
pub struct PostgrestRecordStore {
    client: Client,
    config: Arc<PodflowConfig>,
}

impl PostgrestRecordStore {
    /// Creates a store from a shared client and config.
    #[must_use]
    pub fn new(client: Client, config: Arc<PodflowConfig>) -> Self {
        Self { client, config }
    }

    fn table_url(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            PodflowConfig::base(&self.config.record_store_url),
            self.config.record_table
        )
    }

    fn key_filter(&self, key: &str) -> [(String, String); 1] {
        [(self.config.record_key_column.clone(), format!("eq.{key}"))]
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.config.record_store_key)
            .bearer_auth(&self.config.record_store_key)
            .timeout(self.config.request_timeout())
    }
}

#[async_trait]
impl RecordStore for PostgrestRecordStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<serde_json::Value>, ServiceError> {
        let response = self
            .authed(self.client.get(self.table_url()))
            .query(&self.key_filter(key))
            .query(&[("select", "*"), ("limit", "1")])
            .send()
            .await?;
        let rows: Vec<serde_json::Value> = check_status(response).await?.json().await?;
        debug!(key, found = !rows.is_empty(), "Record lookup");
        Ok(rows.into_iter().next())
    }

    async fn insert(&self, record: &serde_json::Map<String, serde_json::Value>) -> Result<(), ServiceError> {
        let response = self
            .authed(self.client.post(self.table_url()))
            .header("Prefer", "return=minimal")
            .json(record)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn update(
        &self,
        key: &str,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), ServiceError> {
        let response = self
            .authed(self.client.patch(self.table_url()))
            .query(&self.key_filter(key))
            .header("Prefer", "return=minimal")
            .json(fields)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_url_and_filter() {
        let config = Arc::new(PodflowConfig {
            record_store_url: "https://proj.supabase.co/".to_string(),
            ..PodflowConfig::default()
        });
        let store = PostgrestRecordStore::new(Client::new(), config);

        assert_eq!(store.table_url(), "https://proj.supabase.co/rest/v1/papers");
        assert_eq!(
            store.key_filter("2401.00001"),
            [("arxiv_id".to_string(), "eq.2401.00001".to_string())]
        );
    }
}
