//! Milvus vector store over the REST v2 API.
//!
//! # Endpoints
//!
//! | Operation | Path |
//! |-----------|------|
//! | exists | `POST /v2/vectordb/collections/has` |
//! | create | `POST /v2/vectordb/collections/create` |
//! | drop | `POST /v2/vectordb/collections/drop` |
//! | upsert | `POST /v2/vectordb/entities/upsert` |
//! | search | `POST /v2/vectordb/entities/search` |
//!
//! Collections are created with the quick-setup schema: a `VarChar`
//! primary key `id`, a float vector field `vector`, the `COSINE` metric,
//! and dynamic fields for chunk metadata.
//!
//! Milvus answers most errors with HTTP 200 and a non-zero `code` in the
//! body; those are reported as [`ProviderError::Fatal`].

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use docroute_core::store::{VectorRecord, VectorStore};
use docroute_core::ProviderError;

use crate::config::VectorStoreConfig;

/// Max length of chunk ids (UUID strings).
const ID_MAX_LENGTH: usize = 64;

pub struct MilvusStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl MilvusStore {
    pub fn new(config: &VectorStoreConfig, timeout: Duration) -> Result<Self> {
        let token = match &config.token_env {
            Some(var) => Some(
                std::env::var(var).map_err(|_| anyhow::anyhow!("{} environment variable not set", var))?,
            ),
            None => None,
        };
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: config.uri.trim_end_matches('/').to_string(),
            token,
            timeout,
        })
    }

    async fn call(&self, path: &str, body: Value) -> Result<Value, ProviderError> {
        let mut request = self
            .client
            .post(format!("{}/v2/vectordb{}", self.base_url, path))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout)
            } else {
                ProviderError::Transient(e.to_string())
            }
        })?;
        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Transient(format!("Milvus HTTP {}: {}", status, text)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Fatal(format!("Milvus HTTP {}: {}", status, text)));
        }
        let json: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        check_envelope(json)
    }
}

/// Unwrap `{ "code": 0, "data": ... }`.
fn check_envelope(json: Value) -> Result<Value, ProviderError> {
    let code = json.get("code").and_then(Value::as_i64).unwrap_or(0);
    if code != 0 {
        let message = json
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(ProviderError::Fatal(format!("Milvus error {}: {}", code, message)));
    }
    Ok(json.get("data").cloned().unwrap_or(Value::Null))
}

fn entity(id: &str, vector: &[f32], metadata: &Value) -> Value {
    let mut row = serde_json::Map::new();
    if let Value::Object(fields) = metadata {
        for (k, v) in fields {
            row.insert(k.clone(), v.clone());
        }
    }
    row.insert("id".into(), json!(id));
    row.insert("vector".into(), json!(vector));
    Value::Object(row)
}

/// Strong consistency so a search sees the rows upserted just before it.
fn search_body(collection: &str, vector: &[f32], top_k: usize) -> Value {
    json!({
        "collectionName": collection,
        "data": [vector],
        "annsField": "vector",
        "limit": top_k,
        "outputFields": ["id"],
        "consistencyLevel": "Strong",
    })
}

fn parse_hits(data: &Value) -> Result<Vec<(String, f32)>, ProviderError> {
    let rows = data
        .as_array()
        .ok_or_else(|| ProviderError::Malformed("search data is not an array".into()))?;
    // Multi-vector requests nest one array per query vector.
    let rows = match rows.first() {
        Some(Value::Array(inner)) => inner.as_slice(),
        _ => rows.as_slice(),
    };
    rows.iter()
        .map(|row| {
            let id = row
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| ProviderError::Malformed("search hit without id".into()))?;
            let score = row
                .get("distance")
                .and_then(Value::as_f64)
                .ok_or_else(|| ProviderError::Malformed("search hit without distance".into()))?;
            Ok((id.to_string(), score as f32))
        })
        .collect()
}

#[async_trait]
impl VectorStore for MilvusStore {
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<(), ProviderError> {
        let data = self.call("/collections/has", json!({ "collectionName": collection })).await?;
        if data.get("has").and_then(Value::as_bool).unwrap_or(false) {
            return Ok(());
        }
        self.call(
            "/collections/create",
            json!({
                "collectionName": collection,
                "dimension": dims,
                "metricType": "COSINE",
                "idType": "VarChar",
                "primaryFieldName": "id",
                "vectorFieldName": "vector",
                "params": { "max_length": ID_MAX_LENGTH },
            }),
        )
        .await?;
        tracing::debug!(collection, dims, "milvus collection created");
        Ok(())
    }

    async fn upsert(&self, collection: &str, id: &str, vector: &[f32], metadata: Value) -> Result<(), ProviderError> {
        self.call(
            "/entities/upsert",
            json!({ "collectionName": collection, "data": [entity(id, vector, &metadata)] }),
        )
        .await?;
        Ok(())
    }

    async fn upsert_batch(&self, collection: &str, records: &[VectorRecord]) -> Result<(), ProviderError> {
        if records.is_empty() {
            return Ok(());
        }
        let data: Vec<Value> = records
            .iter()
            .map(|r| entity(&r.id, &r.vector, &r.metadata))
            .collect();
        self.call("/entities/upsert", json!({ "collectionName": collection, "data": data }))
            .await?;
        Ok(())
    }

    async fn search(&self, collection: &str, vector: &[f32], top_k: usize) -> Result<Vec<(String, f32)>, ProviderError> {
        let data = self
            .call("/entities/search", search_body(collection, vector, top_k))
            .await?;
        parse_hits(&data)
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), ProviderError> {
        self.call("/collections/drop", json!({ "collectionName": collection }))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_error_code_is_fatal() {
        let err = check_envelope(json!({ "code": 1100, "message": "collection not found" })).unwrap_err();
        assert!(matches!(err, ProviderError::Fatal(m) if m.contains("collection not found")));
        let data = check_envelope(json!({ "code": 0, "data": { "has": true } })).unwrap();
        assert_eq!(data["has"], true);
    }

    #[test]
    fn test_search_reads_own_writes() {
        let body = search_body("docs__g1", &[0.5, 0.25], 4);
        assert_eq!(body["consistencyLevel"], "Strong");
        assert_eq!(body["collectionName"], "docs__g1");
        assert_eq!(body["limit"], 4);
        assert_eq!(body["data"][0][1], 0.25);
    }

    #[test]
    fn test_entity_flattens_metadata() {
        let row = entity("c1", &[0.5, 0.25], &json!({ "position": 3, "document_id": "a.txt" }));
        assert_eq!(row["id"], "c1");
        assert_eq!(row["position"], 3);
        assert_eq!(row["vector"][1], 0.25);
    }

    #[test]
    fn test_parse_hits_flat_and_nested() {
        let flat = json!([{ "id": "a", "distance": 0.9 }, { "id": "b", "distance": 0.5 }]);
        let hits = parse_hits(&flat).unwrap();
        assert_eq!(hits[0].0, "a");
        assert_eq!(hits.len(), 2);

        let nested = json!([[{ "id": "b", "distance": 0.7 }]]);
        assert_eq!(parse_hits(&nested).unwrap(), vec![("b".to_string(), 0.7f32)]);

        assert!(parse_hits(&json!([{ "distance": 0.1 }])).is_err());
    }
}
