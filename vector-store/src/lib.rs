//! Vector-store facade for the two per-installation collections.
//!
//! The detection pipeline needs exactly five operations — ensure a
//! collection at a given dimensionality, upsert points, filtered k-NN
//! search, fetch one stored vector, delete by filter — and this module is
//! the only place that talks to `qdrant-client` for them.
//!
//! Point identity: callers address points by arbitrary string ids (e.g.
//! `"{repo_id}-{pr_number}-code"`); the facade maps them to deterministic
//! UUIDs for stores that require UUID keys.

mod errors;

pub use errors::VectorStoreError;

use qdrant_client::Payload;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    GetPointsBuilder, PointStruct, SearchPointsBuilder, UpsertPointsBuilder,
    Value as QValue, VectorParamsBuilder, vectors_config,
};
use serde_json::Value;
use services::stable_uuid;
use tracing::{debug, info, warn};

/// Maximum points per upsert call.
const UPSERT_BATCH: usize = 256;

/// Connection settings for the vector store.
#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    pub url: String,
    pub api_key: Option<String>,
}

/// One point to upsert: external string id, vector and JSON payload.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Value,
}

/// One k-NN hit: similarity score plus the stored payload.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub score: f32,
    pub payload: Value,
}

impl SearchHit {
    /// Builds a hit from a scored point.
    ///
    /// Payloads in this store are flat scalar maps (`repo_id`, `pr_number`,
    /// `pr_id`); a nested value would mean a foreign writer touched the
    /// collection, so it degrades to `Null` instead of failing the search.
    fn from_scored(point: qdrant_client::qdrant::ScoredPoint) -> Self {
        let mut fields = serde_json::Map::with_capacity(point.payload.len());
        for (key, value) in point.payload {
            fields.insert(key, scalar_to_json(value));
        }
        Self {
            score: point.score,
            payload: Value::Object(fields),
        }
    }
}

/// Maps one stored scalar back to JSON; non-scalar kinds become `Null`.
fn scalar_to_json(value: QValue) -> Value {
    use qdrant_client::qdrant::value::Kind;
    match value.kind {
        Some(Kind::IntegerValue(n)) => Value::from(n),
        Some(Kind::DoubleValue(d)) => Value::from(d),
        Some(Kind::StringValue(s)) => Value::from(s),
        Some(Kind::BoolValue(b)) => Value::from(b),
        _ => Value::Null,
    }
}

/// A facade over the Qdrant client.
pub struct VectorStore {
    client: Qdrant,
}

impl VectorStore {
    /// Connects using the builder-based API, with optional API key auth.
    pub fn new(cfg: &VectorStoreConfig) -> Result<Self, VectorStoreError> {
        let mut builder = Qdrant::from_url(&cfg.url);
        if let Some(key) = &cfg.api_key {
            builder = builder.api_key(key.clone());
        }
        let client = builder
            .build()
            .map_err(|e| VectorStoreError::Qdrant(e.to_string()))?;
        Ok(Self { client })
    }

    /// Ensures that `name` exists with the given dimensionality.
    ///
    /// - Missing → created with cosine distance.
    /// - Present with the same dimension → no-op.
    /// - Present with a different dimension → **dropped and recreated**;
    ///   callers must be prepared to re-embed.
    pub async fn ensure_collection(&self, name: &str, dim: u64) -> Result<(), VectorStoreError> {
        match self.client.collection_info(name).await {
            Ok(info) => {
                let existing = existing_dimension(&info);
                if existing == Some(dim) {
                    debug!("collection '{}' already exists with dim {}", name, dim);
                    return Ok(());
                }
                warn!(
                    "collection '{}' has dim {:?}, expected {}; dropping and recreating",
                    name, existing, dim
                );
                self.client
                    .delete_collection(name)
                    .await
                    .map_err(|e| VectorStoreError::Qdrant(e.to_string()))?;
            }
            Err(err) => {
                debug!("collection '{}' not found, will be created (error={})", name, err);
            }
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(name)
                    .vectors_config(VectorParamsBuilder::new(dim, Distance::Cosine)),
            )
            .await
            .map_err(|e| VectorStoreError::Qdrant(e.to_string()))?;

        info!("collection '{}' created (dim={}, cosine)", name, dim);
        Ok(())
    }

    /// Upserts points in batches of at most 256.
    pub async fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> Result<(), VectorStoreError> {
        if points.is_empty() {
            debug!("no points provided for upsert");
            return Ok(());
        }

        info!("upserting {} points into '{}'", points.len(), collection);

        let mut structs = Vec::with_capacity(points.len());
        for p in points {
            let payload = Payload::try_from(p.payload)
                .map_err(|e| VectorStoreError::InvalidPayload(e.to_string()))?;
            structs.push(PointStruct::new(
                stable_uuid(&p.id).to_string(),
                p.vector,
                payload,
            ));
        }

        for batch in structs.chunks(UPSERT_BATCH) {
            self.client
                .upsert_points(UpsertPointsBuilder::new(collection, batch.to_vec()))
                .await
                .map_err(|e| VectorStoreError::Qdrant(e.to_string()))?;
        }
        Ok(())
    }

    /// Performs a filtered similarity search.
    ///
    /// Returns `(score, payload)` hits sorted by score descending.
    pub async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
        filter: Option<Filter>,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        debug!("search in '{}' with limit={}", collection, limit);

        let mut builder = SearchPointsBuilder::new(collection, vector, limit).with_payload(true);
        if let Some(f) = filter {
            builder = builder.filter(f);
        }

        let res = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| VectorStoreError::Qdrant(e.to_string()))?;

        let out: Vec<SearchHit> = res.result.into_iter().map(SearchHit::from_scored).collect();
        debug!("search completed: {} hits", out.len());
        Ok(out)
    }

    /// Retrieves a stored vector by external id, `None` when absent.
    pub async fn get_vector(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Vec<f32>>, VectorStoreError> {
        let uuid = stable_uuid(id).to_string();
        let res = self
            .client
            .get_points(
                GetPointsBuilder::new(collection, vec![uuid.into()])
                    .with_vectors(true)
                    .with_payload(false),
            )
            .await
            .map_err(|e| VectorStoreError::Qdrant(e.to_string()))?;

        let vector = res.result.into_iter().next().and_then(|point| {
            point.vectors.and_then(|v| match v.vectors_options {
                Some(qdrant_client::qdrant::vectors_output::VectorsOptions::Vector(data)) => {
                    Some(data.data)
                }
                _ => None,
            })
        });
        Ok(vector)
    }

    /// Deletes all points matching the filter.
    pub async fn delete_by_filter(
        &self,
        collection: &str,
        filter: Filter,
    ) -> Result<(), VectorStoreError> {
        self.client
            .delete_points(DeletePointsBuilder::new(collection).points(filter))
            .await
            .map_err(|e| VectorStoreError::Qdrant(e.to_string()))?;
        Ok(())
    }
}

/// Builds the standard per-repo filter used by candidate retrieval.
pub fn repo_filter(repo_id: i64) -> Filter {
    Filter::must([Condition::matches("repo_id", repo_id)])
}

/// Extracts the single-vector dimension from a collection-info response.
fn existing_dimension(info: &qdrant_client::qdrant::GetCollectionInfoResponse) -> Option<u64> {
    let params = info
        .result
        .as_ref()?
        .config
        .as_ref()?
        .params
        .as_ref()?
        .vectors_config
        .as_ref()?
        .config
        .as_ref()?;
    match params {
        vectors_config::Config::Params(p) => Some(p.size),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdrant_client::qdrant::value::Kind;

    fn qvalue(kind: Kind) -> QValue {
        QValue { kind: Some(kind) }
    }

    #[test]
    fn scalars_map_to_their_json_counterparts() {
        assert_eq!(scalar_to_json(qvalue(Kind::IntegerValue(7))), 7);
        assert_eq!(scalar_to_json(qvalue(Kind::DoubleValue(0.5))), 0.5);
        assert_eq!(scalar_to_json(qvalue(Kind::StringValue("x".into()))), "x");
        assert_eq!(scalar_to_json(qvalue(Kind::BoolValue(true))), true);
        assert_eq!(scalar_to_json(QValue { kind: None }), Value::Null);
    }

    #[test]
    fn search_hit_carries_flat_payload() {
        let point = qdrant_client::qdrant::ScoredPoint {
            score: 0.87,
            payload: [
                ("repo_id".to_string(), qvalue(Kind::IntegerValue(3))),
                ("pr_number".to_string(), qvalue(Kind::IntegerValue(42))),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let hit = SearchHit::from_scored(point);
        assert_eq!(hit.score, 0.87);
        assert_eq!(hit.payload["pr_number"], 42);
        assert_eq!(hit.payload["repo_id"], 3);
    }
}
