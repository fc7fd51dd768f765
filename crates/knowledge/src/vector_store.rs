use crate::node_mapping::{node_to_record, query_filter, record_to_node, ref_doc_filter};
use async_trait::async_trait;
use pgvecto_store_common::{
    Result, StoreError, TextNode, VectorStoreQuery, VectorStoreQueryResult,
};
use pgvecto_store_core::{DatabaseConfig, PgVectoRs, Record, VectorDatabase, VectorStore};
use tracing::{debug, instrument};

/// Vector store backed by a pgvecto.rs collection.
///
/// Every operation is a single call into the client; client errors are
/// returned as-is.
pub struct PgVectoRsStore<D = PgVectoRs> {
    client: D,
}

impl PgVectoRsStore<PgVectoRs> {
    /// Connect a new client and wrap it. Fails early when the server lacks
    /// the `vectors` extension.
    pub async fn connect(config: DatabaseConfig) -> Result<Self> {
        Ok(Self::new(PgVectoRs::new(config).await?))
    }
}

impl<D: VectorDatabase> PgVectoRsStore<D> {
    pub fn new(client: D) -> Self {
        Self { client }
    }

    /// The underlying client, for operations the store does not expose.
    pub fn client(&self) -> &D {
        &self.client
    }

    pub fn into_client(self) -> D {
        self.client
    }
}

#[async_trait]
impl<D: VectorDatabase> VectorStore for PgVectoRsStore<D> {
    fn stores_text(&self) -> bool {
        true
    }

    fn class_name(&self) -> &'static str {
        "PGVectoRsStore"
    }

    #[instrument(skip(self, nodes), fields(count = nodes.len()))]
    async fn add(&self, nodes: &[TextNode]) -> Result<Vec<String>> {
        let records = nodes
            .iter()
            .map(node_to_record)
            .collect::<Result<Vec<Record>>>()?;

        self.client.insert(records).await?;

        Ok(nodes.iter().map(|node| node.id.clone()).collect())
    }

    #[instrument(skip(self))]
    async fn delete(&self, ref_doc_id: &str) -> Result<()> {
        let deleted = self.client.delete(ref_doc_filter(ref_doc_id)).await?;
        debug!(deleted, "Deleted nodes for document");
        Ok(())
    }

    #[instrument(skip(self, query), fields(top_k = query.similarity_top_k))]
    async fn query(&self, query: &VectorStoreQuery) -> Result<VectorStoreQueryResult> {
        let embedding = query
            .query_embedding
            .as_deref()
            .ok_or_else(|| StoreError::InvalidQuery("query embedding is required".to_string()))?;
        let filter = query_filter(query.filters.as_ref())?;

        let results = self
            .client
            .search(embedding, query.similarity_top_k, filter)
            .await?;

        let mut result = VectorStoreQueryResult {
            nodes: Vec::with_capacity(results.len()),
            similarities: Vec::with_capacity(results.len()),
            ids: Vec::with_capacity(results.len()),
        };
        for (record, score) in &results {
            result.nodes.push(record_to_node(record)?);
            result.similarities.push(*score);
            result.ids.push(record.id.clone());
        }

        debug!(results = result.len(), "Query completed");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use pgvecto_store_common::{
        metadata::REF_DOC_ID_KEY, FilterCondition, FilterOperator, MetadataFilter, MetadataFilters,
        MetadataMode,
    };
    use pgvecto_store_core::{meta_contains, Filter};
    use proptest::prelude::*;
    use serde_json::json;
    use tokio::sync::RwLock;

    mock! {
        pub Database {}

        #[async_trait]
        impl VectorDatabase for Database {
            async fn insert(&self, records: Vec<Record>) -> Result<()>;
            async fn delete(&self, filter: Filter) -> Result<u64>;
            async fn search(
                &self,
                embedding: &[f32],
                top_k: usize,
                filter: Option<Filter>,
            ) -> Result<Vec<(Record, f32)>>;
        }
    }

    /// Brute-force stand-in for the database engine: squared L2 ordering and
    /// JSON containment over metadata.
    #[derive(Default)]
    struct InMemoryDatabase {
        records: RwLock<Vec<Record>>,
    }

    fn matches(filter: &Filter, record: &Record) -> bool {
        match filter {
            Filter::MetaContains(meta) => meta
                .iter()
                .all(|(key, value)| record.meta.get(key) == Some(value)),
            Filter::And(filters) => filters.iter().all(|f| matches(f, record)),
            Filter::Or(filters) => filters.iter().any(|f| matches(f, record)),
        }
    }

    fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    }

    #[async_trait]
    impl VectorDatabase for InMemoryDatabase {
        async fn insert(&self, records: Vec<Record>) -> Result<()> {
            self.records.write().await.extend(records);
            Ok(())
        }

        async fn delete(&self, filter: Filter) -> Result<u64> {
            let mut records = self.records.write().await;
            let before = records.len();
            records.retain(|record| !matches(&filter, record));
            Ok((before - records.len()) as u64)
        }

        async fn search(
            &self,
            embedding: &[f32],
            top_k: usize,
            filter: Option<Filter>,
        ) -> Result<Vec<(Record, f32)>> {
            let records = self.records.read().await;
            let mut scored: Vec<(Record, f32)> = records
                .iter()
                .filter(|record| filter.as_ref().map_or(true, |f| matches(f, record)))
                .map(|record| (record.clone(), squared_l2(embedding, &record.embedding)))
                .collect();
            scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(top_k);
            Ok(scored)
        }
    }

    fn node(id: &str, text: &str, ref_doc_id: &str, embedding: Vec<f32>) -> TextNode {
        TextNode::with_id(id, text)
            .with_ref_doc_id(ref_doc_id)
            .with_embedding(embedding)
    }

    #[test]
    fn test_store_identity() {
        let store = PgVectoRsStore::new(MockDatabase::new());
        assert!(store.stores_text());
        assert_eq!(store.class_name(), "PGVectoRsStore");
    }

    #[tokio::test]
    async fn test_add_sends_one_batch_and_returns_ids_in_order() {
        let mut client = MockDatabase::new();
        client
            .expect_insert()
            .withf(|records| {
                records.len() == 2
                    && records[0].id == "b"
                    && records[1].id == "a"
                    && records[0].text == "second"
                    && records[0].meta["topic"] == json!("rust")
                    && records[0].meta[REF_DOC_ID_KEY] == json!("d1")
                    && records[1].embedding == vec![0.3, 0.4]
            })
            .times(1)
            .returning(|_| Ok(()));

        let store = PgVectoRsStore::new(client);
        let nodes = vec![
            node("b", "second", "d1", vec![0.1, 0.2]).with_metadata("topic", "rust"),
            node("a", "first", "d2", vec![0.3, 0.4]),
        ];

        assert_eq!(store.add(&nodes).await.unwrap(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_add_excludes_metadata_from_text() {
        let mut client = MockDatabase::new();
        client
            .expect_insert()
            .withf(|records| records[0].text == "body")
            .returning(|_| Ok(()));

        let store = PgVectoRsStore::new(client);
        let node = node("n1", "body", "d1", vec![1.0]).with_metadata("title", "Heading");
        assert_ne!(node.get_content(MetadataMode::All), "body");

        store.add(&[node]).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_requires_embeddings() {
        let mut client = MockDatabase::new();
        client.expect_insert().never();

        let store = PgVectoRsStore::new(client);
        let nodes = vec![
            node("n1", "ok", "d1", vec![1.0]),
            TextNode::with_id("n2", "missing"),
        ];

        let err = store.add(&nodes).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingEmbedding(id) if id == "n2"));
    }

    #[tokio::test]
    async fn test_client_errors_propagate_unchanged() {
        let mut client = MockDatabase::new();
        client
            .expect_insert()
            .returning(|_| Err(StoreError::Database("connection refused".to_string())));
        client
            .expect_search()
            .returning(|_, _, _| Err(StoreError::DimensionMismatch { expected: 3, actual: 2 }));

        let store = PgVectoRsStore::new(client);

        let err = store
            .add(&[node("n1", "text", "d1", vec![1.0, 2.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Database(msg) if msg == "connection refused"));

        let err = store
            .query(&VectorStoreQuery::new(vec![1.0, 2.0], 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch { expected: 3, actual: 2 }
        ));
    }

    #[tokio::test]
    async fn test_delete_filters_on_ref_doc_id() {
        let mut client = MockDatabase::new();
        client
            .expect_delete()
            .withf(|filter| *filter == meta_contains([("ref_doc_id", "d1")]))
            .times(1)
            .returning(|_| Ok(0));

        let store = PgVectoRsStore::new(client);
        assert!(store.delete("d1").await.is_ok());
    }

    #[tokio::test]
    async fn test_query_passes_embedding_top_k_and_filter() {
        let mut client = MockDatabase::new();
        client
            .expect_search()
            .withf(|embedding, top_k, filter| {
                embedding.to_vec() == vec![0.5, 0.5]
                    && *top_k == 3
                    && *filter == Some(meta_contains([("a", 1), ("b", 2)]))
            })
            .times(1)
            .returning(|_, _, _| Ok(Vec::new()));

        let store = PgVectoRsStore::new(client);
        let query = VectorStoreQuery::new(vec![0.5, 0.5], 3)
            .with_filters(MetadataFilters::from_pairs([("a", 1), ("b", 2)]));

        let result = store.query(&query).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_query_without_filters_sends_none() {
        let mut client = MockDatabase::new();
        client
            .expect_search()
            .withf(|_, _, filter| filter.is_none())
            .times(2)
            .returning(|_, _, _| Ok(Vec::new()));

        let store = PgVectoRsStore::new(client);
        store
            .query(&VectorStoreQuery::new(vec![1.0], 1))
            .await
            .unwrap();
        store
            .query(&VectorStoreQuery::new(vec![1.0], 1).with_filters(MetadataFilters::default()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_query_rejects_bad_input_before_searching() {
        let mut client = MockDatabase::new();
        client.expect_search().never();
        let store = PgVectoRsStore::new(client);

        let err = store.query(&VectorStoreQuery::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));

        let filters = MetadataFilters::new(vec![MetadataFilter {
            key: "year".to_string(),
            value: json!(2020),
            operator: FilterOperator::Gte,
        }]);
        let err = store
            .query(&VectorStoreQuery::new(vec![1.0], 1).with_filters(filters))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedFilter(_)));
    }

    #[tokio::test]
    async fn test_query_maps_results_in_client_order() {
        let first = node_to_record(&node("n2", "two", "d1", vec![0.0, 1.0])).unwrap();
        let second = node_to_record(&node("n1", "one", "d1", vec![1.0, 0.0])).unwrap();

        let mut client = MockDatabase::new();
        client
            .expect_search()
            .returning(move |_, _, _| Ok(vec![(first.clone(), 0.25), (second.clone(), 0.75)]));

        let store = PgVectoRsStore::new(client);
        let result = store
            .query(&VectorStoreQuery::new(vec![0.0, 1.0], 2))
            .await
            .unwrap();

        assert_eq!(result.ids, vec!["n2", "n1"]);
        assert_eq!(result.similarities, vec![0.25, 0.75]);
        assert_eq!(result.nodes[0].text, "two");
        assert_eq!(result.nodes[1].ref_doc_id(), Some("d1"));
    }

    #[tokio::test]
    async fn test_client_accessor() {
        let store = PgVectoRsStore::new(InMemoryDatabase::default());
        store
            .add(&[node("n1", "hello", "d1", vec![0.1, 0.2])])
            .await
            .unwrap();
        assert_eq!(store.client().records.read().await.len(), 1);
        assert_eq!(store.into_client().records.into_inner().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_then_query_single_node() {
        let store = PgVectoRsStore::new(InMemoryDatabase::default());
        let ids = store
            .add(&[node("n1", "hello", "d1", vec![0.1, 0.2])])
            .await
            .unwrap();
        assert_eq!(ids, vec!["n1"]);

        let result = store
            .query(&VectorStoreQuery::new(vec![0.1, 0.2], 1))
            .await
            .unwrap();
        assert_eq!(result.ids, vec!["n1"]);
        assert_eq!(result.nodes[0].text, "hello");
    }

    #[tokio::test]
    async fn test_round_trip_restores_text_and_metadata() {
        let store = PgVectoRsStore::new(InMemoryDatabase::default());
        let original = node("n1", "the body", "d1", vec![0.3, 0.9])
            .with_metadata("author", "ada")
            .with_metadata("page", 7)
            .with_metadata("draft", false);
        store.add(&[original.clone()]).await.unwrap();

        let result = store
            .query(&VectorStoreQuery::new(vec![0.3, 0.9], 1))
            .await
            .unwrap();
        let restored = &result.nodes[0];

        assert_eq!(restored.id, original.id);
        assert_eq!(restored.text, original.text);
        assert_eq!(restored.metadata, original.metadata);
        assert_eq!(restored.relationships, original.relationships);
    }

    #[tokio::test]
    async fn test_delete_removes_all_nodes_of_document() {
        let store = PgVectoRsStore::new(InMemoryDatabase::default());
        store
            .add(&[
                node("n1", "a", "d1", vec![1.0, 0.0]),
                node("n2", "b", "d1", vec![0.9, 0.1]),
                node("n3", "c", "d2", vec![0.8, 0.2]),
            ])
            .await
            .unwrap();

        store.delete("d1").await.unwrap();
        store.delete("missing").await.unwrap();

        let result = store
            .query(&VectorStoreQuery::new(vec![1.0, 0.0], 10))
            .await
            .unwrap();
        assert_eq!(result.ids, vec!["n3"]);
        assert!(result
            .nodes
            .iter()
            .all(|node| node.ref_doc_id() != Some("d1")));
    }

    #[tokio::test]
    async fn test_delete_matches_ref_doc_id_given_as_metadata() {
        let store = PgVectoRsStore::new(InMemoryDatabase::default());
        let plain = TextNode::with_id("n1", "hello")
            .with_metadata("ref_doc_id", "d1")
            .with_embedding(vec![0.1, 0.2]);
        store.add(&[plain]).await.unwrap();

        let result = store
            .query(&VectorStoreQuery::new(vec![0.1, 0.2], 1))
            .await
            .unwrap();
        assert_eq!(result.ids, vec!["n1"]);
        assert_eq!(result.nodes[0].metadata["ref_doc_id"], "d1");

        store.delete("d1").await.unwrap();

        let result = store
            .query(&VectorStoreQuery::new(vec![0.1, 0.2], 10))
            .await
            .unwrap();
        assert!(result.ids.is_empty());
    }

    #[tokio::test]
    async fn test_filters_are_conjunctive() {
        let store = PgVectoRsStore::new(InMemoryDatabase::default());
        store
            .add(&[
                node("both", "x", "d1", vec![0.0, 1.0])
                    .with_metadata("a", 1)
                    .with_metadata("b", 2),
                node("only_a", "x", "d1", vec![0.0, 1.0]).with_metadata("a", 1),
                node("only_b", "x", "d1", vec![0.0, 1.0]).with_metadata("b", 2),
            ])
            .await
            .unwrap();

        let query = VectorStoreQuery::new(vec![0.0, 1.0], 10)
            .with_filters(MetadataFilters::from_pairs([("a", 1), ("b", 2)]));
        let result = store.query(&query).await.unwrap();
        assert_eq!(result.ids, vec!["both"]);

        let query = VectorStoreQuery::new(vec![0.0, 1.0], 10).with_filters(
            MetadataFilters::from_pairs([("a", 1), ("b", 2)]).with_condition(FilterCondition::Or),
        );
        let mut ids = store.query(&query).await.unwrap().ids;
        ids.sort();
        assert_eq!(ids, vec!["both", "only_a", "only_b"]);
    }

    proptest! {
        #[test]
        fn prop_add_then_query_finds_every_node(
            embeddings in prop::collection::vec(prop::collection::vec(-10.0f32..10.0, 3), 1..12),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let store = PgVectoRsStore::new(InMemoryDatabase::default());
                let nodes: Vec<TextNode> = embeddings
                    .iter()
                    .enumerate()
                    .map(|(i, embedding)| node(&format!("n{}", i), "text", "d1", embedding.clone()))
                    .collect();

                let ids = store.add(&nodes).await.unwrap();
                let expected: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
                prop_assert_eq!(&ids, &expected);

                for node in &nodes {
                    let query = VectorStoreQuery::new(node.embedding.clone().unwrap(), nodes.len());
                    let result = store.query(&query).await.unwrap();
                    prop_assert!(result.ids.contains(&node.id));
                }
                Ok(())
            })?;
        }
    }
}
