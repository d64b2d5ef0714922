//! End-to-end pipeline scenarios (§8): one `#[tokio::test]` per scenario,
//! each wired against `MockLlmClient`/`MockEmbeddingClient` and a temp-file
//! SQLite fixture so none of it touches a live network or database.

use std::str::FromStr;
use std::time::Duration;

use nlsql_chat::cache::SqlCache;
use nlsql_chat::db::{connect, DatabaseClient};
use nlsql_chat::embeddings::{EmbeddingClient, EmbeddingStore, MockEmbeddingClient};
use nlsql_chat::llm::MockLlmClient;
use nlsql_chat::pipeline::{self, CacheHitType, Intent, PipelineDeps, PipelineState, VizType};
use nlsql_chat::schema::Schema;
use nlsql_chat::session::Exchange;
use tokio_util::sync::CancellationToken;

fn schema() -> Schema {
    Schema::parse(
        r#"{
            "schema_id": "shop",
            "source_type": "database",
            "database_type": "sqlite",
            "tables": {
                "users": {
                    "name": "users",
                    "description": "Registered application users",
                    "columns": {
                        "id": {"name": "id", "data_type": "integer", "is_primary_key": true},
                        "name": {"name": "name", "data_type": "text"}
                    },
                    "relationships": []
                },
                "orders": {
                    "name": "orders",
                    "description": "Customer orders with category and amount",
                    "columns": {
                        "id": {"name": "id", "data_type": "integer", "is_primary_key": true},
                        "category": {"name": "category", "data_type": "text"},
                        "amount": {"name": "amount", "data_type": "integer"}
                    },
                    "relationships": []
                }
            },
            "suggested_queries": ["Show all users", "Total orders by category"]
        }"#,
    )
    .unwrap()
}

async fn seeded_db(dir: &tempfile::TempDir) -> Box<dyn DatabaseClient> {
    let path = dir.path().join("scenarios.db");
    let options = sqlx::sqlite::SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .unwrap()
        .create_if_missing(true);
    let pool = sqlx::sqlite::SqlitePoolOptions::new().connect_with(options).await.unwrap();
    sqlx::query("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO users (id, name) VALUES (1, 'Alice'), (2, 'Bob')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("CREATE TABLE orders (id INTEGER PRIMARY KEY, category TEXT, amount INTEGER)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO orders (id, category, amount) VALUES \
         (1, 'books', 10), (2, 'books', 20), (3, 'toys', 5)",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;
    connect(&format!("sqlite://{}", path.display()), 5).await.unwrap()
}

/// Bundles everything a scenario needs so each test only wires up its own
/// `MockLlmClient` responses.
struct Harness {
    _dir: tempfile::TempDir,
    schema: Schema,
    db: Box<dyn DatabaseClient>,
    embedding_client: MockEmbeddingClient,
    embeddings: EmbeddingStore,
    sql_cache: SqlCache,
}

impl Harness {
    async fn build() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(&dir).await;
        let embedding_client = MockEmbeddingClient::new();
        let embeddings = EmbeddingStore::open(&dir.path().join("emb.db")).await.unwrap();

        embeddings
            .put(
                "shop",
                "users",
                &embedding_client.embed("registered application users").await.unwrap(),
            )
            .await
            .unwrap();
        embeddings
            .put(
                "shop",
                "orders",
                &embedding_client.embed("customer orders category amount").await.unwrap(),
            )
            .await
            .unwrap();

        let sql_cache = SqlCache::open(&dir.path().join("cache.db")).await.unwrap();

        Self {
            _dir: dir,
            schema: schema(),
            db,
            embedding_client,
            embeddings,
            sql_cache,
        }
    }

    fn deps<'a>(&'a self, llm: &'a MockLlmClient) -> PipelineDeps<'a> {
        PipelineDeps {
            schema: &self.schema,
            db: self.db.as_ref(),
            llm,
            embedding_client: &self.embedding_client,
            embeddings: &self.embeddings,
            sql_cache: &self.sql_cache,
            db_timeout: Duration::from_secs(5),
        }
    }
}

/// Scenario 1: basic listing, cache miss then hit.
#[tokio::test]
async fn basic_listing_cache_miss_then_hit() {
    let harness = Harness::build().await;
    let llm = MockLlmClient::new().with_response(
        "classify the user's question",
        r#"{"intent": "sql", "rewritten_query": "show all users", "general_answer": null}"#,
    );
    let deps = harness.deps(&llm);

    let mut first = PipelineState::new("show all users".to_string(), "s1".to_string(), vec![]);
    pipeline::run(&mut first, &deps, &CancellationToken::new()).await.unwrap();

    assert!(!first.has_error(), "pipeline error: {:?}", first.error_message);
    assert_eq!(first.cache_hit_type, CacheHitType::None);
    assert_eq!(first.rows.len(), 2);
    let generated = first.generated_sql.clone().unwrap();

    let mut second = PipelineState::new("show all users".to_string(), "s1".to_string(), vec![]);
    pipeline::run(&mut second, &deps, &CancellationToken::new()).await.unwrap();

    assert!(!second.has_error());
    assert_eq!(second.cache_hit_type, CacheHitType::Sql);
    assert_eq!(second.generated_sql.unwrap(), generated);
}

/// Scenario 2: a follow-up question is rewritten into a standalone form
/// before it ever reaches the cache or schema analyzer.
#[tokio::test]
async fn follow_up_is_rewritten_before_cache_lookup() {
    let harness = Harness::build().await;
    let llm = MockLlmClient::new()
        .with_response(
            "classify the user's question",
            r#"{"intent": "sql", "rewritten_query": "show all users", "general_answer": null}"#,
        )
        .with_response("write a single read-only select", "```sql\nSELECT * FROM users;\n```");
    let deps = harness.deps(&llm);

    let history = vec![Exchange {
        user_message: "show all users".to_string(),
        generated_sql: Some("SELECT * FROM users".to_string()),
        timestamp: chrono::Utc::now(),
    }];

    let mut state = PipelineState::new("show those again".to_string(), "s1".to_string(), history);
    pipeline::run(&mut state, &deps, &CancellationToken::new()).await.unwrap();

    assert!(!state.has_error(), "pipeline error: {:?}", state.error_message);
    assert_eq!(state.rewritten_query, "show all users");
    assert_ne!(state.rewritten_query, state.original_query);
}

/// Scenario 3: a general-knowledge question short-circuits before any SQL stage runs.
#[tokio::test]
async fn general_knowledge_short_circuits() {
    let harness = Harness::build().await;
    let llm = MockLlmClient::new().with_response(
        "classify the user's question",
        r#"{"intent": "general", "rewritten_query": null, "general_answer": "SQL is a declarative query language."}"#,
    );
    let deps = harness.deps(&llm);

    let mut state = PipelineState::new("what is SQL?".to_string(), "s1".to_string(), vec![]);
    pipeline::run(&mut state, &deps, &CancellationToken::new()).await.unwrap();

    assert!(!state.has_error());
    assert_eq!(state.intent, Intent::General);
    assert!(state.generated_sql.is_none());
    assert!(state.rows.is_empty());
    assert_eq!(state.general_answer.as_deref(), Some("SQL is a declarative query language."));
}

/// Scenario 4: mixed intent prepends the general answer ahead of the SQL interpretation.
#[tokio::test]
async fn mixed_intent_prepends_general_answer() {
    let harness = Harness::build().await;
    let llm = MockLlmClient::new()
        .with_response(
            "classify the user's question",
            r#"{"intent": "mixed", "rewritten_query": "show all users", "general_answer": "Users are the people who signed up."}"#,
        )
        .with_response("write a single read-only select", "```sql\nSELECT * FROM users;\n```");
    let deps = harness.deps(&llm);

    let mut state = PipelineState::new("who are users, and list them".to_string(), "s1".to_string(), vec![]);
    pipeline::run(&mut state, &deps, &CancellationToken::new()).await.unwrap();

    assert!(!state.has_error(), "pipeline error: {:?}", state.error_message);
    assert_eq!(state.intent, Intent::Mixed);
    assert_eq!(state.rows.len(), 2);
    let interpretation = state.interpretation.expect("mixed intent should produce an interpretation");
    assert!(interpretation.starts_with("## Answer"));
    assert!(interpretation.contains("Users are the people who signed up."));
}

/// Scenario 5: a destructive statement is rejected by the validator on every
/// generation attempt, exhausting the retry budget without executing anything.
#[tokio::test]
async fn destructive_sql_is_rejected_by_the_validator() {
    let harness = Harness::build().await;
    let llm = MockLlmClient::new()
        .with_response(
            "classify the user's question",
            r#"{"intent": "sql", "rewritten_query": "delete all users", "general_answer": null}"#,
        )
        .with_response("write a single read-only select", "```sql\nDROP TABLE users;\n```");
    let deps = harness.deps(&llm);

    let mut state = PipelineState::new("delete all users".to_string(), "s1".to_string(), vec![]);
    pipeline::run(&mut state, &deps, &CancellationToken::new()).await.unwrap();

    assert!(state.has_error());
    assert_eq!(state.error_stage, Some("validator"));
    assert!(!state.validation_ok);
    assert!(state.generated_sql.is_none());
    assert!(state.rows.is_empty());
}

/// Scenario 6: a grouped aggregate result is recommended a chart alongside its interpretation.
#[tokio::test]
async fn aggregation_query_yields_chart_recommendation() {
    let harness = Harness::build().await;
    let llm = MockLlmClient::new()
        .with_response(
            "classify the user's question",
            r#"{"intent": "sql", "rewritten_query": "total orders by category", "general_answer": null}"#,
        )
        .with_response(
            "write a single read-only select",
            "```sql\nSELECT category, SUM(amount) AS total FROM orders GROUP BY category;\n```",
        );
    let deps = harness.deps(&llm);

    let mut state = PipelineState::new("total orders by category".to_string(), "s1".to_string(), vec![]);
    pipeline::run(&mut state, &deps, &CancellationToken::new()).await.unwrap();

    assert!(!state.has_error(), "pipeline error: {:?}", state.error_message);
    assert_eq!(state.rows.len(), 2);
    let viz = state.visualization.expect("grouped aggregate should recommend a chart");
    assert!(matches!(viz.viz_type, VizType::Bar | VizType::Pie));
}
