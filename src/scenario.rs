//! Document-store scenario
//!
//! Each user seeds the store with a fixed set of texts when it starts, then
//! mostly searches (weight 10) and occasionally adds one more text (weight 1).

use loadgen_core::{Behavior, Request, SetupError, TaskTable};
use rand::Rng;

const ADD_PATH: &str = "/chromadb/add";
const SEARCH_PATH: &str = "/chromadb/search";

/// Texts every user adds on start
pub const SEED_TEXTS: [&str; 10] = [
    "Machine learning is a subset of artificial intelligence",
    "Python is a popular programming language for data science",
    "ChromaDB is a vector database for embeddings",
    "Natural language processing uses machine learning techniques",
    "Vector embeddings represent text as numerical arrays",
    "Semantic search finds documents by meaning not keywords",
    "Large language models can generate human-like text",
    "Deep learning uses neural networks with multiple layers",
    "Text preprocessing is important for NLP applications",
    "Information retrieval systems help find relevant documents",
];

/// Queries drawn by `search_text`
pub const SEARCH_QUERIES: [&str; 10] = [
    "artificial intelligence machine learning",
    "programming language data science",
    "vector database embeddings",
    "natural language processing",
    "numerical arrays text representation",
    "semantic search meaning",
    "language models text generation",
    "neural networks deep learning",
    "text preprocessing NLP",
    "information retrieval documents",
];

/// Texts drawn by `add_additional_text`
pub const ADDITIONAL_TEXTS: [&str; 4] = [
    "API testing with Locust load testing framework",
    "Performance metrics include latency and throughput",
    "Load testing helps identify system bottlenecks",
    "Scalability testing ensures system can handle growth",
];

/// Session entry written by the start-up behavior
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeededTexts {
    /// Positions in [`SEED_TEXTS`] the store accepted
    pub accepted: Vec<usize>,
    /// Positions in [`SEED_TEXTS`] the store rejected or never answered
    pub rejected: Vec<usize>,
}

/// Start-up behavior: add every seed text once
pub fn seed_documents() -> Behavior {
    Behavior::new("seed_documents", |ctx| {
        Box::pin(async move {
            let mut seeded = SeededTexts::default();
            for (idx, text) in SEED_TEXTS.iter().enumerate() {
                let request = Request::post(ADD_PATH).param("text", *text).name("add_text");
                let outcome = ctx.request(&request).await;
                if outcome.status_code == Some(200) {
                    seeded.accepted.push(idx);
                } else {
                    seeded.rejected.push(idx);
                }
            }

            tracing::info!(
                user_id = ctx.user_id(),
                accepted = seeded.accepted.len(),
                rejected = seeded.rejected.len(),
                "Seeded documents"
            );
            ctx.session_mut().insert(seeded);
            Ok(())
        })
    })
}

/// Search for a random query
pub fn search_text() -> Behavior {
    Behavior::new("search_text", |ctx| {
        Box::pin(async move {
            let query = SEARCH_QUERIES[ctx.rng().gen_range(0..SEARCH_QUERIES.len())];
            let request = Request::post(SEARCH_PATH)
                .param("query", query)
                .name("search_text")
                .context("query", query);
            ctx.request(&request).await;
            Ok(())
        })
    })
}

/// Add one random extra text
pub fn add_additional_text() -> Behavior {
    Behavior::new("add_additional_text", |ctx| {
        Box::pin(async move {
            let text = ADDITIONAL_TEXTS[ctx.rng().gen_range(0..ADDITIONAL_TEXTS.len())];
            let request = Request::post(ADD_PATH)
                .param("text", text)
                .name("add_additional_text");
            ctx.request(&request).await;
            Ok(())
        })
    })
}

/// The weighted task table of the scenario
pub fn task_table() -> Result<TaskTable, SetupError> {
    TaskTable::new()
        .with(search_text(), 10)?
        .with(add_additional_text(), 1)
}
