use dispatch_common::protocol::{Query, Result, SearchResult};
use dispatch_core::Dispatcher;
use serde::Serialize;
use tracing::debug;

/// What to ask the cluster, as given on the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub body: serde_json::Value,
    pub hits: usize,
    pub offset: usize,
    pub timeout_ms: u64,
    pub search_path: Option<String>,
    pub trace_level: u32,
    pub estimate: bool,
    pub ranking: Option<String>,
    pub summary: Option<String>,
    /// Fetch summaries for the returned hits
    pub fill: bool,
}

impl QueryOptions {
    pub fn new(body: serde_json::Value) -> Self {
        let defaults = Query::new(serde_json::Value::Null);
        Self {
            body,
            hits: defaults.hits,
            offset: defaults.offset,
            timeout_ms: defaults.timeout_ms,
            search_path: None,
            trace_level: 0,
            estimate: false,
            ranking: None,
            summary: None,
            fill: true,
        }
    }

    pub fn to_query(&self) -> Query {
        let mut query = Query::new(self.body.clone())
            .with_hits(self.hits)
            .with_offset(self.offset)
            .with_timeout(self.timeout_ms)
            .with_trace_level(self.trace_level);
        query.search_path = self.search_path.clone().filter(|p| !p.trim().is_empty());
        query.estimate = self.estimate;
        query.ranking = self.ranking.clone();
        query.summary = self.summary.clone();
        query
    }
}

/// A finished query: the result plus what the dispatcher recorded on the way.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub result: SearchResult,
    /// The path the query ended up dispatched with
    pub search_path: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<String>,
}

/// Runs a query through the dispatcher, filling summaries unless disabled.
pub async fn run_query(dispatcher: &Dispatcher, options: &QueryOptions) -> Result<QueryOutcome> {
    let mut query = options.to_query();
    let mut invoker = dispatcher.get_search_invoker(&mut query)?;
    debug!(query = query.id, nodes = ?invoker.node_keys(), "Dispatching query");
    let mut result = invoker.search(&query).await?;

    if options.fill && !result.hits.is_empty() {
        let mut fill = dispatcher.get_fill_invoker(&query, &result);
        fill.fill(&query, &mut result).await?;
    }

    Ok(QueryOutcome {
        result,
        search_path: query.search_path,
        trace: query.trace,
    })
}
