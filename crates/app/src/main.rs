use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use takeoff_search_core::{
    boost_factors, detect_intent, expand_query, synthesize, CharacterNgramEmbedder,
    EmbeddingProvider, HttpEmbedder, HttpReranker, MaterialTakeoff, QdrantDistance, QdrantStore,
    SearchCoordinator, SearchQuery, SearchResponse, SearchSettings,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "takeoff-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection holding drawing excerpts
    #[arg(long, env = "QDRANT_COLLECTION", default_value = "drawings")]
    qdrant_collection: String,

    /// Distance metric of the collection: cosine, dot, euclid or manhattan.
    #[arg(long, env = "QDRANT_DISTANCE", default_value = "cosine")]
    qdrant_distance: QdrantDistance,

    /// OpenAI-compatible embeddings endpoint. The local n-gram embedder is used when unset.
    #[arg(long, env = "EMBEDDING_URL")]
    embedding_url: Option<String>,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,

    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// Vector size of the collection when a remote embedder is configured.
    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value = "1536")]
    embedding_dimensions: usize,

    /// Re-rank endpoint; re-ranking is skipped when unset.
    #[arg(long, env = "RERANK_URL")]
    rerank_url: Option<String>,

    #[arg(long, env = "RERANK_MODEL", default_value = "rerank-english-v3.0")]
    rerank_model: String,

    #[arg(long, env = "RERANK_API_KEY", hide_env_values = true)]
    rerank_api_key: Option<String>,
}

#[derive(Args, Clone)]
struct QueryArgs {
    /// Search query
    #[arg(long)]
    query: String,
    #[arg(long)]
    discipline: Option<String>,
    #[arg(long)]
    drawing_type: Option<String>,
    #[arg(long)]
    project: Option<String>,
    /// Sheet number to restrict results to. Repeatable.
    #[arg(long = "sheet")]
    sheets: Vec<String>,
    /// Number of results to return.
    #[arg(long, default_value = "10")]
    top_k: usize,
    /// Confidence floor applied during deduplication.
    #[arg(long, default_value = "300")]
    min_score: f64,
    /// Print JSON instead of text.
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl QueryArgs {
    fn search_query(&self) -> SearchQuery {
        SearchQuery {
            text: self.query.clone(),
            discipline: self.discipline.clone(),
            drawing_type: self.drawing_type.clone(),
            project: self.project.clone(),
            sheet_numbers: self.sheets.clone(),
            top_k: self.top_k,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Search drawing excerpts with intent-aware ranking.
    Search {
        #[command(flatten)]
        args: QueryArgs,
    },
    /// Search, then synthesize a material takeoff from the hits.
    Takeoff {
        #[command(flatten)]
        args: QueryArgs,
    },
    /// Show the detected intent, expanded query and boost table.
    Intent {
        #[arg(long)]
        query: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "takeoff-search boot"
    );

    let (args, takeoff) = match &cli.command {
        Command::Intent { query } => {
            print_intent(query);
            return Ok(());
        }
        Command::Search { args } => (args, false),
        Command::Takeoff { args } => (args, true),
    };

    match &cli.embedding_url {
        Some(url) => {
            let embedder =
                HttpEmbedder::new(url, &cli.embedding_model, cli.embedding_api_key.clone())?;
            run_query(&cli, embedder, cli.embedding_dimensions, args, takeoff).await
        }
        None => {
            warn!(
                collection = %cli.qdrant_collection,
                "EMBEDDING_URL is not set; using the local n-gram embedder, which only matches \
                 collections indexed with it"
            );
            let embedder = CharacterNgramEmbedder::default();
            let dimensions = embedder.dimensions;
            run_query(&cli, embedder, dimensions, args, takeoff).await
        }
    }
}

async fn run_query<E>(
    cli: &Cli,
    embedder: E,
    vector_size: usize,
    args: &QueryArgs,
    takeoff: bool,
) -> anyhow::Result<()>
where
    E: EmbeddingProvider + Send + Sync,
{
    let store = QdrantStore::new(&cli.qdrant_url, &cli.qdrant_collection, vector_size)
        .with_distance(cli.qdrant_distance);
    let settings = SearchSettings {
        min_score: args.min_score,
        ..SearchSettings::default()
    };

    let mut coordinator = SearchCoordinator::new(embedder, store).with_settings(settings);
    if let Some(url) = &cli.rerank_url {
        let reranker = HttpReranker::new(url, &cli.rerank_model, cli.rerank_api_key.clone())?;
        coordinator = coordinator.with_reranker(reranker);
    }

    let response = coordinator.search(&args.search_query()).await?;
    for warning in &response.warnings {
        warn!(%warning, "search degraded");
    }

    if takeoff {
        let items = synthesize(&response.hits);
        info!(hits = response.hits.len(), items = items.len(), "takeoff synthesized");
        if args.json {
            println!("{}", serde_json::to_string_pretty(&items)?);
        } else {
            print_takeoff(&items);
        }
    } else if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_hits(&response);
    }

    Ok(())
}

fn print_intent(query: &str) {
    let intent = detect_intent(query);
    println!("intent: {intent}");
    println!("expanded: {}", expand_query(query));
    for (drawing_type, factor) in boost_factors(intent).entries() {
        println!("boost: {drawing_type}={factor:.1}");
    }
}

fn print_hits(response: &SearchResponse) {
    println!("query: {}", response.query);
    println!("intent: {} reranked={}", response.intent, response.reranked);
    if response.sheet_filter_fallback {
        println!("note: no hits on the requested sheets, showing all sheets");
    }
    if response.hits.is_empty() {
        println!("0 results");
    }

    for (rank, hit) in response.hits.iter().enumerate() {
        println!(
            "[{}] score={:.1} sheet={} type={} discipline={} id={}",
            rank + 1,
            hit.score,
            hit.drawing_number,
            hit.drawing_type,
            hit.discipline,
            hit.id
        );
        println!("  {}", hit.text);
        if !hit.dimensions.is_empty() {
            let dimensions: Vec<&str> = hit
                .dimensions
                .iter()
                .map(|dimension| dimension.original.as_str())
                .collect();
            println!("  dimensions: {}", dimensions.join(", "));
        }
        for area in &hit.calculated_areas {
            println!(
                "  area: {:.1} x {:.1} = {} SF",
                area.length, area.width, area.square_feet
            );
        }
        for reference in &hit.cross_references {
            println!("  see {} {}", reference.kind.as_str(), reference.reference);
        }
    }
}

fn print_takeoff(items: &[MaterialTakeoff]) {
    if items.is_empty() {
        println!("no materials found");
        return;
    }

    for item in items {
        let quantity = item
            .quantity
            .map(|quantity| quantity.to_string())
            .unwrap_or_else(|| "-".to_string());
        let unit = item.unit.as_deref().unwrap_or("");
        println!("{} [{}] {} {}", item.material, item.category, quantity, unit);
        if let Some(weight) = item.weight {
            println!("  weight: {weight} lb/ft");
        }
        if let Some(area) = item.area {
            println!("  area: {area} SF");
        }
        if let Some(specification) = &item.specification {
            println!("  spec: {}", specification.replace('\n', " / "));
        }
        if !item.sources.is_empty() {
            let sources: Vec<&str> = item.sources.iter().map(String::as_str).collect();
            println!("  sources: {}", sources.join(", "));
        }
    }
}
