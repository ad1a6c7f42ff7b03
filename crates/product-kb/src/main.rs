//! Product Knowledge Engine - entry point.
//!
//! Wires configuration, the fact store, the vector index, the embedding
//! and explanation clients, the retrieval router, and monitoring, then
//! dispatches to one of the operator subcommands.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use asupersync::Cx;
use asupersync::runtime::RuntimeBuilder;
use clap::{Parser, Subcommand};
use product_kb_core::Config;
use product_kb_db::{DbPool, DbPoolConfig, create_pool};
use product_kb_ingest::{
    ExplanationClient, HttpExplanationClient, HttpExplanationConfig, IngestPipeline, IngestRequest,
    StubExplanationClient,
};
use product_kb_monitor::{DriftRunner, DriftScheduler, LineageWriter, LineageWriterConfig};
use product_kb_retrieval::{
    ComparisonMaterializer, RetrievalFilters, RetrievalRequest, RetrievalRouter,
};
use product_kb_search::{Embedder, HttpEmbedder, HttpEmbedderConfig, IndexManager};
use product_kb_server::HttpState;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "product-kb")]
#[command(version, about = "Product Knowledge Engine server and operator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server (and the drift scheduler)
    Serve,
    /// Ingest a brochure Markdown file into a tenant/product
    Ingest {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        product: String,
        /// Path to the extracted Markdown brochure
        file: String,
        #[arg(long, default_value = "cli")]
        operator: String,
        #[arg(long)]
        overwrite: bool,
        #[arg(long)]
        publish: bool,
    },
    /// Ask a question against a tenant's published knowledge
    Query {
        #[arg(long)]
        tenant_id: i64,
        #[arg(long, value_delimiter = ',')]
        product_ids: Vec<i64>,
        question: String,
    },
    /// Publish a draft campaign
    Publish {
        #[arg(long)]
        tenant_id: i64,
        #[arg(long)]
        campaign_id: i64,
        #[arg(long, default_value = "cli")]
        approved_by: String,
    },
    /// Run drift checks for one tenant (or all)
    DriftCheck {
        #[arg(long)]
        tenant_id: Option<i64>,
    },
}

struct Engine {
    config: Config,
    pool: DbPool,
    pipeline: Arc<IngestPipeline>,
    router: Arc<RetrievalRouter>,
    drift: Arc<DriftRunner>,
    lineage: Arc<LineageWriter>,
}

fn build_engine(config: Config) -> Result<Engine, String> {
    let pool = create_pool(&DbPoolConfig {
        database_url: config.database_url.clone(),
        acquire_timeout_ms: config.db_timeout_ms,
        ..DbPoolConfig::from_env()
    })
    .map_err(|e| e.to_string())?;

    let index = Arc::new(IndexManager::new(
        config.index_root.clone(),
        config.embedding_dimension,
    ));

    let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(HttpEmbedderConfig {
        endpoint: config.embedding_endpoint.clone(),
        api_key: config.embedding_api_key.clone(),
        model: config.embedding_model.clone(),
        version: config.embedding_version.clone(),
        dimension: config.embedding_dimension,
        timeout_ms: config.embedding_timeout_ms,
    }));

    let explainer: Arc<dyn ExplanationClient> = if config.llm_stub {
        Arc::new(StubExplanationClient)
    } else {
        Arc::new(HttpExplanationClient::new(HttpExplanationConfig {
            endpoint: config.llm_endpoint.clone(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
            timeout_ms: config.llm_timeout_ms,
        }))
    };

    let lineage = LineageWriter::start(
        pool.clone(),
        LineageWriterConfig {
            capacity: config.lineage_queue_capacity,
            flush_batch: config.lineage_flush_batch,
            flush_interval: Duration::from_millis(config.lineage_flush_interval_ms),
        },
    );

    let pipeline = Arc::new(IngestPipeline::new(
        pool.clone(),
        Arc::clone(&index),
        Arc::clone(&embedder),
        explainer,
        lineage.clone(),
        config.clone(),
    ));

    let comparisons = Arc::new(ComparisonMaterializer::new(
        Some(pool.clone()),
        Duration::from_secs(config.comparison_cache_ttl_secs),
        256,
    ));

    let router = Arc::new(RetrievalRouter::new(
        pool.clone(),
        index,
        embedder,
        lineage.clone(),
        comparisons,
        config.clone(),
    ));

    let drift = Arc::new(DriftRunner::new(pool.clone(), config.clone()));

    Ok(Engine {
        config,
        pool,
        pipeline,
        router,
        drift,
        lineage,
    })
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = Config::from_env();
    let engine = match build_engine(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("startup failed: {e}");
            std::process::exit(1);
        }
    };

    let exit = run_command(cli.command, &engine);
    engine.lineage.shutdown();
    std::process::exit(exit);
}

fn run_command(command: Commands, engine: &Engine) -> i32 {
    match command {
        Commands::Serve => {
            let scheduler = DriftScheduler::start(
                Arc::clone(&engine.drift),
                Duration::from_secs(engine.config.drift_interval_secs),
            );
            let state = Arc::new(HttpState {
                config: engine.config.clone(),
                pool: engine.pool.clone(),
                router: Arc::clone(&engine.router),
                pipeline: Arc::clone(&engine.pipeline),
                drift: Arc::clone(&engine.drift),
                lineage: engine.lineage.clone(),
            });
            let result = product_kb_server::run_http(state);
            scheduler.stop();
            match result {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("server error: {e}");
                    1
                }
            }
        }
        Commands::Ingest {
            tenant,
            product,
            file,
            operator,
            overwrite,
            publish,
        } => block_on_cli(|cx, rt_engine| async move {
            let markdown = std::fs::read_to_string(&file)
                .map_err(|e| format!("cannot read {file}: {e}"))?;
            let tenant_row = product_kb_db::queries::ensure_tenant(&cx, &rt_engine.pool, &tenant)
                .await
                .into_result()
                .map_err(|e| e.to_string())?;
            let product_row = product_kb_db::queries::ensure_product(
                &cx,
                &rt_engine.pool,
                tenant_row.id.unwrap_or_default(),
                &product,
                None,
            )
            .await
            .into_result()
            .map_err(|e| e.to_string())?;

            let outcome = rt_engine
                .pipeline
                .ingest(
                    &cx,
                    IngestRequest {
                        tenant_id: tenant_row.id.unwrap_or_default(),
                        product_id: product_row.id.unwrap_or_default(),
                        campaign_id: None,
                        markdown,
                        document_source_id: None,
                        source_uri: file.clone(),
                        operator,
                        overwrite,
                        auto_publish: publish,
                        job_id: None,
                    },
                )
                .await
                .into_result()
                .map_err(|e| e.to_string())?;
            println!("{}", serde_json::to_string_pretty(&outcome).unwrap_or_default());
            Ok(())
        }, engine),
        Commands::Query {
            tenant_id,
            product_ids,
            question,
        } => block_on_cli(|cx, rt_engine| async move {
            let response = rt_engine
                .router
                .query(
                    &cx,
                    &RetrievalRequest {
                        tenant_id,
                        product_ids,
                        campaign_variant_id: None,
                        question,
                        intent_hint: None,
                        filters: RetrievalFilters::default(),
                        max_chunks: 0,
                        include_lineage: false,
                    },
                )
                .await
                .into_result()
                .map_err(|e| e.to_string())?;
            println!("{}", serde_json::to_string_pretty(&response).unwrap_or_default());
            Ok(())
        }, engine),
        Commands::Publish {
            tenant_id,
            campaign_id,
            approved_by,
        } => block_on_cli(|cx, rt_engine| async move {
            let row = product_kb_ingest::publish(
                &cx,
                &rt_engine.pool,
                rt_engine.lineage.as_ref(),
                tenant_id,
                campaign_id,
                None,
                &approved_by,
            )
            .await
            .into_result()
            .map_err(|e| e.to_string())?;
            println!("published campaign {} at v{}", campaign_id, row.version);
            Ok(())
        }, engine),
        Commands::DriftCheck { tenant_id } => block_on_cli(|cx, rt_engine| async move {
            let results = match tenant_id {
                Some(id) => vec![(
                    id,
                    rt_engine
                        .drift
                        .run_for_tenant(&cx, id)
                        .await
                        .into_result()
                        .map_err(|e| e.to_string())?,
                )],
                None => rt_engine
                    .drift
                    .run_all(&cx)
                    .await
                    .into_result()
                    .map_err(|e| e.to_string())?,
            };
            println!("{}", serde_json::to_string_pretty(&results).unwrap_or_default());
            Ok(())
        }, engine),
    }
}

/// Run one async CLI action on a fresh current-thread runtime.
fn block_on_cli<'a, F, Fut>(f: F, engine: &'a Engine) -> i32
where
    F: FnOnce(Cx, &'a Engine) -> Fut,
    Fut: std::future::Future<Output = Result<(), String>>,
{
    let rt = match RuntimeBuilder::current_thread().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("runtime error: {e}");
            return 1;
        }
    };
    let cx = Cx::for_request();
    match rt.block_on(f(cx, engine)) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{e}");
            1
        }
    }
}
