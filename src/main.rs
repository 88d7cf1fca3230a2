mod config;
mod embedding;
mod error;
mod fusion;
mod metadata;
mod milvus;
mod neighbors;
mod path;
mod providers;
mod request;
mod search;
#[cfg(test)]
mod testutil;
mod translate;

use actix_cors::Cors;
use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use anyhow::Result;
use opentelemetry_instrumentation_actix_web::{RequestMetrics, RequestTracing};
use serde::Deserialize;
use tracing::level_filters::LevelFilter;

use config::Config;
use embedding::RemoteEmbedder;
use metadata::MongoMetadataStore;
use milvus::MilvusIndex;
use search::SearchEngine;
use translate::GoogleTranslator;

/// the concrete engine wired at startup; handlers only ever see this alias
pub type AppEngine = SearchEngine<MilvusIndex, MongoMetadataStore, RemoteEmbedder, GoogleTranslator>;

/// served when a keyframe file is missing on disk
static PLACEHOLDER_JPEG: &[u8] = include_bytes!("../static/placeholder.jpg");

async fn index() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(include_str!("../static/index.html"))
}

#[derive(Debug, Deserialize)]
struct ImgQuery {
    fpath: String,
}

/// GET /keyframe/get_img — serve a keyframe jpeg, placeholder on miss
async fn get_img(query: web::Query<ImgQuery>) -> HttpResponse {
    match tokio::fs::read(&query.fpath).await {
        Ok(bytes) => HttpResponse::Ok().content_type("image/jpeg").body(bytes),
        Err(_) => HttpResponse::Ok()
            .content_type("image/jpeg")
            .body(PLACEHOLDER_JPEG),
    }
}

/// GET /keyframe/objects — the known object class names
async fn objects(config: web::Data<Config>) -> HttpResponse {
    match tokio::fs::read_to_string(&config.object_classes_path).await {
        Ok(body) => {
            let classes: Vec<&str> = body
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect();
            HttpResponse::Ok().json(serde_json::json!({ "classes": classes }))
        }
        Err(e) => {
            let error = e.to_string();
            logfire::error!("object classes file unreadable", error = error);
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": "object classes unavailable" }))
        }
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // initialize logfire with info level filter to exclude trace/debug spans
    let logfire = logfire::configure()
        .with_default_level_filter(LevelFilter::INFO)
        .finish()
        .map_err(|e| anyhow::anyhow!("failed to initialize logfire: {}", e))?;

    let _guard = logfire.shutdown_guard();

    let config = Config::from_env()?;
    let host = config.host.clone();
    let port = config.port;

    let store = MongoMetadataStore::connect(&config.mongo_uri, &config.mongo_db)
        .await
        .map_err(|e| anyhow::anyhow!("failed to connect to mongodb: {}", e))?;
    let vector = MilvusIndex::new(
        config.milvus_url.clone(),
        config.milvus_token.clone(),
        config.milvus_collection.clone(),
    );
    let embedder = RemoteEmbedder::new(
        config.embedding_url.clone(),
        config.embedding_api_key.clone(),
        config.embedding_model.clone(),
    );
    let translator = GoogleTranslator::new();

    let engine = SearchEngine::new(vector, store, embedder, translator, config.data_folder.clone())
        .await
        .map_err(|e| anyhow::anyhow!("failed to initialize search engine: {}", e))?;

    logfire::info!(
        "starting keyframe search server",
        host = &host,
        port = port as i64,
        total_keyframes = engine.total_keyframes() as i64
    );

    let engine = web::Data::new(engine);

    // rate limiter: interactive search UI, ~4 requests per second per IP
    let governor_conf = GovernorConfigBuilder::default()
        .milliseconds_per_request(250)
        .burst_size(20)
        .finish()
        .unwrap();

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            // opentelemetry tracing and metrics FIRST
            .wrap(RequestTracing::new())
            .wrap(RequestMetrics::default())
            // existing middleware
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(web::Data::new(config.clone()))
            .app_data(engine.clone())
            .route("/", web::get().to(index))
            .route("/health", web::get().to(|| async { HttpResponse::Ok().body("ok") }))
            .service(
                web::scope("/keyframe")
                    .wrap(Governor::new(&governor_conf))
                    .route("/", web::get().to(search::search_get))
                    .route("/search", web::post().to(search::search))
                    .route("/imgsearch", web::get().to(neighbors::image_search))
                    .route("/neighbors", web::get().to(neighbors::get_neighbors))
                    .route("/get_img", web::get().to(get_img))
                    .route("/objects", web::get().to(objects)),
            )
            .service(actix_files::Files::new("/static", "./static"))
    })
    .bind((host.as_str(), port))?
    .run()
    .await?;

    Ok(())
}
