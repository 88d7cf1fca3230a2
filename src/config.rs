use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

/// process-wide configuration, loaded once at startup
#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub milvus_url: String,
    pub milvus_token: Option<String>,
    pub milvus_collection: String,
    pub mongo_uri: String,
    pub mongo_db: String,
    pub embedding_url: String,
    pub embedding_api_key: Option<String>,
    pub embedding_model: String,
    /// root of the keyframe jpeg tree
    pub data_folder: PathBuf,
    /// newline-separated object class names
    pub object_classes_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("failed to parse PORT")?,
            milvus_url: env::var("MILVUS_URL")
                .unwrap_or_else(|_| "http://localhost:19530".to_string()),
            milvus_token: env::var("MILVUS_TOKEN").ok(),
            milvus_collection: env::var("MILVUS_COLLECTION")
                .unwrap_or_else(|_| "keyframe".to_string()),
            mongo_uri: env::var("MONGO_URI").context("MONGO_URI must be set")?,
            mongo_db: env::var("MONGO_DB").unwrap_or_else(|_| "keyframes".to_string()),
            embedding_url: env::var("EMBEDDING_URL").context("EMBEDDING_URL must be set")?,
            embedding_api_key: env::var("EMBEDDING_API_KEY").ok(),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "clip-vit-h-14".to_string()),
            data_folder: env::var("DATA_FOLDER")
                .context("DATA_FOLDER must be set")?
                .into(),
            object_classes_path: env::var("OBJECT_CLASSES_PATH")
                .context("OBJECT_CLASSES_PATH must be set")?
                .into(),
        })
    }
}
