pub mod utils;
pub mod models;
pub mod db;
pub mod recognition;
pub mod geocode;
pub mod export;
pub mod api;

use std::sync::Arc;

use recognition::embeddings::EmbeddingStore;
use recognition::FaceEmbedder;

/// Check-in tunables taken from the configuration.
#[derive(Clone, Debug)]
pub struct CheckinSettings {
    pub match_threshold: f32,
    pub image_size: u32,
}

impl Default for CheckinSettings {
    fn default() -> Self {
        Self { match_threshold: 0.5, image_size: 480 }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub started_at: std::time::Instant,
    pub pool: db::DbPool,
    pub templates: Arc<EmbeddingStore>,
    pub embedder: Arc<dyn FaceEmbedder>,
    pub geocoder: geocode::Geocoder,
    pub checkin: CheckinSettings,
}

impl AppState {
    pub fn new(
        pool: db::DbPool,
        templates: EmbeddingStore,
        embedder: Arc<dyn FaceEmbedder>,
        geocoder: geocode::Geocoder,
        checkin: CheckinSettings,
    ) -> Self {
        Self {
            started_at: std::time::Instant::now(),
            pool,
            templates: Arc::new(templates),
            embedder,
            geocoder,
            checkin,
        }
    }
}
