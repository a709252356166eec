use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::Context;
use attendance_backend::utils::config::Config;
use attendance_backend::utils::logging;
use attendance_backend::db;
use attendance_backend::geocode::Geocoder;
use attendance_backend::recognition::embeddings::EmbeddingStore;
use attendance_backend::recognition::FaceEmbedder;
use attendance_backend::{AppState, CheckinSettings};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cfg = Config::from_env();
    std::fs::create_dir_all(&cfg.data)?;
    if let Some(db_dir) = cfg.db_path.parent() {
        std::fs::create_dir_all(db_dir)?;
    }
    let pool = db::create_pool(&cfg.db_path, cfg.db_pool_size)?;
    info!("Database ready at {:?}", cfg.db_path);

    // Roster is imported into an empty database; missing accounts are added every start
    {
        let pool = pool.clone();
        let csv_path = cfg.students_csv.clone();
        let teacher = cfg.teacher_account.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let conn = pool.get()?;
            db::writer::import_students_csv(&conn, &csv_path)?;
            db::writer::seed_student_users(&conn)?;
            if let Some((username, password)) = teacher {
                if db::writer::seed_teacher(&conn, &username, &password)? {
                    info!("Created teacher account {}", username);
                }
            }
            Ok(())
        }).await??;
    }

    let templates = EmbeddingStore::load(&cfg.embeddings_path)
        .with_context(|| format!("Failed to load face templates from {:?}", cfg.embeddings_path))?;
    info!("Loaded {} face templates for {} students", templates.len(), templates.students());
    if templates.is_empty() {
        warn!("No face templates enrolled; every check-in will be rejected");
    }

    let embedder = build_embedder(&cfg).await;

    let geocoder = Geocoder::new(cfg.geocoder_url.clone(), &cfg.geocoder_user_agent, cfg.geocoder_timeout)?;
    if !geocoder.is_enabled() {
        info!("Reverse geocoding disabled");
    }

    let checkin = CheckinSettings { match_threshold: cfg.match_threshold, image_size: cfg.image_size };
    let state = Arc::new(AppState::new(pool, templates, embedder, geocoder, checkin));

    let app = attendance_backend::api::routes::router(state.clone());
    let addr = SocketAddr::from(([0,0,0,0], cfg.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening" = %addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(feature = "facial-recognition")]
async fn build_embedder(cfg: &Config) -> Arc<dyn FaceEmbedder> {
    use attendance_backend::recognition::face::FaceProcessor;
    let mut processor = FaceProcessor::new(cfg.models_dir(), cfg.face_auto_download, cfg.face_confidence)
        .with_hf_token(cfg.hf_token.clone());
    if let Err(e) = processor.initialize().await {
        tracing::error!("Failed to initialize face processor: {:#}", e);
    }
    Arc::new(processor)
}

#[cfg(not(feature = "facial-recognition"))]
async fn build_embedder(_cfg: &Config) -> Arc<dyn FaceEmbedder> {
    warn!("Built without facial-recognition; check-in is unavailable");
    Arc::new(attendance_backend::recognition::UnavailableEmbedder)
}
