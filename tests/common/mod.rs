#![allow(dead_code)]

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use attendance_backend::db::{self, DbPool};
use attendance_backend::geocode::Geocoder;
use attendance_backend::recognition::embeddings::EmbeddingStore;
use attendance_backend::recognition::FaceEmbedder;
use attendance_backend::{api::routes, AppState, CheckinSettings};

pub const TEST_ADDRESS: &str = "Hoan Kiem, Ha Noi, Viet Nam";

/// Create a temporary pooled SQLite database with two classes of students
/// and their seeded accounts.
pub fn setup_test_pool() -> (TempDir, DbPool) {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("db").join("attendance.db");
    std::fs::create_dir_all(db_path.parent().unwrap()).unwrap();
    let pool = db::create_pool(&db_path, 4).unwrap();
    {
        let conn = pool.get().unwrap();
        let roster = "ID,Name,Class\nSV001,Nguyen Van A,CNTT1\nSV002,Tran Thi B,CNTT1\nSV003,Le Van C,CNTT2\n";
        db::writer::import_students(&conn, roster.as_bytes()).unwrap();
        db::writer::seed_student_users(&conn).unwrap();
        db::writer::seed_teacher(&conn, "teacher", "secret").unwrap();
    }
    (tmp, pool)
}

/// Returns a fixed embedding for every image, or no face at all.
pub struct StubEmbedder(pub Option<Vec<f32>>);

impl FaceEmbedder for StubEmbedder {
    fn embed(&self, _image: &image::DynamicImage) -> anyhow::Result<Option<Vec<f32>>> {
        Ok(self.0.clone())
    }
}

/// SV001 and SV002 enrolled with orthogonal templates.
pub fn test_templates() -> EmbeddingStore {
    EmbeddingStore::from_json(r#"{"SV001": [1.0, 0.0, 0.0], "SV002": [[0.0, 1.0, 0.0], [0.0, 0.9, 0.1]]}"#).unwrap()
}

pub fn create_test_app_state(pool: DbPool, embedder: Arc<dyn FaceEmbedder>, geocoder: Geocoder) -> Arc<AppState> {
    let checkin = CheckinSettings { match_threshold: 0.5, image_size: 64 };
    Arc::new(AppState::new(pool, test_templates(), embedder, geocoder, checkin))
}

pub async fn spawn_app(state: Arc<AppState>) -> u16 {
    let app = routes::router(state);
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    port
}

/// Minimal Nominatim stand-in answering `/reverse` with a fixed address.
pub async fn mock_geocoder() -> Geocoder {
    use axum::{routing::get, Json, Router};
    let app = Router::new().route(
        "/reverse",
        get(|| async { Json(serde_json::json!({ "display_name": TEST_ADDRESS })) }),
    );
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    Geocoder::new(
        Some(format!("http://127.0.0.1:{}/reverse", port)),
        "attendance-tests",
        Duration::from_secs(5),
    )
    .unwrap()
}

/// A small valid PNG standing in for a selfie.
pub fn test_image_bytes() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(32, 32, image::Rgb([180, 140, 120])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Png).unwrap();
    buf
}

pub fn checkin_form(student_id: &str, image: Vec<u8>) -> reqwest::multipart::Form {
    reqwest::multipart::Form::new()
        .text("student_id", student_id.to_string())
        .text("latitude", "21.0285")
        .text("longitude", "105.8542")
        .part("image", reqwest::multipart::Part::bytes(image).file_name("selfie.png"))
}

pub struct TestApp {
    pub _tmp: TempDir,
    pub pool: DbPool,
    pub base: String,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn start(embedding: Option<Vec<f32>>) -> Self {
        Self::with_embedder(Arc::new(StubEmbedder(embedding))).await
    }

    pub async fn with_embedder(embedder: Arc<dyn FaceEmbedder>) -> Self {
        let (tmp, pool) = setup_test_pool();
        let geocoder = mock_geocoder().await;
        let state = create_test_app_state(pool.clone(), embedder, geocoder);
        let port = spawn_app(state).await;
        Self {
            _tmp: tmp,
            pool,
            base: format!("http://127.0.0.1:{}", port),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn checkin(&self, student_id: &str) -> reqwest::Response {
        self.client
            .post(self.url("/checkin"))
            .multipart(checkin_form(student_id, test_image_bytes()))
            .send()
            .await
            .unwrap()
    }
}
