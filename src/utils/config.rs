use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org/reverse";
pub const DEFAULT_GEOCODER_USER_AGENT: &str = "AttendanceApp/1.0 (contact@example.com)";

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub data: PathBuf,
    pub db_path: PathBuf,
    pub db_pool_size: u32,
    pub students_csv: PathBuf,
    pub embeddings_path: PathBuf,
    pub match_threshold: f32,
    pub image_size: u32,
    pub geocoder_url: Option<String>,
    pub geocoder_user_agent: String,
    pub geocoder_timeout: Duration,
    pub teacher_account: Option<(String, String)>,
    pub face_auto_download: bool,
    pub face_confidence: f32,
    /// Bearer token for gated model downloads.
    pub hf_token: Option<String>,
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let data = PathBuf::from(env::var("ATTEND_DATA").unwrap_or_else(|_| "./data".to_string()));
        let db_path = env::var("ATTEND_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data.join("db").join("attendance.db"));
        let students_csv = env::var("ATTEND_STUDENTS_CSV").unwrap_or_else(|_| "students.csv".to_string());
        let embeddings_path = env::var("ATTEND_EMBEDDINGS").unwrap_or_else(|_| "embeddings.json".to_string());
        // An explicitly empty URL turns reverse geocoding off
        let geocoder_url = match env::var("ATTEND_GEOCODER_URL") {
            Ok(v) if v.trim().is_empty() => None,
            Ok(v) => Some(v),
            Err(_) => Some(DEFAULT_GEOCODER_URL.to_string()),
        };
        let geocoder_user_agent = env::var("ATTEND_GEOCODER_USER_AGENT")
            .unwrap_or_else(|_| DEFAULT_GEOCODER_USER_AGENT.to_string());
        let teacher_account = match (env::var("ATTEND_TEACHER_USERNAME"), env::var("ATTEND_TEACHER_PASSWORD")) {
            (Ok(u), Ok(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        };
        let face_auto_download = env::var("ATTEND_FACE_AUTO_DOWNLOAD")
            .map(|v| !matches!(v.as_str(), "0" | "false" | "FALSE"))
            .unwrap_or(true);
        let hf_token = env::var("ATTEND_HF_TOKEN").ok().filter(|t| !t.trim().is_empty());
        Self {
            port: parsed("ATTEND_PORT", 5000),
            data,
            db_path,
            db_pool_size: parsed("ATTEND_DB_POOL_SIZE", 8),
            students_csv: PathBuf::from(students_csv),
            embeddings_path: PathBuf::from(embeddings_path),
            match_threshold: parsed("ATTEND_MATCH_THRESHOLD", 0.5),
            image_size: parsed("ATTEND_IMAGE_SIZE", 480),
            geocoder_url,
            geocoder_user_agent,
            geocoder_timeout: Duration::from_secs(parsed("ATTEND_GEOCODER_TIMEOUT_SECS", 10)),
            teacher_account,
            face_auto_download,
            face_confidence: parsed("ATTEND_FACE_CONFIDENCE", 0.5),
            hf_token,
        }
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data.join("models")
    }
}
