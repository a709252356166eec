use serde::{Deserialize, Serialize};

/// Status written for a successful face-verified check-in.
pub const STATUS_PRESENT: &str = "present";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub date: String,
    pub time: String,
    pub status: String,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct NewAttendance<'a> {
    pub student_id: &'a str,
    pub date: chrono::NaiveDate,
    pub time: chrono::NaiveTime,
    pub status: &'a str,
    pub latitude: f64,
    pub longitude: f64,
    pub address: &'a str,
}

/// Attendance joined with the student roster, as shown to teachers and
/// written into the spreadsheet export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRow {
    pub student_id: String,
    pub name: String,
    #[serde(rename = "class")]
    pub class_name: Option<String>,
    pub date: String,
    pub time: String,
    pub status: String,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub class_name: Option<String>,
    pub date: Option<chrono::NaiveDate>,
}
