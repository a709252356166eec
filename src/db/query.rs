use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::attendance::{AttendanceRecord, ReportFilter, ReportRow};
use crate::models::user::{Role, User};

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        student_id: row.get("student_id")?,
        date: row.get("date")?,
        time: row.get("time")?,
        status: row.get("status")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        address: row.get("address")?,
    })
}

fn row_to_report(row: &Row<'_>) -> rusqlite::Result<ReportRow> {
    Ok(ReportRow {
        student_id: row.get("student_id")?,
        name: row.get("name")?,
        class_name: row.get("class_name")?,
        date: row.get("date")?,
        time: row.get("time")?,
        status: row.get("status")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        address: row.get("address")?,
    })
}

pub fn count_students(conn: &Connection) -> Result<i64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))?;
    Ok(n)
}

pub fn find_user(conn: &Connection, username: &str) -> Result<Option<User>> {
    let mut stmt = conn.prepare("SELECT id, username, password_hash, role, student_id FROM users WHERE username = ?1")?;
    let user = stmt
        .query_row(params![username], |row| {
            let role: String = row.get(3)?;
            Ok(User {
                id: row.get(0)?,
                username: row.get(1)?,
                password_hash: row.get(2)?,
                role: Role::parse(&role),
                student_id: row.get(4)?,
            })
        })
        .optional()?;
    Ok(user)
}

pub fn attendance_on(conn: &Connection, student_id: &str, date: chrono::NaiveDate) -> Result<Option<AttendanceRecord>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, date, time, status, latitude, longitude, address
         FROM attendance WHERE student_id = ?1 AND date = ?2",
    )?;
    let rec = stmt
        .query_row(params![student_id, date.format("%Y-%m-%d").to_string()], row_to_record)
        .optional()?;
    Ok(rec)
}

pub fn student_history(conn: &Connection, student_id: &str) -> Result<Vec<AttendanceRecord>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, date, time, status, latitude, longitude, address
         FROM attendance WHERE student_id = ?1 ORDER BY date, time",
    )?;
    let items = stmt
        .query_map(params![student_id], row_to_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(items)
}

/// Attendance joined with the roster. Rows whose student is no longer on the
/// roster are left out.
pub fn report(conn: &Connection, filter: &ReportFilter) -> Result<Vec<ReportRow>> {
    let date = filter.date.map(|d| d.format("%Y-%m-%d").to_string());
    let mut stmt = conn.prepare(
        "SELECT a.student_id, s.name, s.class_name, a.date, a.time, a.status, a.latitude, a.longitude, a.address
         FROM attendance a
         INNER JOIN students s ON a.student_id = s.student_id
         WHERE (?1 IS NULL OR s.class_name = ?1)
           AND (?2 IS NULL OR a.date = ?2)
         ORDER BY a.date, a.time",
    )?;
    let items = stmt
        .query_map(params![filter.class_name, date], row_to_report)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(items)
}

pub fn list_classes(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT class_name FROM students WHERE class_name IS NOT NULL ORDER BY class_name",
    )?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
