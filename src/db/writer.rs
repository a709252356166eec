use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

use crate::models::attendance::NewAttendance;
use crate::models::user::Role;
use crate::utils::password::hash_password;

/// One line of the roster CSV (`ID,Name,Class`).
#[derive(Debug, Deserialize)]
struct RosterRow {
    #[serde(rename = "ID")]
    student_id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Class", default)]
    class_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceInsert {
    Inserted(i64),
    AlreadyCheckedIn,
}

pub fn insert_student(conn: &Connection, student_id: &str, name: &str, class_name: Option<&str>) -> Result<()> {
    conn.execute(
        "INSERT INTO students (student_id, name, class_name) VALUES (?1, ?2, ?3)",
        params![student_id, name, class_name],
    )?;
    Ok(())
}

/// Load the roster from any CSV source in a single transaction. Rows with an
/// empty id are skipped.
pub fn import_students<R: std::io::Read>(conn: &Connection, reader: R) -> Result<usize> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let tx = conn.unchecked_transaction()?;
    let mut imported = 0;
    for row in rdr.deserialize::<RosterRow>() {
        let row = row.context("Malformed roster row")?;
        if row.student_id.is_empty() {
            continue;
        }
        let class_name = row.class_name.as_deref().filter(|c| !c.is_empty());
        // Duplicate ids are ignored and not counted
        imported += tx.execute(
            "INSERT OR IGNORE INTO students (student_id, name, class_name) VALUES (?1, ?2, ?3)",
            params![row.student_id, row.name, class_name],
        )?;
    }
    tx.commit()?;
    Ok(imported)
}

/// Import `students.csv` the first time the service starts. Does nothing when
/// the roster is already populated or the file is absent.
pub fn import_students_csv(conn: &Connection, path: &Path) -> Result<usize> {
    if crate::db::query::count_students(conn)? > 0 {
        return Ok(0);
    }
    if !path.exists() {
        warn!("Roster file {:?} not found; starting with an empty student list", path);
        return Ok(0);
    }
    let file = std::fs::File::open(path).context(format!("Failed to open roster {:?}", path))?;
    let n = import_students(conn, file)?;
    info!("Imported {} students from {:?}", n, path);
    Ok(n)
}

pub fn insert_user(conn: &Connection, username: &str, password: &str, role: Role, student_id: Option<&str>) -> Result<i64> {
    conn.execute(
        "INSERT INTO users (username, password_hash, role, student_id) VALUES (?1, ?2, ?3, ?4)",
        params![username, hash_password(password)?, role.as_str(), student_id],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Give every roster student that has no login yet an account whose username
/// and initial password are the student id. Existing accounts are untouched.
pub fn seed_student_users(conn: &Connection) -> Result<usize> {
    let ids: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT s.student_id FROM students s
             WHERE NOT EXISTS (
               SELECT 1 FROM users u WHERE u.student_id = s.student_id OR u.username = s.student_id
             )
             ORDER BY s.student_id",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()?
    };
    if ids.is_empty() {
        return Ok(0);
    }
    let tx = conn.unchecked_transaction()?;
    for id in &ids {
        insert_user(&tx, id, id, Role::Student, Some(id))?;
    }
    tx.commit()?;
    info!("Seeded {} student accounts", ids.len());
    Ok(ids.len())
}

/// Create the teacher account if it does not exist yet. Returns true when a
/// row was written.
pub fn seed_teacher(conn: &Connection, username: &str, password: &str) -> Result<bool> {
    if crate::db::query::find_user(conn, username)?.is_some() {
        return Ok(false);
    }
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO users (username, password_hash, role, student_id) VALUES (?1, ?2, ?3, NULL)",
        params![username, hash_password(password)?, Role::Teacher.as_str()],
    )?;
    Ok(inserted > 0)
}

pub fn insert_attendance(conn: &Connection, new: &NewAttendance<'_>) -> Result<AttendanceInsert> {
    let res = conn.execute(
        "INSERT INTO attendance (student_id, date, time, status, latitude, longitude, address)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            new.student_id,
            new.date.format("%Y-%m-%d").to_string(),
            new.time.format("%H:%M:%S").to_string(),
            new.status,
            new.latitude,
            new.longitude,
            new.address,
        ],
    );
    match res {
        Ok(_) => Ok(AttendanceInsert::Inserted(conn.last_insert_rowid())),
        // The (student_id, date) unique index closes the gap between the
        // duplicate pre-check and this insert.
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE => {
            Ok(AttendanceInsert::AlreadyCheckedIn)
        }
        Err(e) => Err(e.into()),
    }
}
