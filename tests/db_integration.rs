use attendance_backend::db;
use attendance_backend::db::{query, writer};
use attendance_backend::models::attendance::{NewAttendance, ReportFilter, STATUS_PRESENT};
use attendance_backend::models::user::Role;
use chrono::{NaiveDate, NaiveTime};
use tempfile::TempDir;

fn setup_test_db() -> (TempDir, rusqlite::Connection) {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("test.db");
    let conn = db::open_or_create(&db_path).unwrap();
    (tmp, conn)
}

fn attendance<'a>(id: &'a str, day: u32) -> NewAttendance<'a> {
    NewAttendance {
        student_id: id,
        date: NaiveDate::from_ymd_opt(2024, 9, day).unwrap(),
        time: NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
        status: STATUS_PRESENT,
        latitude: 0.0,
        longitude: 0.0,
        address: "",
    }
}

#[test]
fn test_roster_file_imported_once() {
    let (tmp, conn) = setup_test_db();
    let csv_path = tmp.path().join("students.csv");
    std::fs::write(&csv_path, "ID,Name,Class\n SV001 , Nguyen Van A ,CNTT1\n,Blank,CNTT1\nSV002,Tran Thi B,\n").unwrap();

    assert_eq!(writer::import_students_csv(&conn, &csv_path).unwrap(), 2);
    // Roster already populated
    std::fs::write(&csv_path, "ID,Name,Class\nSV009,Late Entry,CNTT9\n").unwrap();
    assert_eq!(writer::import_students_csv(&conn, &csv_path).unwrap(), 0);
    assert_eq!(query::count_students(&conn).unwrap(), 2);
    assert_eq!(query::list_classes(&conn).unwrap(), vec!["CNTT1".to_string()]);
}

#[test]
fn test_missing_roster_file_is_not_fatal() {
    let (tmp, conn) = setup_test_db();
    let n = writer::import_students_csv(&conn, &tmp.path().join("absent.csv")).unwrap();
    assert_eq!(n, 0);
}

#[test]
fn test_seeded_accounts() {
    let (_tmp, conn) = setup_test_db();
    writer::insert_student(&conn, "SV001", "Nguyen Van A", Some("CNTT1")).unwrap();
    writer::insert_student(&conn, "SV002", "Tran Thi B", Some("CNTT1")).unwrap();

    assert_eq!(writer::seed_student_users(&conn).unwrap(), 2);
    assert_eq!(writer::seed_student_users(&conn).unwrap(), 0);
    assert!(writer::seed_teacher(&conn, "teacher", "pw").unwrap());
    assert!(!writer::seed_teacher(&conn, "teacher", "other").unwrap());

    let user = query::find_user(&conn, "SV002").unwrap().unwrap();
    assert_eq!(user.role, Role::Student);
    assert_eq!(user.student_id.as_deref(), Some("SV002"));
    assert_ne!(user.password_hash, "SV002");

    let teacher = query::find_user(&conn, "teacher").unwrap().unwrap();
    assert_eq!(teacher.role, Role::Teacher);
    assert!(teacher.student_id.is_none());
    assert!(query::find_user(&conn, "ghost").unwrap().is_none());
}

#[test]
fn test_one_attendance_per_student_per_day() {
    let (_tmp, conn) = setup_test_db();

    assert!(matches!(writer::insert_attendance(&conn, &attendance("SV001", 5)).unwrap(), writer::AttendanceInsert::Inserted(_)));
    assert_eq!(writer::insert_attendance(&conn, &attendance("SV001", 5)).unwrap(), writer::AttendanceInsert::AlreadyCheckedIn);
    assert!(matches!(writer::insert_attendance(&conn, &attendance("SV001", 6)).unwrap(), writer::AttendanceInsert::Inserted(_)));

    let day = NaiveDate::from_ymd_opt(2024, 9, 5).unwrap();
    let rec = query::attendance_on(&conn, "SV001", day).unwrap().unwrap();
    assert_eq!(rec.time, "07:30:00");
    assert!(query::attendance_on(&conn, "SV002", day).unwrap().is_none());
}

#[test]
fn test_report_skips_students_missing_from_roster() {
    let (_tmp, conn) = setup_test_db();
    writer::insert_student(&conn, "SV001", "Nguyen Van A", Some("CNTT1")).unwrap();
    writer::insert_attendance(&conn, &attendance("SV001", 5)).unwrap();
    // Face-matched id with no roster entry is still recorded
    writer::insert_attendance(&conn, &attendance("SV404", 5)).unwrap();

    assert_eq!(query::student_history(&conn, "SV404").unwrap().len(), 1);
    let rows = query::report(&conn, &ReportFilter::default()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].student_id, "SV001");
}

#[test]
fn test_pool_shares_one_database() {
    let tmp = TempDir::new().unwrap();
    let pool = db::create_pool(tmp.path().join("pool.db"), 2).unwrap();
    {
        let conn = pool.get().unwrap();
        writer::insert_student(&conn, "SV001", "Nguyen Van A", None).unwrap();
    }
    let a = pool.get().unwrap();
    let b = pool.get().unwrap();
    assert_eq!(query::count_students(&a).unwrap(), 1);
    assert_eq!(query::count_students(&b).unwrap(), 1);
}
