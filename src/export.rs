use anyhow::Result;
use rust_xlsxwriter::{Format, Workbook};

use crate::models::attendance::ReportRow;

pub const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const HEADERS: [&str; 9] = [
    "student_id", "name", "class", "date", "time", "status", "latitude", "longitude", "address",
];

/// Render report rows as a single-sheet workbook held in memory.
pub fn report_to_xlsx(rows: &[ReportRow]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Attendance")?;

    let header = Format::new().set_bold();
    for (col, title) in HEADERS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *title, &header)?;
    }

    for (i, r) in rows.iter().enumerate() {
        let row = i as u32 + 1;
        worksheet.write_string(row, 0, &r.student_id)?;
        worksheet.write_string(row, 1, &r.name)?;
        worksheet.write_string(row, 2, r.class_name.as_deref().unwrap_or(""))?;
        worksheet.write_string(row, 3, &r.date)?;
        worksheet.write_string(row, 4, &r.time)?;
        worksheet.write_string(row, 5, &r.status)?;
        worksheet.write_number(row, 6, r.latitude)?;
        worksheet.write_number(row, 7, r.longitude)?;
        worksheet.write_string(row, 8, &r.address)?;
    }

    worksheet.set_column_width(1, 24.0)?;
    worksheet.set_column_width(8, 60.0)?;

    Ok(workbook.save_to_buffer()?)
}

/// `export_<class>_<date>.xlsx`, with `all` standing in for an absent filter.
pub fn export_filename(class_name: Option<&str>, date: Option<&str>) -> String {
    let clean = |s: Option<&str>| -> String {
        match s.map(str::trim).filter(|s| !s.is_empty()) {
            Some(v) => v
                .chars()
                .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                .collect(),
            None => "all".to_string(),
        }
    };
    format!("export_{}_{}.xlsx", clean(class_name), clean(date))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str) -> ReportRow {
        ReportRow {
            student_id: id.to_string(),
            name: "Nguyen Van A".to_string(),
            class_name: Some("CNTT1".to_string()),
            date: "2024-09-05".to_string(),
            time: "07:30:00".to_string(),
            status: "present".to_string(),
            latitude: 21.0285,
            longitude: 105.8542,
            address: "Hoan Kiem, Ha Noi".to_string(),
        }
    }

    #[test]
    fn workbook_is_a_zip_container() {
        let bytes = report_to_xlsx(&[row("SV001"), row("SV002")]).unwrap();
        assert!(bytes.len() > 100);
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn empty_report_still_produces_a_workbook() {
        let bytes = report_to_xlsx(&[]).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn filename_uses_filters_or_all() {
        assert_eq!(export_filename(Some("CNTT1"), Some("2024-09-05")), "export_CNTT1_2024-09-05.xlsx");
        assert_eq!(export_filename(None, None), "export_all_all.xlsx");
        assert_eq!(export_filename(Some(" "), Some("2024-09-05")), "export_all_2024-09-05.xlsx");
        assert_eq!(export_filename(Some("../etc"), None), "export____etc_all.xlsx");
    }
}
