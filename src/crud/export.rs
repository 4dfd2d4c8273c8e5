//! Spreadsheet export. The whole result set is held in memory while the
//! workbook is written, so export size is bounded by what one response can carry.

use crate::resources::Resource;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_xlsxwriter::{Format, Workbook};

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Debug, Clone)]
pub struct Export {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Write `rows` as one sheet with the resource's export columns.
///
/// # Errors
/// Returns an error if the workbook cannot be written.
pub fn to_xlsx<R: Resource>(rows: &[R], now: DateTime<Utc>) -> Result<Export> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(R::LABEL)?;

    let header = Format::new().set_bold();
    for (col, (_, title)) in R::EXPORT.iter().enumerate() {
        let col = u16::try_from(col).context("too many export columns")?;
        sheet.write_string_with_format(0, col, *title, &header)?;
    }

    for (idx, row) in rows.iter().enumerate() {
        let line = u32::try_from(idx + 1).context("too many rows for one sheet")?;
        for (col, (column, _)) in R::EXPORT.iter().enumerate() {
            let col = u16::try_from(col).context("too many export columns")?;
            let text = row.value(column).map(|value| value.display()).unwrap_or_default();
            sheet.write_string(line, col, text)?;
        }
    }

    Ok(Export {
        filename: format!("{}_{}.xlsx", R::LABEL, now.format("%Y%m%d%H%M%S")),
        content_type: XLSX_CONTENT_TYPE,
        bytes: workbook.save_to_buffer()?,
    })
}
