//! Spreadsheet and printable exports.
//!
//! Both exports render fully in memory and are then written atomically into
//! the chosen directory, so an interrupted export never leaves a truncated
//! file behind under the final name.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::error::CrmError;
use crate::stats::MonthKey;

pub mod csv;
pub mod pdf;

/// `kobber_leads_dd-mm-yyyy.csv`, dated the day of the export.
pub fn csv_filename(date: NaiveDate) -> String {
    format!("kobber_leads_{}.csv", date.format("%d-%m-%Y"))
}

/// `kobber_relatorio_YYYY-MM.pdf`, named after the reported month.
pub fn pdf_filename(month: MonthKey) -> String {
    format!("kobber_relatorio_{}.pdf", month)
}

/// Atomically write an export into `dir`. Returns the final path.
pub fn write_export(dir: &Path, file_name: &str, content: &[u8]) -> Result<PathBuf, CrmError> {
    if !dir.is_dir() {
        return Err(CrmError::Export(format!(
            "Output directory does not exist: {}",
            dir.display()
        )));
    }
    let path = dir.join(file_name);
    crate::util::atomic_write(&path, content)
        .map_err(|e| CrmError::Export(format!("Failed to write {}: {}", path.display(), e)))?;
    log::info!("Exported {} ({} bytes)", path.display(), content.len());
    Ok(path)
}
