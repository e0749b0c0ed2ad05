//! Tabular view of a downloaded registry and the column filters applied to it.

use std::collections::BTreeSet;
use std::fmt;
use std::io::Cursor;

use calamine::{Data, Reader, Xlsx, XlsxError as ReadError, open_workbook_from_rs};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_xlsxwriter::{Format, Workbook, XlsxError as WriteError};

use crate::model::DateRange;

/// Name of the single sheet written back.
pub const SHEET_NAME: &str = "Registre";

/// Normalized headers that may hold the record type, in priority order.
pub const TYPE_COLUMN_ALIASES: [&str; 7] = [
    "bsdtype",
    "bsd_type",
    "type de bordereau",
    "type de bsd",
    "type bordereau",
    "type de déchet",
    "type",
];

/// Normalized headers that may hold the record date, in priority order.
pub const DATE_COLUMN_ALIASES: [&str; 14] = [
    "date de création",
    "date de creation",
    "date de création du bordereau",
    "date d'émission",
    "date d'emission",
    "date de l'expédition",
    "date d'expédition",
    "date de réception",
    "date de reception",
    "createdat",
    "created_at",
    "emittedat",
    "receivedat",
    "date",
];

const DATETIME_NUM_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

const DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d/%m/%Y"];

#[derive(thiserror::Error, Debug)]
/// Errors while reading or writing a registry spreadsheet.
pub enum DatasetError {
    /// The bytes are not a readable workbook.
    #[error("Unreadable spreadsheet: {0}")]
    Read(#[from] ReadError),
    /// The workbook has no sheet.
    #[error("Spreadsheet has no sheet")]
    NoSheet,
    /// Writing the workbook failed.
    #[error("Could not write spreadsheet: {0}")]
    Write(#[from] WriteError),
    /// More rows or columns than a sheet can hold.
    #[error("Dataset too large for a single sheet")]
    TooLarge,
}

#[derive(Debug, Clone, PartialEq)]
/// One spreadsheet cell.
pub enum CellValue {
    /// No value.
    Empty,
    /// Text.
    Text(String),
    /// Any numeric value.
    Number(f64),
    /// Boolean.
    Bool(bool),
    /// Date and time without zone.
    DateTime(NaiveDateTime),
}

impl CellValue {
    fn from_data(data: &Data) -> Self {
        match data {
            Data::Empty => Self::Empty,
            Data::String(text) => Self::Text(text.clone()),
            Data::Float(number) => Self::Number(*number),
            #[expect(
                clippy::cast_precision_loss,
                reason = "spreadsheet integers are stored as doubles anyway"
            )]
            Data::Int(number) => Self::Number(*number as f64),
            Data::Bool(flag) => Self::Bool(*flag),
            Data::DateTime(excel) => excel
                .as_datetime()
                .map_or_else(|| Self::Number(excel.as_f64()), Self::DateTime),
            Data::DateTimeIso(text) | Data::DurationIso(text) => parse_text_datetime(text)
                .map_or_else(|| Self::Text(text.clone()), Self::DateTime),
            Data::Error(err) => Self::Text(err.to_string()),
        }
    }

    /// Calendar day held by the cell, if it can be read as one.
    #[must_use]
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::DateTime(value) => Some(value.date()),
            Self::Text(text) => parse_text_date(text.trim()),
            Self::Empty | Self::Number(_) | Self::Bool(_) => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Text(text) => formatter.write_str(text),
            Self::Number(number) => write!(formatter, "{number}"),
            Self::Bool(flag) => write!(formatter, "{flag}"),
            Self::DateTime(value) => write!(formatter, "{}", value.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

fn parse_text_datetime(text: &str) -> Option<NaiveDateTime> {
    if let Ok(with_zone) = DateTime::parse_from_rfc3339(text) {
        return Some(with_zone.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|pattern| NaiveDateTime::parse_from_str(text, pattern).ok())
}

fn parse_text_date(text: &str) -> Option<NaiveDate> {
    if text.is_empty() {
        return None;
    }
    parse_text_datetime(text).map(|value| value.date()).or_else(|| {
        DATE_FORMATS
            .iter()
            .find_map(|pattern| NaiveDate::parse_from_str(text, pattern).ok())
    })
}

/// Trim and lower-case a header for alias matching.
#[must_use]
pub fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase()
}

#[derive(Debug, Clone, Default, PartialEq)]
/// Header row plus data rows of a registry sheet.
pub struct RegistryDataset {
    headers: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl RegistryDataset {
    /// Build a dataset, padding short rows to the header width.
    ///
    /// Trailing rows made only of empty cells are dropped, as a sheet cannot
    /// hold them.
    #[must_use]
    pub fn new(headers: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let width = headers.len();
        let mut rows: Vec<Vec<CellValue>> = rows
            .into_iter()
            .map(|mut row| {
                if row.len() < width {
                    row.resize(width, CellValue::Empty);
                }
                row
            })
            .collect();
        while rows
            .last()
            .is_some_and(|row| row.iter().all(|cell| matches!(cell, CellValue::Empty)))
        {
            rows.pop();
        }
        Self { headers, rows }
    }

    /// Read the first sheet of an XLSX workbook; its first row is the header.
    ///
    /// # Errors
    ///
    /// Returns a [`DatasetError`] when the bytes are not a workbook or hold no sheet.
    pub fn from_xlsx(bytes: &[u8]) -> Result<Self, DatasetError> {
        let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or(DatasetError::NoSheet)??;

        let mut sheet_rows = range.rows();
        let headers = sheet_rows
            .next()
            .map(|header_row| {
                header_row
                    .iter()
                    .map(|cell| CellValue::from_data(cell).to_string())
                    .collect()
            })
            .unwrap_or_default();
        let rows = sheet_rows
            .map(|row| row.iter().map(CellValue::from_data).collect())
            .collect();

        Ok(Self::new(headers, rows))
    }

    /// Write the dataset as a single-sheet XLSX workbook.
    ///
    /// # Errors
    ///
    /// Returns a [`DatasetError`] when the workbook cannot be produced.
    pub fn to_xlsx(&self) -> Result<Vec<u8>, DatasetError> {
        let mut workbook = Workbook::new();
        let datetime_format = Format::new().set_num_format(DATETIME_NUM_FORMAT);
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(SHEET_NAME)?;

        for (col_idx, header) in self.headers.iter().enumerate() {
            worksheet.write_string(0, column_number(col_idx)?, header)?;
        }

        for (row_idx, row) in self.rows.iter().enumerate() {
            let sheet_row = u32::try_from(row_idx + 1).map_err(|_err| DatasetError::TooLarge)?;
            for (col_idx, cell) in row.iter().enumerate() {
                let sheet_col = column_number(col_idx)?;
                match cell {
                    CellValue::Empty => {}
                    CellValue::Text(text) => {
                        worksheet.write_string(sheet_row, sheet_col, text)?;
                    }
                    CellValue::Number(number) => {
                        worksheet.write_number(sheet_row, sheet_col, *number)?;
                    }
                    CellValue::Bool(flag) => {
                        worksheet.write_boolean(sheet_row, sheet_col, *flag)?;
                    }
                    CellValue::DateTime(value) => {
                        worksheet.write_datetime_with_format(
                            sheet_row,
                            sheet_col,
                            value,
                            &datetime_format,
                        )?;
                    }
                }
            }
        }

        Ok(workbook.save_to_buffer()?)
    }

    /// Column names as they appear in the sheet.
    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Data rows.
    #[must_use]
    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    /// Number of data rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there is no data row.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the first header matching an alias, aliases tried in order.
    #[must_use]
    pub fn find_column(&self, aliases: &[&str]) -> Option<usize> {
        let normalized: Vec<String> = self.headers.iter().map(|header| normalize_header(header)).collect();
        aliases.iter().find_map(|alias| {
            normalized
                .iter()
                .position(|header| header.as_str() == *alias)
        })
    }

    /// Keep rows whose record type is one of `types`.
    ///
    /// Without a recognizable type column the dataset is returned unchanged and
    /// [`FilterResult::applied`] is `false`.
    #[must_use]
    pub fn filter_by_type(&self, types: &BTreeSet<String>) -> FilterResult {
        self.filter_on(&TYPE_COLUMN_ALIASES, |cell| {
            types.contains(cell.to_string().trim())
        })
    }

    /// Keep rows whose record date falls within `range`; undated rows are dropped.
    ///
    /// Without a recognizable date column the dataset is returned unchanged and
    /// [`FilterResult::applied`] is `false`.
    #[must_use]
    pub fn filter_by_date(&self, range: &DateRange) -> FilterResult {
        self.filter_on(&DATE_COLUMN_ALIASES, |cell| {
            cell.as_date().is_some_and(|date| range.contains(date))
        })
    }

    fn filter_on<F>(&self, aliases: &[&str], keep: F) -> FilterResult
    where
        F: Fn(&CellValue) -> bool,
    {
        let Some(column_idx) = self.find_column(aliases) else {
            return FilterResult {
                dataset: self.clone(),
                column: None,
            };
        };

        let rows = self
            .rows
            .iter()
            .filter(|row| row.get(column_idx).is_some_and(&keep))
            .cloned()
            .collect();

        FilterResult {
            dataset: Self::new(self.headers.clone(), rows),
            column: self.headers.get(column_idx).cloned(),
        }
    }
}

fn column_number(idx: usize) -> Result<u16, DatasetError> {
    u16::try_from(idx).map_err(|_err| DatasetError::TooLarge)
}

#[derive(Debug, Clone, PartialEq)]
/// Outcome of a column filter.
pub struct FilterResult {
    /// Filtered rows, or the untouched dataset when no column matched.
    pub dataset: RegistryDataset,
    /// Header the filter was applied on.
    pub column: Option<String>,
}

impl FilterResult {
    /// Whether a matching column was found and the filter ran.
    #[must_use]
    pub fn applied(&self) -> bool {
        self.column.is_some()
    }
}
