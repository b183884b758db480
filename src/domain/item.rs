//! Items fetched from the source and processed one by one.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Textual format of an item's date label (e.g. `02/01/2025`)
pub const DATE_LABEL_FORMAT: &str = "%d/%m/%Y";

/// Date format used in produced file names
const FILE_DATE_FORMAT: &str = "%Y-%m-%d";

/// One unit of source material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Page to capture
    pub locator: String,

    /// Publication date as returned by the source (`dd/mm/yyyy`)
    pub date_label: String,
}

impl Item {
    /// Create a new item
    pub fn new(locator: impl Into<String>, date_label: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            date_label: date_label.into(),
        }
    }

    /// Parse the date label, `None` if it does not match [`DATE_LABEL_FORMAT`]
    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(self.date_label.trim(), DATE_LABEL_FORMAT).ok()
    }

    /// File name of the capture produced for this item.
    ///
    /// `index` is the 1-based position of the item in the fetched sequence.
    pub fn capture_file_name(&self, filter_key: &str, index: usize) -> String {
        let date = match self.date() {
            Some(date) => date.format(FILE_DATE_FORMAT).to_string(),
            None => sanitize_component(&self.date_label),
        };
        format!(
            "{} {} article {}.png",
            date,
            sanitize_component(filter_key),
            index
        )
    }
}

/// Make a string safe to use as a single path component
pub fn sanitize_component(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '-',
            c => c,
        })
        .collect()
}
