//! The placeholder table: one CSV row per outgoing message.

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::template::TemplateError;

/// Anything that stops a merge before the first message goes out.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// A file couldn't be opened or read
    #[error("could not read {path:?}: {source}")]
    Io {
        /// The file in question
        path: PathBuf,
        /// The underlying error
        #[source]
        source: std::io::Error,
    },

    /// The CSV reader gave up
    #[error("malformed csv: {0}")]
    Csv(#[from] csv::Error),

    /// The header lacks the recipient column
    #[error("no {0:?} column in the placeholder table")]
    MissingRecipientColumn(String),

    /// Two header cells with the same name
    #[error("column {0:?} appears more than once")]
    DuplicateColumn(String),

    /// A data row has more fields than the header
    #[error("row {row} has {found} fields but the header only has {expected}")]
    RowTooLong {
        /// Data row, counting from 1 after the header
        row: usize,
        /// Fields in that row
        found: usize,
        /// Fields in the header
        expected: usize,
    },

    /// The body template doesn't parse
    #[error("bad template: {0}")]
    Template(#[from] TemplateError),
}

/// One row of the table. Column order follows the header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaceholderRecord {
    recipient_key: String,
    values: IndexMap<String, String>,
}

impl PlaceholderRecord {
    /// Builds a record from `(column, value)` pairs. The recipient column is added empty if the
    /// pairs don't contain it.
    pub fn new<K, V>(recipient_key: impl Into<String>, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let recipient_key = recipient_key.into();
        let mut values: IndexMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        values.entry(recipient_key.clone()).or_insert_with(String::new);
        PlaceholderRecord {
            recipient_key,
            values,
        }
    }

    /// Name of the column holding the addresses.
    pub fn recipient_key(&self) -> &str {
        &self.recipient_key
    }

    /// The raw, still delimited, recipient value.
    pub fn recipients(&self) -> &str {
        self.values
            .get(&self.recipient_key)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// The value in `column`, if there is such a column.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    /// Every column, recipient column included.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// All rows of a placeholder CSV, in file order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaceholderTable {
    headers: Vec<String>,
    records: Vec<PlaceholderRecord>,
}

impl PlaceholderTable {
    /// Reads a CSV file; see [`from_reader`](PlaceholderTable::from_reader).
    pub fn from_path(path: impl AsRef<Path>, recipient_key: &str) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_reader(file, recipient_key)?;
        info!(
            "placeholder table {:?} read: {} row(s), columns {:?}",
            path,
            table.len(),
            table.headers()
        );
        Ok(table)
    }

    /// Parses CSV with a header row. Short rows are padded with empty values.
    pub fn from_reader<R: Read>(reader: R, recipient_key: &str) -> Result<Self, LoadError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_owned())
            .collect();

        let mut seen = HashSet::new();
        for header in headers.iter() {
            if !seen.insert(header.as_str()) {
                return Err(LoadError::DuplicateColumn(header.clone()));
            }
        }
        if !seen.contains(recipient_key) {
            return Err(LoadError::MissingRecipientColumn(recipient_key.to_owned()));
        }

        let mut records = Vec::new();
        for (i, row) in reader.records().enumerate() {
            let row = row?;
            if row.len() > headers.len() {
                return Err(LoadError::RowTooLong {
                    row: i + 1,
                    found: row.len(),
                    expected: headers.len(),
                });
            }

            let values = headers
                .iter()
                .enumerate()
                .map(|(j, h)| (h.clone(), row.get(j).unwrap_or("").to_owned()));
            records.push(PlaceholderRecord::new(recipient_key, values));
        }

        Ok(PlaceholderTable { headers, records })
    }

    /// Column names, trimmed, in file order.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Data rows in file order.
    pub fn records(&self) -> &[PlaceholderRecord] {
        &self.records
    }

    /// Number of data rows.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the file had a header and nothing else.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
