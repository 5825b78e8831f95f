use std::path::Path;

use tabled::builder::Builder;

/// One flattened row.  Field names keep the order in which they were first
/// inserted; inserting an existing name replaces its value in place.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TabularRecord {
    fields: Vec<(String, String)>,
}

impl TabularRecord {
    pub fn new() -> TabularRecord {
        TabularRecord::default()
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == name) {
            Some(field) => field.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TabularRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = TabularRecord::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

/// Rows of possibly different shapes.  The columns are the union of all
/// field names, in order of first appearance.  Missing cells are blank.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<TabularRecord>,
}

impl Table {
    pub fn from_records(records: Vec<TabularRecord>) -> Table {
        let mut table = Table::default();
        table.append(records);
        table
    }

    /// Add rows at the end.  Rows are never merged.
    pub fn append(&mut self, records: Vec<TabularRecord>) {
        for record in records {
            for name in record.names() {
                if !self.columns.iter().any(|c| c == name) {
                    self.columns.push(name.to_string());
                }
            }
            self.rows.push(record);
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The cells of row `i` lined up with [`Table::columns`].
    pub fn row(&self, i: usize) -> Vec<&str> {
        let record = &self.rows[i];
        self.columns
            .iter()
            .map(|c| record.get(c).unwrap_or(""))
            .collect()
    }

    /// Write with a header line.  Overwrites an existing file.
    pub fn write_csv(&self, path: &Path) -> Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record(&self.columns)?;
        for i in 0..self.rows.len() {
            wtr.write_record(self.row(i))?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// A text rendering of the first `n` rows.
    pub fn preview(&self, n: usize) -> String {
        let mut builder = Builder::default();
        builder.push_record(self.columns.iter().cloned());
        for i in 0..n.min(self.rows.len()) {
            builder.push_record(self.row(i).into_iter().map(String::from));
        }
        builder.build().to_string()
    }
}
