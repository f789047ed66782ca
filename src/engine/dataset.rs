use chrono::NaiveDateTime;

/// Timestamp rendering used in intermediate CSV files, raw-data sheets and
/// summary blocks.
pub const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M";

// ======================================================
// DATASET TABLE
// ======================================================

/// One row of a dataset: a timestamp plus one optional value per series.
/// `values[i]` belongs to `DatasetTable::series()[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRow {
    pub timestamp: NaiveDateTime,
    pub values:    Vec<Option<f64>>,
}

impl DataRow {
    pub fn timestamp_label(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Time-indexed values of one panel. Rows stay sorted by timestamp and are
/// unique per timestamp; the series header only grows, in first-seen order.
/// Missing values are stored as `None`, never filled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetTable {
    series: Vec<String>,
    rows:   Vec<DataRow>,
}

impl DatasetTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series<S: Into<String>>(series: impl IntoIterator<Item = S>) -> Self {
        let mut table = Self::new();
        for name in series {
            table.series_index(&name.into());
        }
        table
    }

    pub fn series(&self) -> &[String] {
        &self.series
    }

    pub fn rows(&self) -> &[DataRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of `name` in the header, appending it if it is new.
    pub fn series_index(&mut self, name: &str) -> usize {
        if let Some(idx) = self.series.iter().position(|s| s == name) {
            return idx;
        }
        self.series.push(name.to_string());
        for row in &mut self.rows {
            row.values.push(None);
        }
        self.series.len() - 1
    }

    /// Set one value, creating the series and the timestamp row as needed.
    /// A later value for the same timestamp and series replaces the earlier one.
    pub fn record(&mut self, timestamp: NaiveDateTime, series: &str, value: f64) {
        let col = self.series_index(series);
        let row = self.row_for(timestamp);
        self.rows[row].values[col] = Some(value);
    }

    /// Insert a complete row. `values` shorter than the header are padded with
    /// `None`; longer ones are truncated.
    pub fn push_row(&mut self, timestamp: NaiveDateTime, mut values: Vec<Option<f64>>) {
        values.resize(self.series.len(), None);
        let row = self.row_for(timestamp);
        self.rows[row].values = values;
    }

    /// Values of one series, paired with their row, skipping absent cells.
    pub fn column(&self, col: usize) -> impl Iterator<Item = (&DataRow, f64)> + '_ {
        self.rows
            .iter()
            .filter_map(move |row| row.values.get(col).copied().flatten().map(|v| (row, v)))
    }

    fn row_for(&mut self, timestamp: NaiveDateTime) -> usize {
        match self.rows.binary_search_by(|r| r.timestamp.cmp(&timestamp)) {
            Ok(idx) => idx,
            Err(idx) => {
                self.rows.insert(
                    idx,
                    DataRow {
                        timestamp,
                        values: vec![None; self.series.len()],
                    },
                );
                idx
            }
        }
    }
}

// ======================================================
// TESTS
// ======================================================
