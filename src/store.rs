use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::convert;
use crate::engine::assembler::DatasetSource;
use crate::engine::dataset::{DatasetTable, TIMESTAMP_FORMAT};
use crate::engine::panel::{DashboardGroup, PanelDescriptor};
use crate::error::{ReportError, Result};

const JSON_PREFIX: &str = "query_data_";
const CSV_PREFIX: &str = "output_data_";
const DELIMITER: u8 = b';';

// ======================================================
// INTERMEDIATE FILES
// ======================================================

/// Raw query responses and flattened CSV tables, one directory per
/// dashboard group under the data root.
#[derive(Debug, Clone)]
pub struct DataStore {
    root: PathBuf,
}

impl DataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DataStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn group_dir(&self, group: &DashboardGroup) -> PathBuf {
        self.root.join(file_stem(&group.key))
    }

    pub fn json_path(&self, group: &DashboardGroup, panel: &PanelDescriptor) -> PathBuf {
        self.group_dir(group)
            .join(format!("{}{}.json", JSON_PREFIX, file_stem(&panel.name)))
    }

    pub fn csv_path(&self, group: &DashboardGroup, panel: &PanelDescriptor) -> PathBuf {
        self.group_dir(group)
            .join(format!("{}{}.csv", CSV_PREFIX, file_stem(&panel.name)))
    }

    pub fn save_json(&self, group: &DashboardGroup, panel: &PanelDescriptor, body: &str) -> Result<PathBuf> {
        let path = self.json_path(group, panel);
        ensure_parent(&path)?;
        fs::write(&path, body).map_err(|e| ReportError::io(&path, e))?;
        debug!(path = %path.display(), "query response saved");
        Ok(path)
    }

    pub fn save_csv(&self, group: &DashboardGroup, panel: &PanelDescriptor, table: &DatasetTable) -> Result<PathBuf> {
        let path = self.csv_path(group, panel);
        ensure_parent(&path)?;
        let file = fs::File::create(&path).map_err(|e| ReportError::io(&path, e))?;
        write_csv(table, file)?;
        debug!(path = %path.display(), rows = table.len(), "table saved");
        Ok(path)
    }

    pub fn load_csv(&self, group: &DashboardGroup, panel: &PanelDescriptor) -> Result<DatasetTable> {
        let path = self.csv_path(group, panel);
        let file = fs::File::open(&path).map_err(|e| ReportError::io(&path, e))?;
        read_csv(file)
    }

    /// Remove the saved response and table of one panel. Missing files are
    /// not an error.
    pub fn clear_panel(&self, group: &DashboardGroup, panel: &PanelDescriptor) -> Result<()> {
        remove_if_present(&self.json_path(group, panel))?;
        remove_if_present(&self.csv_path(group, panel))
    }

    /// Flatten every saved query response of `group` into its CSV table.
    /// A panel without a readable response loses its table, so it renders
    /// empty. Returns the panels converted.
    pub fn convert_group(&self, group: &DashboardGroup) -> Result<usize> {
        let mut converted = 0;
        for panel in &group.panels {
            let path = self.json_path(group, panel);
            let parsed = fs::read_to_string(&path)
                .map_err(|e| ReportError::io(&path, e))
                .and_then(|raw| convert::parse_response(&raw));
            let response = match parsed {
                Ok(response) => response,
                Err(e) => {
                    warn!(panel = %panel.name, error = %e, "no query response to convert");
                    remove_if_present(&self.csv_path(group, panel))?;
                    continue;
                }
            };
            self.save_csv(group, panel, &convert::to_table(&response))?;
            converted += 1;
        }
        info!(group = %group.key, converted, "converted query responses");
        Ok(converted)
    }
}

impl DatasetSource for DataStore {
    fn load(&self, group: &DashboardGroup, panel: &PanelDescriptor) -> DatasetTable {
        match self.load_csv(group, panel) {
            Ok(table) => table,
            Err(e) => {
                warn!(group = %group.key, panel = %panel.name, error = %e, "panel data unavailable, rendering empty");
                DatasetTable::new()
            }
        }
    }
}

/// File-system safe form of a key or panel name.
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '/' | '\\' | ':' | '\0') { '_' } else { c })
        .collect()
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "previous file removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ReportError::io(path, e)),
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ReportError::io(parent, e))?;
    }
    Ok(())
}

// ======================================================
// CSV
// ======================================================

/// `Time;series…` header, one row per timestamp, blank cells for missing
/// values.
pub fn write_csv<W: Write>(table: &DatasetTable, writer: W) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(DELIMITER)
        .from_writer(writer);

    let mut header = vec!["Time".to_string()];
    header.extend(table.series().iter().cloned());
    wtr.write_record(&header)?;

    for row in table.rows() {
        let mut record = vec![row.timestamp_label()];
        record.extend(
            row.values
                .iter()
                .map(|v| v.map(|x| x.to_string()).unwrap_or_default()),
        );
        wtr.write_record(&record)?;
    }

    wtr.flush().map_err(|e| ReportError::io("csv output", e))?;
    Ok(())
}

/// Inverse of `write_csv`. Blank cells load as absent; cells that do not
/// parse as numbers load as `0.0`. Rows with an unreadable timestamp are
/// skipped.
pub fn read_csv<R: Read>(reader: R) -> Result<DatasetTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .flexible(true)
        .from_reader(reader);

    let series: Vec<String> = rdr.headers()?.iter().skip(1).map(str::to_string).collect();
    let mut table = DatasetTable::with_series(series);

    for record in rdr.records() {
        let record = record?;
        let Some(stamp) = record.get(0) else { continue };
        let timestamp = match NaiveDateTime::parse_from_str(stamp.trim(), TIMESTAMP_FORMAT) {
            Ok(ts) => ts,
            Err(_) => {
                warn!(timestamp = stamp, "row with unreadable timestamp skipped");
                continue;
            }
        };

        let values = record.iter().skip(1).map(parse_cell).collect();
        table.push_row(timestamp, values);
    }

    Ok(table)
}

fn parse_cell(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    Some(cell.parse().unwrap_or(0.0))
}

// ======================================================
// TESTS
// ======================================================
