use std::path::PathBuf;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::document::{
    column_index, CellStyle, Grid, Image, PageSetup, Region, ReportDocument, Rgb, Sheet, SheetKind,
};
use crate::engine::chart::{self, CELL_HEIGHT_PX, CELL_WIDTH_PX};
use crate::engine::cursor::{LayoutCursor, Placement};
use crate::engine::dataset::DatasetTable;
use crate::engine::palette::Palette;
use crate::engine::panel::{AnnotationMode, DashboardGroup, PanelDescriptor};
use crate::engine::summary::{self, StatsSheet};
use crate::error::Result;

pub const REPORT_SHEET: &str = "Informe";
pub const REPORT_COLUMNS: u16 = 35;
pub const SECTION_FILL: Rgb = Rgb(0x6BB9AE);
pub const DEFAULT_ATTRIBUTION: &str = "Powered by \nALCORT INGENIERiA Y ASESORiA S.L.";

const MAX_SHEET_NAME: usize = 31;
const TITLE_DATE_FORMAT: &str = "%d/%m/%Y %H:%M";
const LOGO_SIZE_PX: (u32, u32) = (170, 85);

/// Where the assembler gets each panel's data. A panel whose data cannot be
/// loaded yields an empty table; the layout still reserves its space.
pub trait DatasetSource {
    fn load(&self, group: &DashboardGroup, panel: &PanelDescriptor) -> DatasetTable;
}

#[derive(Debug, Clone)]
pub struct ReportOptions {
    /// Report title; part of the file name.
    pub title:       String,
    /// Page header text.
    pub heading:     String,
    pub start:       NaiveDateTime,
    pub end:         NaiveDateTime,
    pub logo:        Option<PathBuf>,
    pub attribution: String,
}

impl ReportOptions {
    pub fn new(title: &str, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        ReportOptions {
            title: title.to_string(),
            heading: title.to_string(),
            start,
            end,
            logo: None,
            attribution: DEFAULT_ATTRIBUTION.to_string(),
        }
    }

    pub fn filename(&self) -> String {
        report_filename(self.end, &self.title)
    }
}

/// `{end:%Y-%m-%d}_informe_{title}.xlsx`
pub fn report_filename(end: NaiveDateTime, title: &str) -> String {
    format!("{}_informe_{}.xlsx", end.format("%Y-%m-%d"), title)
}

// ======================================================
// REPORT BUILDER
// ======================================================

/// Lays out every dashboard group onto one report sheet. Owns all the state
/// that moves while the report is built: the cursor, both palettes and the
/// statistics sheet index.
pub struct ReportBuilder {
    options:   ReportOptions,
    cursor:    LayoutCursor,
    primary:   Palette,
    secondary: Palette,
    stats:     StatsSheet,
    report:    Sheet,
    raw:       Vec<Sheet>,
}

impl ReportBuilder {
    pub fn new(options: ReportOptions) -> Self {
        ReportBuilder {
            options,
            cursor:    LayoutCursor::new(),
            primary:   Palette::primary(),
            secondary: Palette::secondary(),
            stats:     StatsSheet::new(),
            report:    Sheet::new(REPORT_SHEET, SheetKind::Report),
            raw:       vec![],
        }
    }

    pub fn build<S: DatasetSource + ?Sized>(
        mut self,
        groups: &[DashboardGroup],
        source: &S,
    ) -> Result<ReportDocument> {
        for group in groups {
            group.validate()?;
        }

        self.title_block();

        for group in groups {
            info!(group = %group.key, panels = group.panels.len(), "laying out dashboard");
            self.section_header(group);
            for panel in &group.panels {
                let table = source.load(group, panel);
                self.add_panel(panel, &table);
            }
        }
        self.cursor.finish();
        debug!(
            first_row = self.cursor.start_row(),
            last_row = self.cursor.current_row(),
            padded = self.cursor.padded_rows(),
            advanced = self.cursor.advanced_rows(),
            "layout finished"
        );

        self.report.grid = Some(Grid {
            columns:         REPORT_COLUMNS,
            column_width_px: CELL_WIDTH_PX as u16,
            rows:            self.cursor.current_row(),
            row_height_px:   CELL_HEIGHT_PX as u16,
        });
        self.report.page = Some(self.page_setup());

        let mut doc = ReportDocument::new();
        doc.push(self.report);
        doc.push(self.stats.into_sheet());
        for sheet in self.raw {
            doc.push(sheet);
        }
        Ok(doc)
    }

    // ──────────────────────────────────────────────────────
    // blocks
    // ──────────────────────────────────────────────────────

    fn title_block(&mut self) {
        let bar = CellStyle::new().bold().size(14.0).centered();
        self.report.merge(
            Region { first_row: 1, first_col: 1, last_row: 1, last_col: REPORT_COLUMNS },
            "",
            &bar,
        );

        let start = self.options.start.format(TITLE_DATE_FORMAT).to_string();
        let end = self.options.end.format(TITLE_DATE_FORMAT).to_string();
        let plain = CellStyle::new();

        self.report.write(2, column_index("E"), "Fecha INICIO: ");
        self.report.merge(Region::span(2, "K", "Q"), start, &plain);
        self.report.write(3, column_index("E"), "Fecha FIN: ");
        self.report.merge(Region::span(3, "K", "Q"), end, &plain);

        if let Some(logo) = &self.options.logo {
            if logo.exists() {
                self.report.images.push(Image {
                    path:      logo.clone(),
                    row:       1,
                    col:       column_index("Z"),
                    width_px:  LOGO_SIZE_PX.0,
                    height_px: LOGO_SIZE_PX.1,
                });
            } else {
                warn!(path = %logo.display(), "logo not found, title block left without image");
            }
        }
    }

    fn section_header(&mut self, group: &DashboardGroup) {
        let placement = self.cursor.section_header();
        let style = CellStyle::new().fill(SECTION_FILL).color(Rgb::WHITE).bold();
        self.report
            .merge(Region::span(placement.row, "C", "AG"), group.title.as_str(), &style);
    }

    fn add_panel(&mut self, panel: &PanelDescriptor, table: &DatasetTable) {
        let filtered = filter_raw_rows(table);
        let name = sheet_name(&panel.name, &self.taken_names());
        let data = raw_data_sheet(&name, &filtered);

        let extra = panel.annotation_mode.extra_rows(filtered.series().len());
        let placement = self
            .cursor
            .place_panel(panel.size_class, extra, panel.is_pairable());

        debug!(
            panel = %panel.name,
            row = placement.row,
            slot = ?placement.slot,
            padding = placement.padding,
            advance = placement.advance,
            height = placement.height,
            page = placement.page_capacity,
            rows = filtered.len(),
            "placed panel"
        );

        let chart = chart::render(panel, &data, &placement, &self.primary);
        self.report.charts.push(chart);
        self.annotate(panel, &filtered, &placement);

        self.primary.rotate();
        self.secondary.rotate();
        self.raw.push(data);
    }

    fn annotate(&mut self, panel: &PanelDescriptor, table: &DatasetTable, placement: &Placement) {
        let row = placement.row + panel.size_class.height();

        match panel.annotation_mode {
            AnnotationMode::None => {}
            AnnotationMode::Info => {
                if table.is_empty() {
                    summary::render_info(&mut self.report, placement.slot, row, &panel.annotation_text);
                }
            }
            AnnotationMode::MaxMin => {
                let stats = summary::compute_stats(table);
                self.stats.record(&stats);
                summary::render_inline(
                    &mut self.report,
                    &stats,
                    placement.slot,
                    row,
                    &panel.annotation_text,
                    &panel.annotation_unit,
                );
            }
            AnnotationMode::Table => {
                let stats = summary::compute_stats(table);
                self.stats.record(&stats);
                // first row is the spacer
                summary::render_table(
                    &mut self.report,
                    &stats,
                    row + 1,
                    &panel.annotation_text,
                    &self.secondary,
                );
            }
        }
    }

    fn page_setup(&self) -> PageSetup {
        PageSetup {
            page_layout_view:   true,
            hide_gridlines:     true,
            portrait:           true,
            paper_a4:           true,
            header:             Some(self.options.heading.clone()),
            header_font:        "Arial,Bold".to_string(),
            header_size:        14,
            footer_page_number: true,
            footer_right:       Some(self.options.attribution.clone()),
        }
    }

    fn taken_names(&self) -> Vec<String> {
        let mut names = vec![REPORT_SHEET.to_string(), summary::STATS_SHEET.to_string()];
        names.extend(self.raw.iter().map(|s| s.name.clone()));
        names
    }
}

// ======================================================
// RAW DATA
// ======================================================

/// Keep every complete row (all values present and non-zero) together with
/// its immediate neighbours; drop the rest. Blank cells of kept rows stay
/// blank so statistics skip them.
pub fn filter_raw_rows(table: &DatasetTable) -> DatasetTable {
    let rows = table.rows();
    let complete: Vec<bool> = rows
        .iter()
        .map(|r| r.values.iter().all(|v| matches!(v, Some(x) if *x != 0.0)))
        .collect();

    let mut out = DatasetTable::with_series(table.series().iter().cloned());
    for (i, row) in rows.iter().enumerate() {
        let keep = complete[i]
            || (i > 0 && complete[i - 1])
            || complete.get(i + 1).copied().unwrap_or(false);
        if keep {
            out.push_row(row.timestamp, row.values.clone());
        }
    }
    out
}

/// Sheet with a `Time` column of timestamp labels and one numeric column per
/// series. Blank cells are written as `0.0`.
pub fn raw_data_sheet(name: &str, table: &DatasetTable) -> Sheet {
    let mut sheet = Sheet::new(name, SheetKind::RawData);
    sheet.write(1, 1, "Time");
    for (i, series) in table.series().iter().enumerate() {
        sheet.write(1, 2 + i as u16, series.as_str());
    }
    for (r, row) in table.rows().iter().enumerate() {
        let r = 2 + r as u32;
        sheet.write(r, 1, row.timestamp_label());
        for (i, value) in row.values.iter().enumerate() {
            sheet.write(r, 2 + i as u16, value.unwrap_or(0.0));
        }
    }
    sheet
}

/// A valid, unused worksheet name derived from a panel name.
pub fn sheet_name(panel_name: &str, taken: &[String]) -> String {
    let cleaned: String = panel_name
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('\'');
    let base = if cleaned.is_empty() { "Datos" } else { cleaned };

    let is_taken = |candidate: &str| taken.iter().any(|t| t.eq_ignore_ascii_case(candidate));

    let first = truncate(base, MAX_SHEET_NAME);
    if !is_taken(&first) {
        return first;
    }
    (2..)
        .map(|n| {
            let suffix = format!(" ({})", n);
            format!("{}{}", truncate(base, MAX_SHEET_NAME - suffix.len()), suffix)
        })
        .find(|candidate| !is_taken(candidate))
        .unwrap_or(first)
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// ======================================================
// TESTS
// ======================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::CellValue;
    use crate::engine::dataset::tests::ts;
    use crate::engine::panel::{ChartKind, SizeClass};
    use std::collections::HashMap;

    struct MemorySource(HashMap<String, DatasetTable>);

    impl DatasetSource for MemorySource {
        fn load(&self, group: &DashboardGroup, panel: &PanelDescriptor) -> DatasetTable {
            self.0
                .get(&format!("{}/{}", group.key, panel.name))
                .cloned()
                .unwrap_or_default()
        }
    }

    fn ten_rows(peak: f64, trough: f64) -> DatasetTable {
        let mut t = DatasetTable::with_series(["v"]);
        for i in 0..10u32 {
            let v = match i {
                3 => peak,
                7 => trough,
                _ => 5.0,
            };
            t.push_row(ts(1 + i, 12, 0), vec![Some(v)]);
        }
        t
    }

    fn options() -> ReportOptions {
        ReportOptions::new("Weekly", ts(8, 12, 0), ts(15, 12, 0))
    }

    fn two_by_two() -> (Vec<DashboardGroup>, MemorySource) {
        let mut data = HashMap::new();
        let mut groups = vec![];
        for (g, key) in ["north", "south"].iter().enumerate() {
            let small = PanelDescriptor::new(1, &format!("Temp {}", key), ChartKind::Line, SizeClass::Small);
            let medium = PanelDescriptor::new(2, &format!("Pump {}", key), ChartKind::Bar, SizeClass::Medium)
                .binary(true)
                .annotate(AnnotationMode::MaxMin, "Pump", "");
            data.insert(format!("{}/{}", key, small.name), ten_rows(9.0, 1.0));
            data.insert(format!("{}/{}", key, medium.name), ten_rows(20.0 + g as f64, 2.5));
            groups.push(
                DashboardGroup::new(key, &key.to_uppercase(), "uid")
                    .with_panel(small)
                    .with_panel(medium),
            );
        }
        (groups, MemorySource(data))
    }

    #[test]
    fn two_groups_of_two_panels() {
        let (groups, source) = two_by_two();
        let doc = ReportBuilder::new(options()).build(&groups, &source).unwrap();

        let report = doc.sheet(REPORT_SHEET).unwrap();
        let header_rows: Vec<u32> = ["NORTH", "SOUTH"]
            .iter()
            .flat_map(|t| report.rows_with_text(column_index("C"), t))
            .collect();
        assert_eq!(header_rows.len(), 2);
        assert_eq!(
            report.style(header_rows[0], column_index("C")).and_then(|s| s.fill),
            Some(SECTION_FILL)
        );

        assert_eq!(doc.chart_count(), 4);
        assert_eq!(doc.sheets_of(SheetKind::RawData).count(), 4);
        assert!(doc.sheet(summary::STATS_SHEET).is_some());

        let max_rows = report.rows_with_text(1, "Pump max.: ");
        assert_eq!(max_rows.len(), 2);
        assert_eq!(report.text(max_rows[0], column_index("H")), Some("20.00"));
        assert_eq!(report.text(max_rows[0] + 1, column_index("H")), Some("2.50"));
        assert_eq!(report.text(max_rows[1], column_index("H")), Some("21.00"));
        assert_eq!(report.text(max_rows[0], column_index("K")), Some("04-03-2024 12:00"));
    }

    #[test]
    fn sheet_order_is_report_stats_then_raw() {
        let (groups, source) = two_by_two();
        let doc = ReportBuilder::new(options()).build(&groups, &source).unwrap();
        let names: Vec<&str> = doc.sheets().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Informe", "DATOS", "Temp north", "Pump north", "Temp south", "Pump south"]);
    }

    #[test]
    fn title_block_and_page_setup() {
        let doc = ReportBuilder::new(options()).build(&[], &MemorySource(HashMap::new())).unwrap();
        let report = doc.sheet(REPORT_SHEET).unwrap();

        assert_eq!(report.text(2, 5), Some("Fecha INICIO: "));
        assert_eq!(report.text(2, 11), Some("08/03/2024 12:00"));
        assert_eq!(report.text(3, 11), Some("15/03/2024 12:00"));
        assert_eq!(report.merges()[0].last_col, REPORT_COLUMNS);

        let page = report.page.as_ref().unwrap();
        assert_eq!(page.header.as_deref(), Some("Weekly"));
        assert_eq!(page.footer_right.as_deref(), Some(DEFAULT_ATTRIBUTION));
        assert!(page.footer_page_number && page.portrait && page.paper_a4);
    }

    #[test]
    fn filename_uses_range_end_date() {
        let end = chrono::NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(report_filename(end, "Weekly"), "2024-03-15_informe_Weekly.xlsx");
        assert_eq!(options().filename(), "2024-03-15_informe_Weekly.xlsx");
    }

    #[test]
    fn blank_cell_next_to_complete_rows_is_written_as_zero() {
        let mut t = DatasetTable::with_series(["a", "b"]);
        t.push_row(ts(1, 0, 0), vec![Some(1.0), Some(2.0)]);
        t.push_row(ts(2, 0, 0), vec![None, None]);
        t.push_row(ts(3, 0, 0), vec![Some(1.0), Some(2.0)]);

        let filtered = filter_raw_rows(&t);
        assert_eq!(filtered.len(), 3);
        assert_eq!(filtered.rows()[1].values, vec![None, None]);

        let sheet = raw_data_sheet("x", &filtered);
        assert_eq!(sheet.value(3, 2), Some(&CellValue::Number(0.0)));
        assert_eq!(sheet.value(3, 3), Some(&CellValue::Number(0.0)));
    }

    #[test]
    fn statistics_skip_blanks_kept_for_the_raw_sheet() {
        let mut t = DatasetTable::with_series(["b", "a"]);
        t.push_row(ts(1, 0, 0), vec![Some(5.0), Some(1.0)]);
        t.push_row(ts(2, 0, 0), vec![None, Some(2.0)]);
        t.push_row(ts(3, 0, 0), vec![Some(9.0), Some(3.0)]);

        let panel = PanelDescriptor::new(1, "Level", ChartKind::Line, SizeClass::Large)
            .annotate(AnnotationMode::MaxMin, "Nivel", "m");
        let group = DashboardGroup::new("g", "G", "uid").with_panel(panel);
        let mut data = HashMap::new();
        data.insert("g/Level".to_string(), t);

        let doc = ReportBuilder::new(options()).build(&[group], &MemorySource(data)).unwrap();

        let raw = doc.sheet("Level").unwrap();
        assert_eq!(raw.value(3, 2), Some(&CellValue::Number(0.0)));

        let report = doc.sheet(REPORT_SHEET).unwrap();
        let min_row = report.rows_with_text(1, "Nivel min.: ")[0];
        assert_eq!(report.text(min_row, column_index("H")), Some("5.00"));
        assert_eq!(report.text(min_row, column_index("K")), Some("01-03-2024 00:00"));

        let stats = doc.sheet(summary::STATS_SHEET).unwrap();
        assert_eq!(stats.text(2, 2), Some("5.00"));
        assert_eq!(stats.text(2, 1), Some("9.00"));
    }

    #[test]
    fn rows_far_from_complete_ones_are_dropped() {
        let mut t = DatasetTable::with_series(["a"]);
        t.push_row(ts(1, 0, 0), vec![Some(0.0)]);
        t.push_row(ts(2, 0, 0), vec![Some(0.0)]);
        t.push_row(ts(3, 0, 0), vec![Some(0.0)]);
        t.push_row(ts(4, 0, 0), vec![Some(4.0)]);

        let kept: Vec<_> = filter_raw_rows(&t).rows().iter().map(|r| r.timestamp).collect();
        assert_eq!(kept, vec![ts(3, 0, 0), ts(4, 0, 0)]);
    }

    #[test]
    fn info_text_only_when_data_is_missing() {
        let info = |name: &str| {
            PanelDescriptor::new(1, name, ChartKind::Line, SizeClass::Large)
                .annotate(AnnotationMode::Info, "Sin datos en el periodo", "")
        };
        let group = DashboardGroup::new("g", "G", "uid")
            .with_panel(info("empty"))
            .with_panel(info("full"));
        let mut data = HashMap::new();
        data.insert("g/full".to_string(), ten_rows(3.0, 1.0));

        let doc = ReportBuilder::new(options()).build(&[group], &MemorySource(data)).unwrap();
        let report = doc.sheet(REPORT_SHEET).unwrap();
        assert_eq!(report.rows_with_text(column_index("C"), "Sin datos en el periodo").len(), 1);
        assert_eq!(doc.chart_count(), 2);
    }

    #[test]
    fn table_rows_sit_under_the_chart() {
        let mut t = DatasetTable::with_series(["in", "out"]);
        for i in 0..4 {
            t.push_row(ts(1 + i, 0, 0), vec![Some(1.0 + i as f64), Some(2.0)]);
        }
        let panel = PanelDescriptor::new(1, "Flow", ChartKind::Line, SizeClass::Large)
            .annotate(AnnotationMode::Table, "Caudal", "");
        let group = DashboardGroup::new("g", "G", "uid").with_panel(panel);
        let mut data = HashMap::new();
        data.insert("g/Flow".to_string(), t);

        let doc = ReportBuilder::new(options()).build(&[group], &MemorySource(data)).unwrap();
        let report = doc.sheet(REPORT_SHEET).unwrap();
        let chart_row = report.charts[0].anchor_row;

        assert_eq!(report.text(chart_row + 18, column_index("J")), Some("Caudal MAX"));
        assert_eq!(report.text(chart_row + 19, 1), Some("in"));
        assert_eq!(report.text(chart_row + 20, 1), Some("out"));
        assert_eq!(report.text(chart_row + 19, column_index("J")), Some("4.00"));
    }

    #[test]
    fn palettes_rotate_once_per_panel_across_groups() {
        let (groups, source) = two_by_two();
        let doc = ReportBuilder::new(options()).build(&groups, &source).unwrap();
        let report = doc.sheet(REPORT_SHEET).unwrap();
        let first_colors: Vec<Rgb> = report.charts.iter().map(|c| c.series[0].color).collect();
        let expected: Vec<Rgb> = (0..4).map(|k| Palette::primary().color(k)).collect();
        assert_eq!(first_colors, expected);
    }

    #[test]
    fn invalid_panel_names_fail_the_build() {
        let group = DashboardGroup::new("g", "G", "uid")
            .with_panel(PanelDescriptor::new(1, &"n".repeat(31), ChartKind::Line, SizeClass::Large));
        let result = ReportBuilder::new(options()).build(&[group], &MemorySource(HashMap::new()));
        assert!(result.is_err());
    }

    #[test]
    fn sheet_names_are_sanitized_and_unique() {
        let taken = vec!["Informe".to_string(), "DATOS".to_string(), "Flow".to_string()];
        assert_eq!(sheet_name("a/b:c", &taken), "a_b_c");
        assert_eq!(sheet_name("flow", &taken), "flow (2)");
        assert_eq!(sheet_name("datos", &taken), "datos (2)");
        assert_eq!(sheet_name("", &taken), "Datos (2)");

        let long = "x".repeat(31);
        let taken = vec![long.clone()];
        let name = sheet_name(&long, &taken);
        assert_eq!(name.chars().count(), 31);
        assert!(name.ends_with(" (2)"));
    }
}
