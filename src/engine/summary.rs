use chrono::NaiveDateTime;

use crate::document::{CellStyle, Region, Sheet, SheetKind};
use crate::engine::cursor::Slot;
use crate::engine::dataset::{DatasetTable, TIMESTAMP_FORMAT};
use crate::engine::palette::Palette;

pub const STATS_SHEET: &str = "DATOS";
pub const NOT_AVAILABLE: &str = "N/A";

// ======================================================
// STATISTICS
// ======================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extremum {
    pub value:     f64,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryStat {
    pub series: String,
    pub max:    Option<Extremum>,
    pub min:    Option<Extremum>,
}

impl SummaryStat {
    pub fn max_value(&self) -> String {
        value_label(self.max)
    }

    pub fn max_time(&self) -> String {
        time_label(self.max)
    }

    pub fn min_value(&self) -> String {
        value_label(self.min)
    }

    pub fn min_time(&self) -> String {
        time_label(self.min)
    }
}

fn value_label(e: Option<Extremum>) -> String {
    e.map(|e| format!("{:.2}", e.value))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn time_label(e: Option<Extremum>) -> String {
    e.map(|e| e.timestamp.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Max and min of every series with the timestamp where each first occurs.
/// Missing cells are ignored.
pub fn compute_stats(table: &DatasetTable) -> Vec<SummaryStat> {
    table
        .series()
        .iter()
        .enumerate()
        .map(|(col, name)| {
            let mut max: Option<Extremum> = None;
            let mut min: Option<Extremum> = None;

            for (row, value) in table.column(col) {
                if max.map_or(true, |m| value > m.value) {
                    max = Some(Extremum { value, timestamp: row.timestamp });
                }
                if min.map_or(true, |m| value < m.value) {
                    min = Some(Extremum { value, timestamp: row.timestamp });
                }
            }

            SummaryStat { series: name.clone(), max, min }
        })
        .collect()
}

// ======================================================
// DATOS SHEET
// ======================================================

/// Scratch sheet with the computed statistics of every summarized panel.
/// Each series takes a block of four rows: names, values, timestamps, gap.
#[derive(Debug)]
pub struct StatsSheet {
    sheet: Sheet,
    next:  u32,
}

impl Default for StatsSheet {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSheet {
    pub fn new() -> Self {
        StatsSheet {
            sheet: Sheet::new(STATS_SHEET, SheetKind::Stats),
            next:  1,
        }
    }

    /// Append `stats` and return the row of the first block.
    pub fn record(&mut self, stats: &[SummaryStat]) -> u32 {
        let first = self.next;
        for stat in stats {
            let i = self.next;
            self.sheet.write(i, 1, format!("MAX_{}", stat.series));
            self.sheet.write(i + 1, 1, stat.max_value());
            self.sheet.write(i + 2, 1, stat.max_time());
            self.sheet.write(i, 2, format!("MIN_{}", stat.series));
            self.sheet.write(i + 1, 2, stat.min_value());
            self.sheet.write(i + 2, 2, stat.min_time());
            self.next += 4;
        }
        first
    }

    #[cfg(test)]
    pub fn next_index(&self) -> u32 {
        self.next
    }

    pub fn into_sheet(self) -> Sheet {
        self.sheet
    }
}

// ======================================================
// REPORT BLOCKS
// ======================================================

/// Columns of the inline max/min block: label, value, unit, timestamp.
struct InlineColumns {
    label: (&'static str, &'static str),
    value: (&'static str, &'static str),
    unit:  &'static str,
    time:  (&'static str, &'static str),
}

const INLINE_LEFT: InlineColumns = InlineColumns {
    label: ("A", "G"),
    value: ("H", "I"),
    unit:  "J",
    time:  ("K", "P"),
};

const INLINE_RIGHT: InlineColumns = InlineColumns {
    label: ("S", "Y"),
    value: ("Z", "AA"),
    unit:  "AB",
    time:  ("AC", "AH"),
};

/// Two rows under a chart: max and min of the first series.
pub fn render_inline(sheet: &mut Sheet, stats: &[SummaryStat], slot: Slot, row: u32, label: &str, unit: &str) {
    let cols = match slot {
        Slot::Right => &INLINE_RIGHT,
        Slot::Full | Slot::Left => &INLINE_LEFT,
    };
    let empty = SummaryStat { series: String::new(), max: None, min: None };
    let stat = stats.first().unwrap_or(&empty);
    let centered = CellStyle::new().centered();
    let plain = CellStyle::new();

    let lines = [
        (row, format!("{} max.: ", label), stat.max_value(), stat.max_time()),
        (row + 1, format!("{} min.: ", label), stat.min_value(), stat.min_time()),
    ];
    for (r, text, value, time) in lines {
        sheet.merge(Region::span(r, cols.label.0, cols.label.1), text, &centered);
        sheet.merge(Region::span(r, cols.value.0, cols.value.1), value, &plain);
        sheet.merge(Region::span(r, cols.unit, cols.unit), unit, &plain);
        sheet.merge(Region::span(r, cols.time.0, cols.time.1), time, &centered);
    }
}

fn table_style() -> CellStyle {
    CellStyle::new().size(8.0).centered().border()
}

/// Header row at `row`, then one row per series filled from `fills`.
/// Returns the number of rows written.
pub fn render_table(sheet: &mut Sheet, stats: &[SummaryStat], row: u32, label: &str, fills: &Palette) -> u32 {
    let style = table_style();

    sheet.merge(Region::span(row, "J", "O"), format!("{} MAX", label), &style);
    sheet.merge(Region::span(row, "P", "U"), "Fecha de maxima:", &style);
    sheet.merge(Region::span(row, "V", "AA"), format!("{} MIN", label), &style);
    sheet.merge(Region::span(row, "AB", "AG"), "Fecha de minimo:", &style);

    for (i, stat) in stats.iter().enumerate() {
        let r = row + 1 + i as u32;
        let filled = style.clone().fill(fills.color(i));

        sheet.merge(Region::span(r, "A", "I"), stat.series.as_str(), &filled);
        sheet.merge(Region::span(r, "J", "O"), stat.max_value(), &filled);
        sheet.merge(Region::span(r, "P", "U"), stat.max_time(), &filled);
        sheet.merge(Region::span(r, "V", "AA"), stat.min_value(), &filled);
        sheet.merge(Region::span(r, "AB", "AG"), stat.min_time(), &filled);
    }

    1 + stats.len() as u32
}

/// Message shown under a chart whose dataset came back empty.
pub fn render_info(sheet: &mut Sheet, slot: Slot, row: u32, message: &str) {
    let region = match slot {
        Slot::Full  => Region::span(row, "C", "AG"),
        Slot::Left  => Region::span(row, "C", "Q"),
        Slot::Right => Region::span(row, "S", "AG"),
    };
    sheet.merge(region, message, &CellStyle::new().centered());
}

// ======================================================
// TESTS
// ======================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::dataset::tests::ts;
    use proptest::prelude::*;

    fn table() -> DatasetTable {
        let mut t = DatasetTable::with_series(["in", "out"]);
        t.push_row(ts(1, 0, 0), vec![Some(3.0), None]);
        t.push_row(ts(2, 0, 0), vec![Some(7.5), None]);
        t.push_row(ts(3, 0, 0), vec![Some(7.5), None]);
        t.push_row(ts(4, 0, 0), vec![Some(-1.0), None]);
        t
    }

    #[test]
    fn extremes_carry_real_timestamps_and_first_occurrence_wins() {
        let stats = compute_stats(&table());
        let max = stats[0].max.unwrap();
        assert_eq!(max.value, 7.5);
        assert_eq!(max.timestamp, ts(2, 0, 0));
        assert_eq!(stats[0].min.unwrap().timestamp, ts(4, 0, 0));
        assert_eq!(stats[0].max_time(), "02-03-2024 00:00");
    }

    #[test]
    fn series_without_values_report_not_available() {
        let stats = compute_stats(&table());
        assert_eq!(stats[1].series, "out");
        assert_eq!(stats[1].max_value(), NOT_AVAILABLE);
        assert_eq!(stats[1].min_time(), NOT_AVAILABLE);
    }

    #[test]
    fn values_render_with_two_decimals() {
        let stats = compute_stats(&table());
        assert_eq!(stats[0].max_value(), "7.50");
        assert_eq!(stats[0].min_value(), "-1.00");
    }

    #[test]
    fn stats_sheet_index_runs_across_calls() {
        let stats = compute_stats(&table());
        let mut datos = StatsSheet::new();
        assert_eq!(datos.record(&stats), 1);
        assert_eq!(datos.record(&stats[..1]), 9);
        assert_eq!(datos.next_index(), 13);

        let sheet = datos.into_sheet();
        assert_eq!(sheet.name, STATS_SHEET);
        assert_eq!(sheet.text(1, 1), Some("MAX_in"));
        assert_eq!(sheet.text(2, 1), Some("7.50"));
        assert_eq!(sheet.text(3, 2), Some("04-03-2024 00:00"));
        assert_eq!(sheet.text(5, 2), Some("MIN_out"));
        assert_eq!(sheet.text(6, 2), Some(NOT_AVAILABLE));
    }

    #[test]
    fn inline_block_uses_slot_columns() {
        let stats = compute_stats(&table());
        let mut sheet = Sheet::new("Informe", SheetKind::Report);
        render_inline(&mut sheet, &stats, Slot::Left, 20, "Caudal", "m3/h");
        render_inline(&mut sheet, &stats, Slot::Right, 20, "Nivel", "m");

        assert_eq!(sheet.text(20, 1), Some("Caudal max.: "));
        assert_eq!(sheet.text(21, 1), Some("Caudal min.: "));
        assert_eq!(sheet.text(20, 8), Some("7.50"));
        assert_eq!(sheet.text(20, 10), Some("m3/h"));
        assert_eq!(sheet.text(20, 19), Some("Nivel max.: "));
        assert_eq!(sheet.text(21, 29), Some("04-03-2024 00:00"));
    }

    #[test]
    fn table_rows_follow_series_with_secondary_fills() {
        let stats = compute_stats(&table());
        let mut sheet = Sheet::new("Informe", SheetKind::Report);
        let rows = render_table(&mut sheet, &stats, 30, "Temp", &Palette::secondary());

        assert_eq!(rows, 3);
        assert_eq!(sheet.text(30, 10), Some("Temp MAX"));
        assert_eq!(sheet.text(30, 28), Some("Fecha de minimo:"));
        assert_eq!(sheet.text(31, 1), Some("in"));
        assert_eq!(sheet.text(32, 1), Some("out"));

        let fill = sheet.style(32, 33).and_then(|s| s.fill);
        assert_eq!(fill, Some(Palette::secondary().color(1)));
        assert!(sheet.style(30, 10).map_or(false, |s| s.border && s.centered));
    }

    #[test]
    fn info_message_spans_its_slot() {
        let mut sheet = Sheet::new("Informe", SheetKind::Report);
        render_info(&mut sheet, Slot::Right, 14, "Sin alarmas");
        assert_eq!(sheet.text(14, 19), Some("Sin alarmas"));
        assert_eq!(sheet.merges()[0], Region::span(14, "S", "AG"));
    }

    proptest! {
        #[test]
        fn max_is_never_below_min(values in prop::collection::vec(prop::option::of(-1e6f64..1e6), 0..40)) {
            let mut t = DatasetTable::with_series(["s"]);
            for (i, v) in values.iter().enumerate() {
                t.push_row(ts(1, (i / 60) as u32, (i % 60) as u32), vec![*v]);
            }
            let stats = compute_stats(&t);
            match (stats[0].max, stats[0].min) {
                (Some(max), Some(min)) => prop_assert!(max.value >= min.value),
                (None, None) => prop_assert!(values.iter().all(Option::is_none)),
                _ => prop_assert!(false, "max and min must both exist or both be absent"),
            }
        }
    }
}
