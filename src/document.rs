//! In-memory spreadsheet model produced by the report assembler.
//!
//! Rows and columns are 1-based, the way they read on the sheet (`A1` is
//! row 1, column 1). The model records *what* goes *where* with which style;
//! `xlsx` turns it into a file.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::engine::chart::ChartObject;

// ======================================================
// COLORS & COORDINATES
// ======================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb(pub u32);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0x000000);
    pub const WHITE: Rgb = Rgb(0xFFFFFF);
    pub const GREY:  Rgb = Rgb(0x808080);
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06X}", self.0)
    }
}

/// Column number of a letter reference: `A` → 1, `AG` → 33.
pub fn column_index(letters: &str) -> u16 {
    letters
        .bytes()
        .filter(|b| b.is_ascii_alphabetic())
        .fold(0u16, |acc, b| acc * 26 + (b.to_ascii_uppercase() - b'A' + 1) as u16)
}

/// Letter reference of a column number: 1 → `A`, 33 → `AG`.
pub fn column_letters(mut col: u16) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        col = (col - 1) / 26;
    }
    letters.iter().rev().collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub first_row: u32,
    pub first_col: u16,
    pub last_row:  u32,
    pub last_col:  u16,
}

impl Region {
    pub fn cell(row: u32, col: u16) -> Self {
        Region { first_row: row, first_col: col, last_row: row, last_col: col }
    }

    /// Cells `from..=to` of one row, by column letters.
    pub fn span(row: u32, from: &str, to: &str) -> Self {
        Region {
            first_row: row,
            first_col: column_index(from),
            last_row:  row,
            last_col:  column_index(to),
        }
    }

    pub fn is_single(&self) -> bool {
        self.first_row == self.last_row && self.first_col == self.last_col
    }

    pub fn contains(&self, row: u32, col: u16) -> bool {
        (self.first_row..=self.last_row).contains(&row)
            && (self.first_col..=self.last_col).contains(&col)
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        self.first_row <= other.last_row
            && other.first_row <= self.last_row
            && self.first_col <= other.last_col
            && other.first_col <= self.last_col
    }

    fn cells(&self) -> impl Iterator<Item = (u32, u16)> + '_ {
        (self.first_row..=self.last_row)
            .flat_map(move |r| (self.first_col..=self.last_col).map(move |c| (r, c)))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_letters(self.first_col), self.first_row)?;
        if !self.is_single() {
            write!(f, ":{}{}", column_letters(self.last_col), self.last_row)?;
        }
        Ok(())
    }
}

// ======================================================
// CELLS & STYLES
// ======================================================

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
}

impl CellValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            CellValue::Number(_) => None,
        }
    }

}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

/// Style overlay for a cell. `None`/`false` fields leave the default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellStyle {
    pub bold:       bool,
    pub font_size:  Option<f64>,
    pub font_color: Option<Rgb>,
    pub fill:       Option<Rgb>,
    pub border:     bool,
    pub centered:   bool,
}

impl CellStyle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    pub fn size(mut self, points: f64) -> Self {
        self.font_size = Some(points);
        self
    }

    pub fn color(mut self, color: Rgb) -> Self {
        self.font_color = Some(color);
        self
    }

    pub fn fill(mut self, color: Rgb) -> Self {
        self.fill = Some(color);
        self
    }

    pub fn border(mut self) -> Self {
        self.border = true;
        self
    }

    pub fn centered(mut self) -> Self {
        self.centered = true;
        self
    }

    pub fn is_plain(&self) -> bool {
        *self == CellStyle::default()
    }

    /// Layer `other` on top of `self`.
    pub fn overlay(&self, other: &CellStyle) -> CellStyle {
        CellStyle {
            bold:       self.bold || other.bold,
            font_size:  other.font_size.or(self.font_size),
            font_color: other.font_color.or(self.font_color),
            fill:       other.fill.or(self.fill),
            border:     self.border || other.border,
            centered:   self.centered || other.centered,
        }
    }
}

// ======================================================
// PAGE SETUP & IMAGES
// ======================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PageSetup {
    pub page_layout_view: bool,
    pub hide_gridlines:   bool,
    pub portrait:         bool,
    pub paper_a4:         bool,
    /// Centered page header text.
    pub header:           Option<String>,
    pub header_font:      String,
    pub header_size:      u32,
    /// Page number in the footer center.
    pub footer_page_number: bool,
    /// Right-aligned footer text, same on odd and even pages.
    pub footer_right:     Option<String>,
}

/// Uniform column widths and row heights, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub columns:         u16,
    pub column_width_px: u16,
    pub rows:            u32,
    pub row_height_px:   u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub path:      PathBuf,
    pub row:       u32,
    pub col:       u16,
    pub width_px:  u32,
    pub height_px: u32,
}

// ======================================================
// SHEET
// ======================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetKind {
    /// The printable report with charts and summaries.
    Report,
    /// Computed statistics scratch sheet.
    Stats,
    /// Filtered rows backing one panel's chart.
    RawData,
}

#[derive(Debug, Clone)]
pub struct Sheet {
    pub name:   String,
    pub kind:   SheetKind,
    cells:      BTreeMap<(u32, u16), CellValue>,
    styles:     BTreeMap<(u32, u16), CellStyle>,
    merges:     Vec<Region>,
    pub charts: Vec<ChartObject>,
    pub images: Vec<Image>,
    pub page:   Option<PageSetup>,
    pub grid:   Option<Grid>,
}

impl Sheet {
    pub fn new(name: &str, kind: SheetKind) -> Self {
        Sheet {
            name: name.to_string(),
            kind,
            cells: BTreeMap::new(),
            styles: BTreeMap::new(),
            merges: vec![],
            charts: vec![],
            images: vec![],
            page: None,
            grid: None,
        }
    }

    pub fn write(&mut self, row: u32, col: u16, value: impl Into<CellValue>) {
        self.cells.insert((row, col), value.into());
    }

    /// Write `value` into the top-left cell of `region`, merge the region and
    /// style all of it. A region overlapping an earlier merge keeps the value
    /// and style but is not merged again.
    pub fn merge(&mut self, region: Region, value: impl Into<CellValue>, style: &CellStyle) {
        self.write(region.first_row, region.first_col, value);
        if !region.is_single() && !self.merges.iter().any(|m| m.overlaps(&region)) {
            self.merges.push(region);
        }
        self.style_region(region, style);
    }

    pub fn style_region(&mut self, region: Region, style: &CellStyle) {
        if style.is_plain() {
            return;
        }
        for cell in region.cells() {
            let merged = self
                .styles
                .get(&cell)
                .map(|existing| existing.overlay(style))
                .unwrap_or_else(|| style.clone());
            self.styles.insert(cell, merged);
        }
    }

    pub fn value(&self, row: u32, col: u16) -> Option<&CellValue> {
        self.cells.get(&(row, col))
    }

    pub fn text(&self, row: u32, col: u16) -> Option<&str> {
        self.value(row, col).and_then(CellValue::as_text)
    }

    pub fn style(&self, row: u32, col: u16) -> Option<&CellStyle> {
        self.styles.get(&(row, col))
    }

    pub fn cells(&self) -> impl Iterator<Item = (&(u32, u16), &CellValue)> {
        self.cells.iter()
    }

    pub fn styles(&self) -> impl Iterator<Item = (&(u32, u16), &CellStyle)> {
        self.styles.iter()
    }

    pub fn merges(&self) -> &[Region] {
        &self.merges
    }

    pub fn max_row(&self) -> u32 {
        self.cells.keys().map(|(r, _)| *r).max().unwrap_or(0)
    }

    /// Rows whose cells in `col` hold `text`.
    #[cfg(test)]
    pub fn rows_with_text(&self, col: u16, text: &str) -> Vec<u32> {
        self.cells
            .iter()
            .filter(|((_, c), v)| *c == col && v.as_text() == Some(text))
            .map(|((r, _), _)| *r)
            .collect()
    }
}

// ======================================================
// DOCUMENT
// ======================================================

#[derive(Debug, Clone, Default)]
pub struct ReportDocument {
    sheets: Vec<Sheet>,
}

impl ReportDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sheet: Sheet) {
        self.sheets.push(sheet);
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    #[cfg(test)]
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    #[cfg(test)]
    pub fn sheets_of(&self, kind: SheetKind) -> impl Iterator<Item = &Sheet> {
        self.sheets.iter().filter(move |s| s.kind == kind)
    }

    pub fn chart_count(&self) -> usize {
        self.sheets.iter().map(|s| s.charts.len()).sum()
    }
}

// ======================================================
// TESTS
// ======================================================
