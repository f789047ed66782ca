use crate::document::{Rgb, Sheet};
use crate::engine::cursor::{Placement, Slot};
use crate::engine::palette::Palette;
use crate::engine::panel::{ChartKind, PanelDescriptor, SizeClass};

// ======================================================
// GRID GEOMETRY (pixels)
// ======================================================

pub const CELL_WIDTH_PX: u32 = 18;
pub const CELL_HEIGHT_PX: u32 = 20;

pub const FULL_WIDTH_PX: u32 = CELL_WIDTH_PX * 34;
pub const HALF_WIDTH_PX: u32 = FULL_WIDTH_PX / 2;

pub const SMALL_HEIGHT_PX: u32 = (CELL_HEIGHT_PX / 2) * 16;
pub const MEDIUM_HEIGHT_PX: u32 = (CELL_HEIGHT_PX / 4) * 20;
pub const LARGE_HEIGHT_PX: u32 = SMALL_HEIGHT_PX * 2;

pub const LEFT_X_PX: u32 = CELL_WIDTH_PX / 2;
pub const RIGHT_X_PX: u32 = LEFT_X_PX + HALF_WIDTH_PX + CELL_WIDTH_PX / 2;
pub const Y_OFFSET_PX: u32 = CELL_HEIGHT_PX / 4;

/// Series line width in points (9000 EMU).
pub const LINE_WIDTH_PT: f64 = 0.71;

// ======================================================
// CHART OBJECT
// ======================================================

/// A 1-based cell range on a named sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRange {
    pub sheet:     String,
    pub first_row: u32,
    pub first_col: u16,
    pub last_row:  u32,
    pub last_col:  u16,
}

impl SheetRange {
    pub fn column(sheet: &str, col: u16, first_row: u32, last_row: u32) -> Self {
        SheetRange {
            sheet: sheet.to_string(),
            first_row,
            first_col: col,
            last_row,
            last_col: col,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    /// Legend label; only set when the legend is shown.
    pub name:       Option<String>,
    pub values:     SheetRange,
    /// Timestamp labels; unbound when the sheet holds no data rows.
    pub categories: Option<SheetRange>,
    pub color:      Rgb,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AxisStyle {
    pub font_size:   f64,
    pub font_color:  Rgb,
    pub labels_low:  bool,
    pub min:         Option<f64>,
    pub max:         Option<f64>,
    /// `None` leaves the major unit to the spreadsheet application.
    pub major_unit:  Option<f64>,
    pub minor_unit:  Option<f64>,
    pub crosses_min: bool,
}

impl AxisStyle {
    fn labels(font_size: f64) -> Self {
        AxisStyle {
            font_size,
            font_color:  Rgb::GREY,
            labels_low:  false,
            min:         None,
            max:         None,
            major_unit:  None,
            minor_unit:  None,
            crosses_min: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegendStyle {
    pub font_size:  f64,
    pub font_color: Rgb,
}

/// Plot-area manual layout as fractions of the chart area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlotLayout {
    pub x:      f64,
    pub y:      f64,
    pub width:  f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartObject {
    pub kind:        ChartKind,
    pub title:       String,
    pub title_size:  f64,
    pub title_color: Rgb,
    pub series:      Vec<ChartSeries>,
    pub x_axis:      AxisStyle,
    pub y_axis:      AxisStyle,
    pub legend:      Option<LegendStyle>,
    pub gap:         u16,
    pub overlap:     i8,
    pub line_width:  f64,
    pub style:       u8,
    pub plot_layout: PlotLayout,

    /// Anchor cell (1-based) and pixel offsets from its top-left corner.
    pub anchor_row:  u32,
    pub anchor_col:  u16,
    pub x_offset:    u32,
    pub y_offset:    u32,
    pub width:       u32,
    pub height:      u32,
}

// ======================================================
// RENDER
// ======================================================

pub fn height_px(size: SizeClass) -> u32 {
    match size {
        SizeClass::Small  => SMALL_HEIGHT_PX,
        SizeClass::Medium => MEDIUM_HEIGHT_PX,
        SizeClass::Large  => LARGE_HEIGHT_PX,
    }
}

/// Horizontal offset and width of a slot.
pub fn slot_geometry(slot: Slot) -> (u32, u32) {
    match slot {
        Slot::Full  => (LEFT_X_PX, FULL_WIDTH_PX),
        Slot::Left  => (LEFT_X_PX, HALF_WIDTH_PX),
        Slot::Right => (RIGHT_X_PX, HALF_WIDTH_PX),
    }
}

/// Build the chart for `panel` from its raw-data sheet: column A holds the
/// timestamps, every other column of row 1 names a series.
pub fn render(panel: &PanelDescriptor, data: &Sheet, placement: &Placement, palette: &Palette) -> ChartObject {
    let data_rows = data.max_row().saturating_sub(1);
    let last_row = 1 + data_rows.max(1);

    let series: Vec<ChartSeries> = series_columns(data)
        .enumerate()
        .map(|(i, (col, name))| ChartSeries {
            name:       panel.show_legend.then(|| name.to_string()),
            values:     SheetRange::column(&data.name, col, 2, last_row),
            categories: (data_rows > 0).then(|| SheetRange::column(&data.name, 1, 2, last_row)),
            color:      palette.color(i),
        })
        .collect();

    let mut x_axis = AxisStyle::labels(5.0);
    x_axis.labels_low = true;

    let mut y_axis = AxisStyle::labels(7.0);
    if panel.is_binary {
        y_axis.min = Some(0.0);
        y_axis.max = Some(1.0);
        y_axis.minor_unit = Some(1.0);
        y_axis.crosses_min = true;
    }

    let (x_offset, width) = slot_geometry(placement.slot);

    ChartObject {
        kind: panel.chart_kind,
        title: panel.name.clone(),
        title_size: 11.0,
        title_color: Rgb::GREY,
        series,
        x_axis,
        y_axis,
        legend: panel.show_legend.then_some(LegendStyle {
            font_size:  8.0,
            font_color: Rgb::BLACK,
        }),
        gap: 150,
        overlap: -25,
        line_width: LINE_WIDTH_PT,
        style: 1,
        plot_layout: PlotLayout { x: 0.02, y: 0.1, width: 0.98, height: 0.85 },
        anchor_row: placement.row,
        anchor_col: 1,
        x_offset,
        y_offset: Y_OFFSET_PX,
        width,
        height: height_px(panel.size_class),
    }
}

/// Non-timestamp header cells of a raw-data sheet, in column order.
pub fn series_columns(data: &Sheet) -> impl Iterator<Item = (u16, &str)> {
    (2u16..)
        .map(move |col| (col, data.text(1, col)))
        .take_while(|(_, name)| name.is_some())
        .filter_map(|(col, name)| name.map(|n| (col, n)))
}

// ======================================================
// TESTS
// ======================================================
