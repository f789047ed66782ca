use std::path::Path;

use rust_xlsxwriter::{
    Chart, ChartAxisCrossing, ChartAxisLabelPosition, ChartAxisTickType, ChartFont, ChartFormat,
    ChartLayout, ChartLegendPosition, ChartLine, ChartMarker, ChartSolidFill, ChartType, Color,
    Format, FormatAlign, FormatBorder, Image, Workbook, Worksheet,
};
use tracing::{debug, info};

use crate::document::{CellStyle, CellValue, PageSetup, Region, ReportDocument, Rgb, Sheet};
use crate::engine::assembler::REPORT_SHEET;
use crate::engine::chart::{AxisStyle, ChartObject, SheetRange};
use crate::engine::panel::ChartKind;
use crate::error::{ReportError, Result};

const PAPER_A4: u8 = 9;

// ======================================================
// SAVE
// ======================================================

/// Serialize `doc` to an `.xlsx` file at `path`.
pub fn save(doc: &ReportDocument, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| ReportError::io(parent, e))?;
        }
    }

    let mut workbook = Workbook::new();
    for sheet in doc.sheets() {
        let worksheet = workbook.add_worksheet();
        write_sheet(worksheet, sheet)?;
        debug!(sheet = %sheet.name, kind = ?sheet.kind, charts = sheet.charts.len(), "sheet written");
    }

    workbook.save(path)?;
    info!(path = %path.display(), sheets = doc.sheets().len(), "report saved");
    Ok(())
}

fn write_sheet(ws: &mut Worksheet, sheet: &Sheet) -> Result<()> {
    ws.set_name(&sheet.name)?;

    if let Some(grid) = sheet.grid {
        for col in 0..grid.columns {
            ws.set_column_width_pixels(col, grid.column_width_px)?;
        }
        for row in 0..grid.rows {
            ws.set_row_height_pixels(row, grid.row_height_px)?;
        }
    }

    if let Some(page) = &sheet.page {
        apply_page_setup(ws, page);
    }

    for region in sheet.merges() {
        write_merge(ws, sheet, region)?;
    }

    for (&(row, col), value) in sheet.cells() {
        if sheet.merges().iter().any(|m| m.contains(row, col)) {
            continue;
        }
        let format = sheet.style(row, col).map(to_format);
        write_value(ws, row - 1, col - 1, value, format.as_ref())?;
    }

    // styled cells with no value outside merges, such as table borders
    for (&(row, col), style) in sheet.styles() {
        if sheet.value(row, col).is_some() || sheet.merges().iter().any(|m| m.contains(row, col)) {
            continue;
        }
        ws.write_blank(row - 1, col - 1, &to_format(style))?;
    }

    for image in &sheet.images {
        let img = Image::new(&image.path)?.set_scale_to_size(image.width_px, image.height_px, false);
        ws.insert_image(image.row - 1, image.col - 1, &img)?;
    }

    for object in &sheet.charts {
        let chart = build_chart(object);
        ws.insert_chart_with_offset(
            object.anchor_row - 1,
            object.anchor_col - 1,
            &chart,
            object.x_offset,
            object.y_offset,
        )?;
    }

    Ok(())
}

fn write_merge(ws: &mut Worksheet, sheet: &Sheet, region: &Region) -> Result<()> {
    let format = sheet
        .style(region.first_row, region.first_col)
        .map(to_format)
        .unwrap_or_else(Format::new);
    let value = sheet.value(region.first_row, region.first_col);
    let text = match value {
        Some(CellValue::Text(s)) => s.as_str(),
        _ => "",
    };

    ws.merge_range(
        region.first_row - 1,
        region.first_col - 1,
        region.last_row - 1,
        region.last_col - 1,
        text,
        &format,
    )?;

    if let Some(CellValue::Number(n)) = value {
        ws.write_number_with_format(region.first_row - 1, region.first_col - 1, *n, &format)?;
    }

    Ok(())
}

fn write_value(ws: &mut Worksheet, row: u32, col: u16, value: &CellValue, format: Option<&Format>) -> Result<()> {
    match (value, format) {
        (CellValue::Text(s), Some(f))   => ws.write_string_with_format(row, col, s, f)?,
        (CellValue::Text(s), None)      => ws.write_string(row, col, s)?,
        (CellValue::Number(n), Some(f)) => ws.write_number_with_format(row, col, *n, f)?,
        (CellValue::Number(n), None)    => ws.write_number(row, col, *n)?,
    };
    Ok(())
}

fn color(rgb: Rgb) -> Color {
    Color::RGB(rgb.0)
}

fn to_format(style: &CellStyle) -> Format {
    let mut format = Format::new();
    if style.bold {
        format = format.set_bold();
    }
    if let Some(size) = style.font_size {
        format = format.set_font_size(size);
    }
    if let Some(c) = style.font_color {
        format = format.set_font_color(color(c));
    }
    if let Some(c) = style.fill {
        format = format.set_background_color(color(c));
    }
    if style.border {
        format = format.set_border(FormatBorder::Thin);
    }
    if style.centered {
        format = format
            .set_align(FormatAlign::Center)
            .set_align(FormatAlign::VerticalCenter);
    }
    format
}

// ──────────────────────────────────────────────────────
// page setup
// ──────────────────────────────────────────────────────

/// Excel header/footer control codes treat `&` as an escape.
fn escape_header(text: &str) -> String {
    text.replace('&', "&&")
}

pub fn header_text(page: &PageSetup) -> Option<String> {
    page.header.as_ref().map(|h| {
        format!(
            "&C&\"{}\"&{}{}",
            page.header_font,
            page.header_size,
            escape_header(h)
        )
    })
}

pub fn footer_text(page: &PageSetup) -> String {
    let mut footer = String::new();
    if page.footer_page_number {
        footer.push_str("&C&P");
    }
    if let Some(right) = &page.footer_right {
        footer.push_str("&R");
        footer.push_str(&escape_header(right));
    }
    footer
}

fn apply_page_setup(ws: &mut Worksheet, page: &PageSetup) {
    if page.page_layout_view {
        ws.set_view_page_layout();
    }
    if page.hide_gridlines {
        ws.set_screen_gridlines(false);
    }
    if page.portrait {
        ws.set_portrait();
    } else {
        ws.set_landscape();
    }
    if page.paper_a4 {
        ws.set_paper_size(PAPER_A4);
    }
    if let Some(header) = header_text(page) {
        ws.set_header(&header);
    }
    let footer = footer_text(page);
    if !footer.is_empty() {
        ws.set_footer(&footer);
    }
}

// ──────────────────────────────────────────────────────
// charts
// ──────────────────────────────────────────────────────

fn range_tuple(r: &SheetRange) -> (&str, u32, u16, u32, u16) {
    (
        r.sheet.as_str(),
        r.first_row - 1,
        r.first_col - 1,
        r.last_row - 1,
        r.last_col - 1,
    )
}

fn axis_font(axis: &AxisStyle) -> ChartFont {
    let mut font = ChartFont::new();
    font.set_size(axis.font_size)
        .set_color(color(axis.font_color))
        .set_rotation(0);
    font
}

fn build_chart(object: &ChartObject) -> Chart {
    let mut chart = match object.kind {
        ChartKind::Line => Chart::new(ChartType::Line),
        ChartKind::Bar  => Chart::new(ChartType::Column),
    };

    for series in &object.series {
        let mut line = ChartLine::new();
        line.set_color(color(series.color)).set_width(object.line_width);
        let mut fill = ChartSolidFill::new();
        fill.set_color(color(series.color));
        let mut format = ChartFormat::new();
        format.set_line(&line).set_solid_fill(&fill);
        let mut marker = ChartMarker::new();
        marker.set_format(&mut format);

        let s = chart
            .add_series()
            .set_values(range_tuple(&series.values))
            .set_format(&mut format)
            .set_marker(&marker)
            .set_gap(object.gap)
            .set_overlap(object.overlap);
        if let Some(categories) = &series.categories {
            s.set_categories(range_tuple(categories));
        }
        if let Some(name) = &series.name {
            s.set_name(name.as_str());
        }
    }

    if object.series.is_empty() {
        // the format requires at least one series; bind an empty cell
        chart.add_series().set_values((REPORT_SHEET, 0, 0, 0, 0));
    }

    chart.title().set_name(&object.title).set_font(
        &ChartFont::new()
            .set_size(object.title_size)
            .set_bold()
            .set_color(color(object.title_color)),
    );

    let x = &object.x_axis;
    let x_axis = chart
        .x_axis()
        .set_font(&axis_font(x))
        .set_major_tick_type(ChartAxisTickType::None)
        .set_minor_tick_type(ChartAxisTickType::None);
    if x.labels_low {
        x_axis.set_label_position(ChartAxisLabelPosition::Low);
    }

    let y = &object.y_axis;
    let y_axis = chart
        .y_axis()
        .set_font(&axis_font(y))
        .set_major_tick_type(ChartAxisTickType::None)
        .set_minor_tick_type(ChartAxisTickType::None);
    if let Some(min) = y.min {
        y_axis.set_min(min);
    }
    if let Some(max) = y.max {
        y_axis.set_max(max);
    }
    if let Some(unit) = y.major_unit {
        y_axis.set_major_unit(unit);
    }
    if let Some(unit) = y.minor_unit {
        y_axis.set_minor_unit(unit);
    }
    if y.crosses_min {
        y_axis.set_crossing(ChartAxisCrossing::Min);
    }

    match &object.legend {
        Some(legend) => {
            chart
                .legend()
                .set_position(ChartLegendPosition::Top)
                .set_font(
                    &ChartFont::new()
                        .set_size(legend.font_size)
                        .set_color(color(legend.font_color)),
                );
        }
        None => {
            chart.legend().set_hidden();
        }
    }

    let plot = object.plot_layout;
    let layout = ChartLayout::new()
        .set_offset(plot.x, plot.y)
        .set_dimensions(plot.width, plot.height);
    chart.plot_area().set_layout(&layout);

    chart
        .set_style(object.style)
        .set_width(object.width)
        .set_height(object.height);

    chart
}

// ======================================================
// TESTS
// ======================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::assembler::{DatasetSource, ReportBuilder, ReportOptions, DEFAULT_ATTRIBUTION};
    use crate::engine::dataset::{tests::ts, DatasetTable};
    use crate::engine::panel::{AnnotationMode, DashboardGroup, PanelDescriptor, SizeClass};

    struct Fixed;

    impl DatasetSource for Fixed {
        fn load(&self, _group: &DashboardGroup, panel: &PanelDescriptor) -> DatasetTable {
            let mut t = DatasetTable::new();
            if panel.id == 1 {
                for i in 0..5 {
                    t.record(ts(1 + i, 0, 0), "level", 1.0 + i as f64);
                }
            }
            t
        }
    }

    fn page() -> PageSetup {
        PageSetup {
            page_layout_view:   true,
            hide_gridlines:     true,
            portrait:           true,
            paper_a4:           true,
            header:             Some("Planta A&B".to_string()),
            header_font:        "Arial,Bold".to_string(),
            header_size:        14,
            footer_page_number: true,
            footer_right:       Some(DEFAULT_ATTRIBUTION.to_string()),
        }
    }

    #[test]
    fn header_and_footer_codes() {
        assert_eq!(header_text(&page()).unwrap(), "&C&\"Arial,Bold\"&14Planta A&&B");
        assert_eq!(footer_text(&page()), format!("&C&P&R{}", DEFAULT_ATTRIBUTION));
    }

    #[test]
    fn saves_a_report_with_charts_and_empty_panels() {
        let group = DashboardGroup::new("g", "Depósito", "uid")
            .with_panel(
                PanelDescriptor::new(1, "Nivel", ChartKind::Line, SizeClass::Small)
                    .annotate(AnnotationMode::MaxMin, "Nivel", "m"),
            )
            .with_panel(
                PanelDescriptor::new(2, "Bomba: estado", ChartKind::Bar, SizeClass::Small)
                    .binary(true)
                    .legend(true)
                    .annotate(AnnotationMode::Info, "Sin datos", ""),
            )
            .with_panel(
                PanelDescriptor::new(3, "Caudal", ChartKind::Line, SizeClass::Large)
                    .annotate(AnnotationMode::Table, "Caudal", "m3/h"),
            );

        let options = ReportOptions::new("Weekly", ts(8, 12, 0), ts(15, 12, 0));
        let doc = ReportBuilder::new(options.clone()).build(&[group], &Fixed).unwrap();

        let names: Vec<&str> = doc.sheets().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Informe", "DATOS", "Nivel", "Bomba_ estado", "Caudal"]);
        assert_eq!(doc.chart_count(), 3);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join(options.filename());
        save(&doc, &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], b"PK");

        // zip entry names are stored uncompressed
        for part in 1..=5 {
            assert!(has_entry(&bytes, &format!("xl/worksheets/sheet{}.xml", part)));
        }
        assert!(!has_entry(&bytes, "xl/worksheets/sheet6.xml"));
        for part in 1..=3 {
            assert!(has_entry(&bytes, &format!("xl/charts/chart{}.xml", part)));
        }
        assert!(!has_entry(&bytes, "xl/charts/chart4.xml"));
        assert!(has_entry(&bytes, "xl/drawings/drawing1.xml"));
    }

    fn has_entry(zip: &[u8], name: &str) -> bool {
        zip.windows(name.len()).any(|w| w == name.as_bytes())
    }
}
