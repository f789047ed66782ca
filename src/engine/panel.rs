use serde::{Deserialize, Serialize};

use crate::error::{ReportError, Result};

/// Longest panel name the report accepts. Panel names become raw-data
/// sheet names, which the xlsx format caps at 31 characters.
pub const MAX_PANEL_NAME: usize = 30;

// ======================================================
// PANEL ENUMS
// ======================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    #[serde(alias = "L")]
    Line,
    #[serde(alias = "B")]
    Bar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    #[serde(alias = "P")]
    Small,
    #[serde(alias = "M")]
    Medium,
    #[serde(alias = "G")]
    Large,
}

impl SizeClass {
    /// Rows the chart itself occupies on the report sheet.
    pub const fn height(self) -> u32 {
        match self {
            SizeClass::Small  => 9,
            SizeClass::Medium => 6,
            SizeClass::Large  => 17,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationMode {
    #[default]
    #[serde(alias = "")]
    None,
    #[serde(alias = "INFO")]
    Info,
    #[serde(alias = "MAXMIN")]
    MaxMin,
    #[serde(alias = "TABLA")]
    Table,
}

impl AnnotationMode {
    /// Rows reserved below the chart for the annotation. Tables grow with
    /// the number of series: one spacer row, one header row, one per series.
    pub fn extra_rows(self, series_count: usize) -> u32 {
        match self {
            AnnotationMode::None   => 0,
            AnnotationMode::Info   => 1,
            AnnotationMode::MaxMin => 2,
            AnnotationMode::Table  => 2 + series_count as u32,
        }
    }
}

// ======================================================
// PANEL DESCRIPTOR
// ======================================================

/// One chart block of the report. `id` is the Grafana panel id inside the
/// group's dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelDescriptor {
    pub id:   u64,
    pub name: String,

    #[serde(rename = "kind", default = "default_kind")]
    pub chart_kind: ChartKind,

    #[serde(rename = "size", default = "default_size")]
    pub size_class: SizeClass,

    #[serde(rename = "binary", default)]
    pub is_binary: bool,

    #[serde(rename = "legend", default)]
    pub show_legend: bool,

    #[serde(rename = "annotation", default)]
    pub annotation_mode: AnnotationMode,

    /// Info message, MaxMin label or Table label depending on the mode.
    #[serde(rename = "text", default)]
    pub annotation_text: String,

    #[serde(rename = "unit", default)]
    pub annotation_unit: String,
}

fn default_kind() -> ChartKind {
    ChartKind::Line
}

fn default_size() -> SizeClass {
    SizeClass::Large
}

impl PanelDescriptor {
    #[cfg(test)]
    pub fn new(id: u64, name: &str, chart_kind: ChartKind, size_class: SizeClass) -> Self {
        PanelDescriptor {
            id,
            name: name.to_string(),
            chart_kind,
            size_class,
            is_binary: false,
            show_legend: false,
            annotation_mode: AnnotationMode::None,
            annotation_text: String::new(),
            annotation_unit: String::new(),
        }
    }

    #[cfg(test)]
    pub fn binary(mut self, is_binary: bool) -> Self {
        self.is_binary = is_binary;
        self
    }

    #[cfg(test)]
    pub fn legend(mut self, show_legend: bool) -> Self {
        self.show_legend = show_legend;
        self
    }

    #[cfg(test)]
    pub fn annotate(mut self, mode: AnnotationMode, text: &str, unit: &str) -> Self {
        self.annotation_mode = mode;
        self.annotation_text = text.to_string();
        self.annotation_unit = unit.to_string();
        self
    }

    pub fn validate(&self) -> Result<()> {
        let len = self.name.chars().count();
        if len == 0 {
            return Err(ReportError::Validation(format!(
                "panel {} has an empty name",
                self.id
            )));
        }
        if len > MAX_PANEL_NAME {
            return Err(ReportError::Validation(format!(
                "panel name '{}' is {} characters long (limit {})",
                self.name, len, MAX_PANEL_NAME
            )));
        }
        Ok(())
    }

    /// Small panels pack two per row, except when a table follows them:
    /// the table spans the full page width.
    pub fn is_pairable(&self) -> bool {
        self.size_class == SizeClass::Small && self.annotation_mode != AnnotationMode::Table
    }
}

// ======================================================
// DASHBOARD GROUP
// ======================================================

/// A Grafana dashboard rendered as one titled section of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardGroup {
    /// Sub-directory for this group's intermediate files.
    pub key:    String,
    /// Section header text.
    pub title:  String,
    /// Grafana dashboard uid.
    #[serde(default)]
    pub uid:    String,
    #[serde(default)]
    pub panels: Vec<PanelDescriptor>,
}

impl DashboardGroup {
    #[cfg(test)]
    pub fn new(key: &str, title: &str, uid: &str) -> Self {
        DashboardGroup {
            key: key.to_string(),
            title: title.to_string(),
            uid: uid.to_string(),
            panels: vec![],
        }
    }

    #[cfg(test)]
    pub fn with_panel(mut self, panel: PanelDescriptor) -> Self {
        self.panels.push(panel);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(ReportError::Validation(format!(
                "dashboard '{}' has an empty key",
                self.title
            )));
        }
        for panel in &self.panels {
            panel.validate()?;
        }
        Ok(())
    }
}

// ======================================================
// TESTS
// ======================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_names_over_the_sheet_limit() {
        let panel = PanelDescriptor::new(1, &"x".repeat(31), ChartKind::Line, SizeClass::Small);
        assert!(matches!(panel.validate(), Err(ReportError::Validation(_))));

        let panel = PanelDescriptor::new(1, &"x".repeat(30), ChartKind::Line, SizeClass::Small);
        assert!(panel.validate().is_ok());
    }

    #[test]
    fn rejects_empty_names() {
        let panel = PanelDescriptor::new(7, "", ChartKind::Bar, SizeClass::Medium);
        assert!(panel.validate().is_err());
    }

    #[test]
    fn group_validation_covers_every_panel() {
        let group = DashboardGroup::new("plant", "Plant", "uid")
            .with_panel(PanelDescriptor::new(1, "ok", ChartKind::Line, SizeClass::Small))
            .with_panel(PanelDescriptor::new(2, &"y".repeat(40), ChartKind::Line, SizeClass::Small));
        assert!(group.validate().is_err());
    }

    #[test]
    fn annotation_rows_per_mode() {
        assert_eq!(AnnotationMode::None.extra_rows(3), 0);
        assert_eq!(AnnotationMode::Info.extra_rows(3), 1);
        assert_eq!(AnnotationMode::MaxMin.extra_rows(3), 2);
        assert_eq!(AnnotationMode::Table.extra_rows(3), 5);
    }

    #[test]
    fn small_table_panels_do_not_pair() {
        let small = PanelDescriptor::new(1, "a", ChartKind::Line, SizeClass::Small);
        assert!(small.is_pairable());
        let table = small.clone().annotate(AnnotationMode::Table, "T", "");
        assert!(!table.is_pairable());
    }

    #[test]
    fn parses_named_fields_and_legacy_codes() {
        let yaml = r#"
id: 4
name: Caudal
kind: B
size: P
binary: true
annotation: MAXMIN
text: Caudal
unit: m3/h
"#;
        let panel: PanelDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(panel.chart_kind, ChartKind::Bar);
        assert_eq!(panel.size_class, SizeClass::Small);
        assert_eq!(panel.annotation_mode, AnnotationMode::MaxMin);
        assert!(panel.is_binary);
        assert!(!panel.show_legend);
    }
}
