pub mod dataset;
pub mod panel;

pub use panel::AnnotationMode;

pub mod cursor;
pub mod palette;
pub mod chart;
pub mod summary;

pub mod assembler;

pub use assembler::{ReportBuilder, ReportOptions};
