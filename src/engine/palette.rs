use crate::document::Rgb;

/// Series colors for charts.
pub const PRIMARY: [Rgb; 7] = [
    Rgb(0xFF0000),
    Rgb(0x00FF00),
    Rgb(0x0000FF),
    Rgb(0x00FFFF),
    Rgb(0xFF00FF),
    Rgb(0xFFA500),
    Rgb(0x800080),
];

/// Lighter companions of `PRIMARY`, used as row fills in summary tables.
pub const SECONDARY: [Rgb; 7] = [
    Rgb(0xFF4D4D),
    Rgb(0x4DFF4D),
    Rgb(0x4D4DFF),
    Rgb(0x4DFFFF),
    Rgb(0xFF4DFF),
    Rgb(0xFFC04D),
    Rgb(0xCD00CD),
];

/// A cyclic color list. Lookups wrap around; `rotate` shifts the start by
/// one so consecutive panels begin on different colors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<Rgb>,
}

impl Palette {
    pub fn new(colors: &[Rgb]) -> Self {
        Palette {
            colors: colors.to_vec(),
        }
    }

    pub fn primary() -> Self {
        Self::new(&PRIMARY)
    }

    pub fn secondary() -> Self {
        Self::new(&SECONDARY)
    }

    pub fn color(&self, index: usize) -> Rgb {
        if self.colors.is_empty() {
            return Rgb::BLACK;
        }
        self.colors[index % self.colors.len()]
    }

    #[cfg(test)]
    pub fn colors(&self) -> &[Rgb] {
        &self.colors
    }

    pub fn rotate(&mut self) {
        if !self.colors.is_empty() {
            self.colors.rotate_left(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_wrap() {
        let palette = Palette::primary();
        assert_eq!(palette.color(0), palette.color(7));
        assert_eq!(palette.color(8), Rgb(0x00FF00));
    }

    #[test]
    fn rotation_after_k_steps_is_left_rotation_by_k() {
        for k in 0..20 {
            let mut palette = Palette::primary();
            for _ in 0..k {
                palette.rotate();
            }
            let mut expected = PRIMARY.to_vec();
            expected.rotate_left(k % PRIMARY.len());
            assert_eq!(palette.colors(), expected.as_slice());
        }
    }

    #[test]
    fn empty_palette_falls_back_to_black() {
        let mut palette = Palette::new(&[]);
        palette.rotate();
        assert_eq!(palette.color(3), Rgb::BLACK);
    }
}
