//! Color palettes for each theme.

use super::settings::ColorTheme;
use super::surface::Rgba;

pub struct Palette {
    pub background: Rgba,
    pub colors: [Rgba; 4],
}

impl Palette {
    /// Color of element `index`, cycling through the palette
    pub fn color(&self, index: usize) -> Rgba {
        self.colors[index % self.colors.len()]
    }
}

pub fn palette(theme: ColorTheme) -> Palette {
    match theme {
        ColorTheme::Neon => Palette {
            background: Rgba::from_hex(0x05050f),
            colors: [
                Rgba::from_hex(0x00ffff),
                Rgba::from_hex(0xff00ff),
                Rgba::from_hex(0x00ff88),
                Rgba::from_hex(0xffff00),
            ],
        },
        ColorTheme::Sunset => Palette {
            background: Rgba::from_hex(0x140508),
            colors: [
                Rgba::from_hex(0xff6b35),
                Rgba::from_hex(0xf7931e),
                Rgba::from_hex(0xffd23f),
                Rgba::from_hex(0xee4266),
            ],
        },
        ColorTheme::Mono => Palette {
            background: Rgba::from_hex(0x000000),
            colors: [
                Rgba::from_hex(0xffffff),
                Rgba::from_hex(0xcccccc),
                Rgba::from_hex(0x999999),
                Rgba::from_hex(0x666666),
            ],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_palette_cycles() {
        let neon = palette(ColorTheme::Neon);
        assert_eq!(neon.color(0), neon.color(4));
        assert_eq!(neon.color(1), Rgba::from_hex(0xff00ff));
    }
}
