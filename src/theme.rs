//! Phosphor-green palette, with per-color overrides from the config file

use ratatui::style::Color;

use crate::config::ThemeOverrides;

/// Theme colors for the UI
#[derive(Debug, Clone)]
pub struct Theme {
    pub bg: Color,
    pub terminal: Color,       // Terminal pane text
    pub heading: Color,        // Title bar and pane titles
    pub thought: Color,        // Hacker thoughts text
    pub godmode: Color,        // GodMode input and notes
    pub input_bg: Color,
    pub border: Color,         // Inactive borders
    pub border_active: Color,  // Focused pane
    pub danger: Color,         // Failed commands, warnings
    pub text_dim: Color,       // Footer hints, timestamps
    pub debug: Color,          // API status log
    pub bg_selected: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            bg: Color::Rgb(10, 10, 10),             // #0a0a0a
            terminal: Color::Rgb(51, 255, 51),      // #33ff33
            heading: Color::Rgb(0, 255, 0),         // #00ff00
            thought: Color::Rgb(170, 255, 170),
            godmode: Color::Rgb(0, 255, 255),       // #00ffff
            input_bg: Color::Rgb(0, 31, 31),        // #001f1f
            border: Color::Rgb(0, 102, 0),
            border_active: Color::Rgb(0, 255, 0),
            danger: Color::Rgb(255, 85, 85),
            text_dim: Color::Rgb(0, 153, 0),
            debug: Color::Rgb(0, 200, 200),
            bg_selected: Color::Rgb(0, 60, 0),
        }
    }
}

impl Theme {
    /// Defaults with any valid override from the config applied
    pub fn load(overrides: &ThemeOverrides) -> Self {
        let mut theme = Self::default();

        let slots: [(&str, &Option<String>, &mut Color); 6] = [
            ("terminal", &overrides.terminal, &mut theme.terminal),
            ("heading", &overrides.heading, &mut theme.heading),
            ("godmode", &overrides.godmode, &mut theme.godmode),
            ("border", &overrides.border, &mut theme.border),
            ("danger", &overrides.danger, &mut theme.danger),
            ("text_dim", &overrides.text_dim, &mut theme.text_dim),
        ];

        for (name, value, slot) in slots {
            let Some(value) = value else { continue };
            match Self::parse_hex_color(value) {
                Some(color) => *slot = color,
                None => tracing::warn!("Ignoring theme.{}: {:?} is not a hex color", name, value),
            }
        }

        theme
    }

    /// Parse a hex color string (#RRGGBB or #RGB)
    pub fn parse_hex_color(s: &str) -> Option<Color> {
        let s = s.trim().trim_start_matches('#');
        if !s.is_ascii() {
            return None;
        }

        if s.len() == 6 {
            let r = u8::from_str_radix(&s[0..2], 16).ok()?;
            let g = u8::from_str_radix(&s[2..4], 16).ok()?;
            let b = u8::from_str_radix(&s[4..6], 16).ok()?;
            Some(Color::Rgb(r, g, b))
        } else if s.len() == 3 {
            let r = u8::from_str_radix(&s[0..1], 16).ok()? * 17;
            let g = u8::from_str_radix(&s[1..2], 16).ok()? * 17;
            let b = u8::from_str_radix(&s[2..3], 16).ok()? * 17;
            Some(Color::Rgb(r, g, b))
        } else {
            None
        }
    }
}
