//! Color utilities for terminal output.
//!
//! Provides semantic color names so summary output stays visually
//! consistent, honoring the user's `--color` preference and whether stdout
//! is a terminal.

use owo_colors::OwoColorize;

use crate::cli::ColorOption;

/// Semantic color scheme for run output.
pub struct ColorScheme {
  enabled: bool,
}

impl ColorScheme {
  /// Create a color scheme from the user's preference, falling back to TTY
  /// detection for `auto`.
  pub fn new(color_option: ColorOption) -> Self {
    let enabled = match color_option {
      ColorOption::Always => true,
      ColorOption::Never => false,
      ColorOption::Auto => {
        use std::io::IsTerminal;
        std::io::stdout().is_terminal()
      }
    };

    Self { enabled }
  }

  /// Success messages (green).
  pub fn success<T: std::fmt::Display>(&self, text: T) -> String {
    if self.enabled {
      format!("{}", text.green())
    } else {
      text.to_string()
    }
  }

  /// Error messages (bright red, bold).
  pub fn error<T: std::fmt::Display>(&self, text: T) -> String {
    if self.enabled {
      format!("{}", text.bright_red().bold())
    } else {
      text.to_string()
    }
  }

  /// Warnings (yellow).
  pub fn warning<T: std::fmt::Display>(&self, text: T) -> String {
    if self.enabled {
      format!("{}", text.yellow())
    } else {
      text.to_string()
    }
  }

  /// Informational progress lines (cyan).
  pub fn info<T: std::fmt::Display>(&self, text: T) -> String {
    if self.enabled {
      format!("{}", text.cyan())
    } else {
      text.to_string()
    }
  }

  /// Emphasized labels (bright white, bold).
  pub fn emphasis<T: std::fmt::Display>(&self, text: T) -> String {
    if self.enabled {
      format!("{}", text.bright_white().bold())
    } else {
      text.to_string()
    }
  }

  /// De-emphasized details (gray).
  pub fn dimmed<T: std::fmt::Display>(&self, text: T) -> String {
    if self.enabled {
      format!("{}", text.bright_black())
    } else {
      text.to_string()
    }
  }

  /// Numeric values (bright magenta).
  pub fn number<T: std::fmt::Display>(&self, text: T) -> String {
    if self.enabled {
      format!("{}", text.bright_magenta())
    } else {
      text.to_string()
    }
  }

  /// Filesystem paths (bright blue).
  pub fn path<T: std::fmt::Display>(&self, text: T) -> String {
    if self.enabled {
      format!("{}", text.bright_blue())
    } else {
      text.to_string()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_never_disables_styling() {
    let colors = ColorScheme::new(ColorOption::Never);
    assert_eq!(colors.success("done"), "done");
    assert_eq!(colors.error("bad"), "bad");
    assert_eq!(colors.number(42), "42");
  }

  #[test]
  fn test_always_adds_escapes() {
    let colors = ColorScheme::new(ColorOption::Always);
    assert!(colors.success("done").contains("done"));
    assert_ne!(colors.success("done"), "done");
  }
}
