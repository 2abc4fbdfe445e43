//! Terminal styles looked up by what the text is

use owo_colors::{OwoColorize, Style};
use std::fmt::Display;
use std::sync::OnceLock;

use crate::symbol::SymbolKind;

static THEME: OnceLock<Theme> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Header,
    Success,
    Error,
    Warn,
    Info,
    Dim,
    Muted,
    /// `file:line:column` of a match or usage
    Location,
    /// Matcher diagnostics attached to a source
    Diagnostic,
    Symbol(SymbolKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theme {
    colored: bool,
}

impl Theme {
    /// Colors unless `NO_COLOR` is set or stdout does not take them.
    pub fn detect() -> Self {
        let no_color = std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty());
        Self {
            colored: !no_color && console::colors_enabled(),
        }
    }

    pub fn colored() -> Self {
        Self { colored: true }
    }

    pub fn plain() -> Self {
        Self { colored: false }
    }

    pub fn is_colored(&self) -> bool {
        self.colored
    }

    pub fn style(&self, role: Role) -> Style {
        if !self.colored {
            return Style::new();
        }
        match role {
            Role::Header => Style::new().cyan().bold(),
            Role::Success => Style::new().green().bold(),
            Role::Error => Style::new().red().bold(),
            Role::Warn => Style::new().yellow().bold(),
            Role::Info => Style::new().magenta(),
            Role::Dim => Style::new().dimmed(),
            Role::Muted => Style::new().bright_black(),
            Role::Location => Style::new().blue().underline(),
            Role::Diagnostic => Style::new().red().italic(),
            Role::Symbol(kind) => symbol_style(kind),
        }
    }

    pub fn paint(&self, role: Role, text: impl Display) -> String {
        text.style(self.style(role)).to_string()
    }
}

fn symbol_style(kind: SymbolKind) -> Style {
    match kind {
        SymbolKind::Function => Style::new().yellow(),
        SymbolKind::Variable | SymbolKind::Field => Style::new().cyan(),
        SymbolKind::Record | SymbolKind::Enumeration | SymbolKind::Typedef => Style::new().green(),
        SymbolKind::Enumerator => Style::new().bright_green(),
        SymbolKind::Namespace => Style::new().blue(),
        SymbolKind::Macro => Style::new().magenta(),
    }
}

pub fn theme() -> &'static Theme {
    THEME.get_or_init(Theme::detect)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_theme_leaves_text_alone() {
        let theme = Theme::plain();
        assert_eq!(theme.paint(Role::Location, "a.cpp:1:1"), "a.cpp:1:1");
        assert_eq!(theme.paint(Role::Symbol(SymbolKind::Macro), "MAX"), "MAX");
    }

    #[test]
    fn test_colored_theme_styles_by_role() {
        let theme = Theme::colored();
        let location = theme.paint(Role::Location, "a.cpp:1:1");
        assert!(location.starts_with('\u{1b}') && location.contains("a.cpp:1:1"));
        assert_ne!(
            theme.paint(Role::Symbol(SymbolKind::Function), "f"),
            theme.paint(Role::Symbol(SymbolKind::Macro), "f")
        );
    }
}
