use crate::SymbolKind;
use crate::ui::{Icons, Role, theme};

pub fn header(text: &str) {
    println!("{} {}", Icons::ROCKET, theme().paint(Role::Header, text));
}

pub fn status(icon: &str, label: &str, value: &str) {
    println!("{} {}: {}", icon, theme().paint(Role::Dim, label), value);
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, theme().paint(Role::Success, label));
}

pub fn error(label: &str) {
    eprintln!("{} {}", Icons::CROSS, theme().paint(Role::Error, label));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, theme().paint(Role::Warn, label));
}

/// A matcher diagnostic, one line per message or context.
pub fn diagnostic(text: &str) {
    for line in text.lines() {
        eprintln!("  {}", theme().paint(Role::Diagnostic, line));
    }
}

pub fn dim(text: &str) -> String {
    theme().paint(Role::Dim, text)
}

pub fn muted(text: &str) -> String {
    theme().paint(Role::Muted, text)
}

pub fn location(text: &str) -> String {
    theme().paint(Role::Location, text)
}

pub fn symbol_kind(kind: SymbolKind) -> String {
    theme().paint(Role::Symbol(kind), kind)
}
