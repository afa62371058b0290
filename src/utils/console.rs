//! Tagged console lines for the interactive session
//!
//! Every user-visible event is a single line prefixed with HH:MM and a
//! colored tag such as `[NEW]`, `[GPS]` or `[ERROR]`. Structured logging
//! goes to `tracing` separately; these lines are the operator surface.

use chrono::Local;

/// ANSI color for a console tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Green,
    Yellow,
    Cyan,
    Gray,
    None,
}

impl Color {
    fn code(self) -> &'static str {
        match self {
            Self::Green => "\x1b[32m",
            Self::Yellow => "\x1b[33m",
            Self::Cyan => "\x1b[36m",
            Self::Gray => "\x1b[90m",
            Self::None => "",
        }
    }
}

const RESET: &str = "\x1b[0m";

fn colorize(s: &str, color: Color) -> String {
    match color {
        Color::None => s.to_string(),
        c => format!("{}{}{}", c.code(), s, RESET),
    }
}

/// Print a single console line prefixed with HH:MM and a colored tag.
pub fn line(tag: &str, color: Color, msg: &str) {
    let hm = Local::now().format("%H:%M");
    if tag.is_empty() {
        println!("{hm} {msg}");
    } else {
        println!("{hm} {} {msg}", colorize(tag, color));
    }
}

/// `format_args!`-friendly variant of [`line`].
pub fn linef_args(tag: &str, color: Color, args: std::fmt::Arguments<'_>) {
    line(tag, color, &args.to_string());
}

/// Print a tagged, colored console line (`linef!("[GPS]", Color::Gray, "...")`).
#[macro_export]
macro_rules! linef {
    ($tag:expr, $color:expr, $($arg:tt)*) => {
        $crate::utils::console::linef_args($tag, $color, format_args!($($arg)*))
    };
}
