//! Terminal presentation for the ccswap CLI: color detection, status labels,
//! tables, spinners and prompts.
//!
//! Color is disabled, in order of precedence, by `--no-color`, a set
//! `NO_COLOR`, `TERM=dumb`, or stdout not being a terminal (in `auto` mode).
//! Library modules never print; everything user-facing goes through [`Ui`].

use anstream::{eprintln, println};
use anstyle::{AnsiColor, Color, Style};
use anyhow::{Context, Result};
use comfy_table::{Cell, ContentArrangement, Table, presets};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, Password, PasswordDisplayMode, Text};
use std::borrow::Cow;
use std::io::IsTerminal;
use std::time::Duration;

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ColorMode {
    Always,
    #[default]
    Auto,
    Never,
}

/// Severity of a message or check result, least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Ok,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct Ui {
    pub color_enabled: bool,
    /// Spinners need both a terminal and color
    pub spinner_enabled: bool,
    /// Prompts are only shown on an interactive stdin
    pub interactive: bool,
}

impl Default for Ui {
    fn default() -> Self {
        Self::new(ColorMode::Auto, false)
    }
}

impl Ui {
    pub fn new(mode: ColorMode, force_no_color: bool) -> Self {
        let color_enabled = resolve_color(mode, force_no_color);
        if !color_enabled {
            anstream::ColorChoice::write_global(anstream::ColorChoice::Never);
        }
        Self {
            color_enabled,
            spinner_enabled: color_enabled && std::io::stdout().is_terminal(),
            interactive: std::io::stdin().is_terminal(),
        }
    }

    fn paint(&self, s: &str, style: Style) -> String {
        if self.color_enabled {
            format!("{style}{s}{style:#}")
        } else {
            s.to_string()
        }
    }

    fn label(&self, level: Level) -> String {
        let (text, color) = match level {
            Level::Ok => ("OK", AnsiColor::Green),
            Level::Info => ("INFO", AnsiColor::Cyan),
            Level::Warn => ("WARN", AnsiColor::Yellow),
            Level::Error => ("ERROR", AnsiColor::Red),
        };
        self.paint(text, Style::new().fg_color(Some(Color::Ansi(color))).bold())
    }

    pub fn ok(&self, msg: impl AsRef<str>) {
        println!("{} {}", self.label(Level::Ok), msg.as_ref());
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        println!("{} {}", self.label(Level::Warn), msg.as_ref());
    }

    /// Errors go to stderr
    pub fn err(&self, msg: impl AsRef<str>) {
        eprintln!("{} {}", self.label(Level::Error), msg.as_ref());
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        println!("{} {}", self.label(Level::Info), msg.as_ref());
    }

    pub fn dim(&self, s: impl AsRef<str>) -> String {
        self.paint(
            s.as_ref(),
            Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack))),
        )
    }

    pub fn bold(&self, s: impl AsRef<str>) -> String {
        self.paint(s.as_ref(), Style::new().bold())
    }

    pub fn colored(&self, s: impl AsRef<str>, color: AnsiColor) -> String {
        self.paint(s.as_ref(), Style::new().fg_color(Some(Color::Ansi(color))))
    }

    /// Status mark; ASCII fallbacks keep meaning without color
    pub fn icon(&self, level: Level) -> &'static str {
        match (level, self.color_enabled) {
            (Level::Ok, true) => "✓",
            (Level::Ok, false) => "[OK]",
            (Level::Info, true) => "•",
            (Level::Info, false) => "-",
            (Level::Warn, true) => "⚠",
            (Level::Warn, false) => "[!]",
            (Level::Error, true) => "✗",
            (Level::Error, false) => "[X]",
        }
    }

    /// Bordered table; ASCII when color is off
    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.load_preset(if self.color_enabled {
            presets::UTF8_FULL_CONDENSED
        } else {
            presets::ASCII_MARKDOWN
        });
        table
    }

    /// Borderless table for lists and key/value blocks
    pub fn simple_table(&self) -> Table {
        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.load_preset(presets::NOTHING);
        table
    }

    pub fn cell(&self, content: impl Into<String>) -> Cell {
        Cell::new(content.into())
    }

    pub fn header_cell(&self, content: impl Into<String>) -> Cell {
        let cell = Cell::new(content.into());
        if self.color_enabled {
            cell.add_attribute(comfy_table::Attribute::Bold)
        } else {
            cell
        }
    }

    /// Colored through comfy-table so column widths stay correct
    pub fn colored_cell(&self, content: impl Into<String>, color: AnsiColor) -> Cell {
        let cell = Cell::new(content.into());
        if self.color_enabled {
            cell.fg(comfy_color(color))
        } else {
            cell
        }
    }

    /// A spinner for slow work (key derivation); hidden when disabled
    pub fn spinner(&self, message: impl Into<Cow<'static, str>>) -> ProgressBar {
        if !self.spinner_enabled {
            let pb = ProgressBar::hidden();
            pb.set_message(message);
            return pb;
        }
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.cyan} {msg}")
        {
            pb.set_style(style);
        }
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    pub fn spinner_finish_ok(&self, pb: &ProgressBar, msg: impl Into<String>) {
        self.spinner_finish(pb, msg.into(), true);
    }

    pub fn spinner_finish_err(&self, pb: &ProgressBar, msg: impl Into<String>) {
        self.spinner_finish(pb, msg.into(), false);
    }

    fn spinner_finish(&self, pb: &ProgressBar, msg: String, success: bool) {
        pb.finish_and_clear();
        if success {
            self.ok(msg);
        } else {
            self.err(msg);
        }
    }

    pub fn println(&self, msg: impl AsRef<str>) {
        println!("{}", msg.as_ref());
    }

    pub fn newline(&self) {
        println!();
    }

    pub fn section(&self, title: impl AsRef<str>) {
        println!("{}", self.bold(title));
    }

    /// Yes/no question, defaulting to no
    pub fn confirm(&self, question: &str, help: &str) -> Result<bool> {
        Confirm::new(question)
            .with_default(false)
            .with_help_message(help)
            .prompt()
            .context("Confirmation cancelled")
    }

    /// Free-text answer, used for template fields
    pub fn ask(&self, question: &str) -> Result<String> {
        Text::new(question)
            .prompt()
            .with_context(|| format!("No answer given for '{}'", question))
    }

    /// Archive password; `confirm` asks twice, for exports
    pub fn password(&self, message: &str, confirm: bool) -> Result<String> {
        let prompt = Password::new(message).with_display_mode(PasswordDisplayMode::Masked);
        let prompt = if confirm {
            prompt.with_custom_confirmation_message("Repeat password:")
        } else {
            prompt.without_confirmation()
        };
        prompt.prompt().context("Password entry cancelled")
    }
}

fn resolve_color(mode: ColorMode, force_no_color: bool) -> bool {
    if force_no_color || std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var("TERM").is_ok_and(|t| t == "dumb") {
        return false;
    }
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => std::io::stdout().is_terminal(),
    }
}

fn comfy_color(color: AnsiColor) -> comfy_table::Color {
    use comfy_table::Color as C;
    match color {
        AnsiColor::Black => C::Black,
        AnsiColor::Red | AnsiColor::BrightRed => C::Red,
        AnsiColor::Green | AnsiColor::BrightGreen => C::Green,
        AnsiColor::Yellow | AnsiColor::BrightYellow => C::Yellow,
        AnsiColor::Blue | AnsiColor::BrightBlue => C::Blue,
        AnsiColor::Magenta | AnsiColor::BrightMagenta => C::Magenta,
        AnsiColor::Cyan | AnsiColor::BrightCyan => C::Cyan,
        AnsiColor::White | AnsiColor::BrightWhite => C::White,
        AnsiColor::BrightBlack => C::DarkGrey,
    }
}

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_no_color_wins() {
        let ui = Ui::new(ColorMode::Always, true);
        assert!(!ui.color_enabled);
        assert!(!ui.spinner_enabled);
    }

    #[test]
    fn test_plain_output_without_color() {
        let ui = Ui::new(ColorMode::Never, false);
        assert_eq!(ui.icon(Level::Ok), "[OK]");
        assert_eq!(ui.icon(Level::Error), "[X]");
        assert_eq!(ui.icon(Level::Warn), "[!]");
        assert_eq!(ui.dim("x"), "x");
        assert_eq!(ui.bold("x"), "x");
    }

    #[test]
    fn test_hidden_spinner() {
        let ui = Ui::new(ColorMode::Never, false);
        let pb = ui.spinner("deriving key");
        ui.spinner_finish_ok(&pb, "done");
        assert!(pb.is_finished());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }
}
