// (c) 2025 Ross Younger
//! CLI output styling

use clap::builder::styling::{AnsiColor, Color, Style, Styles};

/// Error message styling. This can be Displayed directly.
pub const ERROR: Style = Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Red)));
/// Warning message styling. This can be Displayed directly.
pub const WARNING: Style = Style::new()
    .bold()
    .fg_color(Some(Color::Ansi(AnsiColor::Yellow)));
/// Informational message styling. This can be Displayed directly.
pub const INFO: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan)));

pub(crate) const HEADER: Style = Style::new()
    .underline()
    .fg_color(Some(Color::Ansi(AnsiColor::Yellow)));

pub(crate) const CLAP_STYLES: Styles = Styles::styled()
    .usage(HEADER)
    .header(HEADER)
    .literal(Style::new().bold())
    .invalid(WARNING)
    .error(ERROR)
    .valid(INFO.bold().underline())
    .placeholder(INFO);

/// Resets styling to default.
pub use clap::builder::styling::Reset as RESET;

/// Whether to style messages written to stderr
#[must_use]
pub fn use_colours() -> bool {
    console::colors_enabled_stderr()
}
