//! Date and duration text.

use chrono::Locale;
use chrono::format::{Item, StrftimeItems};

use crate::render::RenderContext;
use crate::value::{Date, DatePrecision, Duration, number_text};

/// Produces the minimal textual form of temporal values. Implementations are
/// pure and synchronous. `ctx.locale` names the locale the text is meant for.
pub trait TemporalFormatter: Send + Sync {
    fn format_date(&self, date: &Date, ctx: &RenderContext) -> String;
    fn format_duration(&self, duration: &Duration, ctx: &RenderContext) -> String;
}

/// Formats with the strftime patterns carried by the render context. Month,
/// weekday and AM/PM names follow `ctx.locale`; unknown locales get English.
/// Duration units are always English.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinimalFormatter;

impl TemporalFormatter for MinimalFormatter {
    fn format_date(&self, date: &Date, ctx: &RenderContext) -> String {
        let pattern = match date.precision() {
            DatePrecision::Year => "%Y",
            DatePrecision::Month => "%B %Y",
            DatePrecision::Day => ctx.date_format.as_str(),
            _ if date.is_midnight() => ctx.date_format.as_str(),
            _ => ctx.date_time_format.as_str(),
        };
        format_instant(date, pattern, resolve_locale(&ctx.locale))
    }

    fn format_duration(&self, duration: &Duration, _ctx: &RenderContext) -> String {
        if duration.is_zero() {
            return "0 seconds".to_owned();
        }
        duration
            .components()
            .map(|(unit, amount)| {
                let name = if amount == 1.0 { unit.singular() } else { unit.name() };
                format!("{} {}", number_text(amount), name)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Maps a locale token such as `en-US`, `fr_FR` or `de` onto a chrono locale.
/// A bare language tries its own region (`de` -> `de_DE`). Anything unknown is
/// `POSIX`, which formats like `en_US`.
pub fn resolve_locale(token: &str) -> Locale {
    let name = token.trim().replace('-', "_");
    if let Ok(locale) = Locale::try_from(name.as_str()) {
        return locale;
    }
    if !name.is_empty() && !name.contains('_') {
        let guess = format!("{}_{}", name.to_lowercase(), name.to_uppercase());
        if let Ok(locale) = Locale::try_from(guess.as_str()) {
            return locale;
        }
    }
    Locale::POSIX
}

// chrono panics while displaying a bad pattern, so check it up front
fn format_instant(date: &Date, pattern: &str, locale: Locale) -> String {
    let valid = !StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error));
    if valid {
        date.instant().format_localized(pattern, locale).to_string()
    } else {
        date.instant().to_rfc3339()
    }
}
