//! Number formatting for report cells.

use num_format::{CustomFormat, Locale, ToFormattedString};

use std::sync::LazyLock;

static UNDERSCORE_GROUPS: LazyLock<CustomFormat> = LazyLock::new(|| {
    CustomFormat::builder()
        .separator("_")
        .build()
        .expect("invalid number format")
});

/// Object counters: `12345` renders as `12_345`.
pub fn format_grouped(value: i64) -> String {
    value.to_formatted_string(&*UNDERSCORE_GROUPS)
}

/// Rounds half away from zero to `places` decimals and groups the integer
/// part with `,`.
pub fn format_decimal(value: f64, places: usize) -> String {
    let rounded = round_to(value, places);
    let text = format!("{rounded:.places$}");
    let (int, frac) = match text.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (text.as_str(), None),
    };
    let (sign, digits) = int.strip_prefix('-').map_or(("", int), |rest| ("-", rest));
    let grouped = match digits.parse::<u64>() {
        Ok(whole) => whole.to_formatted_string(&Locale::en),
        Err(_) => digits.to_string(),
    };
    match frac {
        Some(frac) => format!("{sign}{grouped}.{frac}"),
        None => format!("{sign}{grouped}"),
    }
}

fn round_to(value: f64, places: usize) -> f64 {
    let scale = 10f64.powi(places as i32);
    (value * scale).round() / scale
}

/// Indentation marker for a tree depth.
pub fn indent(depth: usize) -> String {
    ".".repeat(depth)
}

/// One field of a report row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    /// Milliseconds, one decimal.
    Duration(f64),
    /// Counts, no decimals. Averages of counts may be fractional.
    Count(f64),
    /// Object counters, `_` grouped.
    Objects(i64),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn duration(value: Option<f64>) -> Self {
        value.map_or(Self::Empty, Self::Duration)
    }

    pub fn count(value: Option<f64>) -> Self {
        value.map_or(Self::Empty, Self::Count)
    }

    pub fn objects(value: Option<i64>) -> Self {
        value.map_or(Self::Empty, Self::Objects)
    }

    /// Renders every value, zero included.
    pub fn render(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(text) => text.clone(),
            Self::Duration(ms) => format_decimal(*ms, 1),
            Self::Count(n) => format_decimal(*n, 0),
            Self::Objects(n) => format_grouped(*n),
        }
    }

    /// Renders like [`Cell::render`], except that numbers rounding to zero
    /// become an empty field.
    pub fn render_sparse(&self) -> String {
        let is_zero = match self {
            Self::Duration(ms) => round_to(*ms, 1) == 0.0,
            Self::Count(n) => round_to(*n, 0) == 0.0,
            Self::Objects(n) => *n == 0,
            Self::Empty | Self::Text(_) => false,
        };
        if is_zero {
            return String::new();
        }
        self.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_underscore_thousands() {
        assert_eq!(format_grouped(1_234_567), "1_234_567");
        assert_eq!(format_grouped(999), "999");
        assert_eq!(format_grouped(1000), "1_000");
        assert_eq!(format_grouped(12_345), "12_345");
        assert_eq!(format_grouped(123_456), "123_456");
        assert_eq!(format_grouped(0), "0");
        assert_eq!(format_grouped(-45_000), "-45_000");
    }

    #[test]
    fn decimals_use_comma_groups_and_round_half_away() {
        assert_eq!(format_decimal(1234.54, 1), "1,234.5");
        assert_eq!(format_decimal(1234567.0, 1), "1,234,567.0");
        assert_eq!(format_decimal(0.25, 1), "0.3");
        assert_eq!(format_decimal(2.5, 0), "3");
        assert_eq!(format_decimal(999.0, 0), "999");
        assert_eq!(format_decimal(-1234.5, 1), "-1,234.5");
        assert_eq!(format_decimal(-0.04, 1), "-0.0");
    }

    #[test]
    fn sparse_rendering_hides_zero() {
        assert_eq!(Cell::Count(0.0).render_sparse(), "");
        assert_eq!(Cell::Count(0.4).render_sparse(), "");
        assert_eq!(Cell::Count(3.0).render_sparse(), "3");
        assert_eq!(Cell::Duration(0.04).render_sparse(), "");
        assert_eq!(Cell::Duration(0.04).render(), "0.0");
        assert_eq!(Cell::Duration(120.0).render_sparse(), "120.0");
        assert_eq!(Cell::Empty.render_sparse(), "");
        assert_eq!(Cell::Empty.render(), "");
        assert_eq!(Cell::text("avg").render_sparse(), "avg");
    }

    #[test]
    fn zero_object_counts_are_blank_when_sparse() {
        assert_eq!(Cell::Objects(0).render_sparse(), "");
        assert_eq!(Cell::objects(Some(0)).render_sparse(), "");
        assert_eq!(Cell::Objects(-4_000).render_sparse(), "-4_000");
        assert_eq!(Cell::Objects(12_345).render_sparse(), "12_345");
    }

    #[test]
    fn indent_is_one_dot_per_level() {
        assert_eq!(indent(0), "");
        assert_eq!(indent(3), "...");
    }
}
