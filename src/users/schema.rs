use lazy_static::lazy_static;
use regex::Regex;

/// Columns every row has. Dynamic attributes are everything else.
pub const FIXED_COLUMNS: [&str; 4] = ["id", "username", "password", "role"];

pub(crate) fn is_valid_identifier(name: &str) -> bool {
    lazy_static! {
        static ref IDENT_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    }
    IDENT_RE.is_match(name)
}

/// SQLite column names are case-insensitive, and so is this check.
pub(crate) fn is_fixed_column(name: &str) -> bool {
    FIXED_COLUMNS.iter().any(|c| c.eq_ignore_ascii_case(name))
}

/// Finds the stored spelling of `name` among `columns`, ignoring case.
pub(crate) fn resolve_column<'a>(columns: &'a [String], name: &str) -> Option<&'a str> {
    columns
        .iter()
        .find(|c| c.eq_ignore_ascii_case(name))
        .map(String::as_str)
}
