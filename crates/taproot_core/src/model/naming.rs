//! Row-shape naming conventions.
//!
//! # Responsibility
//! - Singularize table names for foreign-key column naming.
//! - Build foreign-key and intermediate-table names.
//!
//! # Invariants
//! - Foreign-key columns are `{singular_table}_id`.
//! - Intermediate tables are `{owner_table}_{reference_attribute}`.

use once_cell::sync::Lazy;
use regex::Regex;

static SINGULAR_RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"ies$").expect("static rule"), "y"),
        (Regex::new(r"(ss|sh|ch|x|z)es$").expect("static rule"), "$1"),
        (Regex::new(r"s$").expect("static rule"), ""),
    ]
});

/// Singular form of a table name. Names already singular pass through.
pub fn singularize(table: &str) -> String {
    for (rule, replacement) in SINGULAR_RULES.iter() {
        if rule.is_match(table) {
            return rule.replace(table, *replacement).into_owned();
        }
    }
    table.to_string()
}

/// Foreign-key column referencing a row of `table`.
pub fn foreign_key(table: &str) -> String {
    format!("{}_id", singularize(table))
}

/// Foreign-key column for a named reference attribute.
pub fn attribute_key(attr: &str) -> String {
    format!("{attr}_id")
}

/// Intermediate (many-to-many) table for `attr` declared on `owner_table`.
pub fn intermediate_table(owner_table: &str, attr: &str) -> String {
    format!("{owner_table}_{attr}")
}
