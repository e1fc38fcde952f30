#![allow(dead_code)]

use relq_core::{compile, Query, QueryError, Sql};

pub fn compile_ok(query: &Query) -> Sql {
    compile(query).unwrap_or_else(|e| panic!("Failed to compile: {query:?}\nError: {e}"))
}

pub fn compile_err(query: &Query) -> QueryError {
    compile(query).expect_err(&format!("Expected compile error for: {query:?}"))
}

/// Placeholder numbers in the order they appear in the text.
pub fn placeholders(text: &str) -> Vec<usize> {
    let mut found = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '$' {
            continue;
        }
        let mut digits = String::new();
        while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
            digits.push(d);
            chars.next();
        }
        if let Ok(n) = digits.parse() {
            found.push(n);
        }
    }
    found
}

/// First appearance of each placeholder, in text order.
pub fn first_appearances(text: &str) -> Vec<usize> {
    let mut seen = Vec::new();
    for n in placeholders(text) {
        if !seen.contains(&n) {
            seen.push(n);
        }
    }
    seen
}
