//! Conflict naming for keep-both resolution
//!
//! Generates file names for conflict copies, following the pattern:
//! `filename (conflicted copy YYYY-MM-DD HHMMSS).ext`

use chrono::{DateTime, Utc};

/// Upper bound on numbered candidates tried before giving up
const MAX_CANDIDATES: u32 = 99;

/// Generates conflict copy file names
pub struct ConflictNamer;

impl ConflictNamer {
    /// Generates a conflict copy filename
    ///
    /// Given "report.docx" at 2026-02-07 14:30:05, produces
    /// "report (conflicted copy 2026-02-07 143005).docx".
    pub fn generate(original_name: &str, at: DateTime<Utc>) -> String {
        Self::with_label(original_name, &Self::label(at))
    }

    /// Every name to try, in order: the plain conflict name, then numbered
    /// variants `(conflicted copy ... 2)`, `(conflicted copy ... 3)`, ...
    pub fn candidates(original_name: &str, at: DateTime<Utc>) -> impl Iterator<Item = String> + '_ {
        let label = Self::label(at);
        (1..=MAX_CANDIDATES).map(move |i| {
            if i == 1 {
                Self::with_label(original_name, &label)
            } else {
                Self::with_label(original_name, &format!("{label} {i}"))
            }
        })
    }

    /// First candidate for which `exists` returns false
    pub fn generate_unique<F>(original_name: &str, at: DateTime<Utc>, mut exists: F) -> Option<String>
    where
        F: FnMut(&str) -> bool,
    {
        Self::candidates(original_name, at).find(|candidate| !exists(candidate))
    }

    fn label(at: DateTime<Utc>) -> String {
        format!("conflicted copy {}", at.format("%Y-%m-%d %H%M%S"))
    }

    fn with_label(original_name: &str, label: &str) -> String {
        // A leading dot marks a hidden file, not an extension
        match original_name.rfind('.') {
            Some(dot_pos) if dot_pos > 0 => {
                let stem = &original_name[..dot_pos];
                let ext = &original_name[dot_pos..];
                format!("{stem} ({label}){ext}")
            }
            _ => format!("{original_name} ({label})"),
        }
    }
}
