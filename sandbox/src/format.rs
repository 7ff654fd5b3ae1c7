//! Plain-text rendering helpers for listings.

use crate::fs::{DirEntry, EntryKind};

const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

/// `1536` becomes `"1.5 KB"`. Uses 1024-based units and at most two decimals.
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = format!("{value:.2}");
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[unit])
}

pub fn format_file_list(entries: &[DirEntry]) -> String {
    if entries.is_empty() {
        return "No files found.".to_string();
    }

    let width = entries
        .iter()
        .map(|entry| entry.name.chars().count())
        .max()
        .unwrap_or(0)
        .clamp(20, 50);

    let mut lines = Vec::with_capacity(entries.len() + 1);
    lines.push(format!("Directories and files ({} items):", entries.len()));
    for entry in entries {
        let marker = match entry.kind {
            EntryKind::Directory => "[DIR]",
            _ => "[FILE]",
        };
        let size = entry
            .size
            .filter(|size| *size > 0)
            .map(format_file_size)
            .unwrap_or_default();
        let modified = entry
            .modified
            .map(|ts| ts.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        lines.push(
            format!("{marker} {:<width$} {size:>10} {modified}", entry.name)
                .trim_end()
                .to_string(),
        );
    }
    lines.join("\n")
}
