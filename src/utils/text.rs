//! String normalisation helpers for user-supplied lists and filenames.

/// Case applied to cleaned list entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Case {
    Lower,
    Upper,
}

/// Trim every entry, drop empty ones, and normalise case.
///
/// Entries containing commas are split, so `["IT, CH", ""]` becomes
/// `["IT", "CH"]`.
pub fn clean_string_list<I, S>(items: I, case: Case) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .flat_map(|item| {
            item.as_ref()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| match case {
                    Case::Lower => s.to_lowercase(),
                    Case::Upper => s.to_uppercase(),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Make a string safe to use as a filename
pub fn sanitize_filename(name: &str, max_length: usize) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = replaced.trim().trim_matches('.');
    let truncated: String = trimmed.chars().take(max_length).collect();

    if truncated.is_empty() {
        "unnamed".to_string()
    } else {
        truncated
    }
}

/// Format a count with thousands separators (`39355` -> `39,355`)
pub fn format_number(n: u64) -> String {
    n.to_string()
        .chars()
        .rev()
        .collect::<Vec<_>>()
        .chunks(3)
        .map(|c| c.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(",")
        .chars()
        .rev()
        .collect()
}
