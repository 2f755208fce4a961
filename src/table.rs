//! Pipe-delimited table parsing for remote tool output
//!
//! MicroCeph's CLI renders state as tables with a leading `|` per row and
//! `|`-separated columns. This parser extracts trimmed rows and lets callers
//! skip header rows by token. Unreadable or empty input parses to an empty
//! row set so that read paths can treat "no rows" as "assume absent" without
//! special-casing transport failures.

/// Parse raw table text into ordered rows of trimmed column values
///
/// A line is a row only when it starts with the `|` delimiter; border lines
/// (`+----+`) and prose are ignored. The segments before the first and after
/// the last delimiter are dropped, so a row missing its trailing `|` loses
/// its final cell rather than gaining a phantom one.
pub fn parse_table(raw: &str) -> Vec<Vec<String>> {
    raw.lines()
        .filter_map(|line| {
            let line = line.trim();
            if !line.starts_with('|') {
                return None;
            }
            let segments: Vec<&str> = line.split('|').collect();
            if segments.len() < 2 {
                return None;
            }
            Some(
                segments[1..segments.len() - 1]
                    .iter()
                    .map(|cell| cell.trim().to_string())
                    .collect(),
            )
        })
        .collect()
}

/// Iterate data rows, skipping headers and under-filled rows
///
/// A row is skipped when it has fewer than `min_cols` columns or when its
/// first column case-insensitively equals `header_token`.
pub fn data_rows<'a>(
    rows: &'a [Vec<String>],
    header_token: &'a str,
    min_cols: usize,
) -> impl Iterator<Item = &'a Vec<String>> {
    rows.iter().filter(move |row| {
        if row.len() < min_cols {
            return false;
        }
        match row.first() {
            Some(first) => !first.eq_ignore_ascii_case(header_token),
            None => false,
        }
    })
}
