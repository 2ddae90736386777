use std::{borrow::Cow, fmt::Write as _};

use crate::{
    classify::RecordKind,
    job::{ImportJob, ImportResult},
    store::ColumnInfo,
};

pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(display_width(cell));
        }
    }

    let mut output = String::new();
    let header_cells = headers.iter().map(|h| h.to_string()).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&header_cells, &widths));
    let separator = widths.iter().map(|w| "-".repeat((*w).max(3))).collect::<Vec<_>>();
    let separator_widths = widths.iter().map(|w| (*w).max(3)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separator, &separator_widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let cells = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let sanitized = sanitize_cell(value);
            let padding = width.saturating_sub(display_width(&sanitized));
            format!("{sanitized}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>();
    cells.join("  ").trim_end().to_string()
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

/// Per-kind counts followed by errors and warnings.
pub fn render_result(job: &ImportJob) -> String {
    let result = &job.result;
    let mut output = String::new();
    let _ = writeln!(
        output,
        "Import {} of '{}': {:?}{}",
        job.id,
        result.file_name,
        job.progress.stage,
        if result.dry_run { " (dry run, nothing saved)" } else { "" }
    );
    let _ = writeln!(
        output,
        "{} of {} row(s) processed, {}",
        result.processed,
        result.total_rows,
        if result.success { "no errors" } else { "with errors" }
    );
    output.push('\n');
    output.push_str(&render_table(&["kind", "inserted", "updated"], &count_rows(result)));

    if !result.errors.is_empty() {
        output.push_str("\nErrors:\n");
        let rows = result
            .errors
            .iter()
            .map(|e| vec![e.row.to_string(), e.error.clone()])
            .collect::<Vec<_>>();
        output.push_str(&render_table(&["row", "error"], &rows));
    }
    if !result.warnings.is_empty() {
        output.push_str("\nWarnings:\n");
        for warning in &result.warnings {
            let _ = writeln!(output, "  {warning}");
        }
    }
    output
}

fn count_rows(result: &ImportResult) -> Vec<Vec<String>> {
    RecordKind::SUPPORTED
        .iter()
        .map(|kind| {
            vec![
                kind.label().to_string(),
                result.inserted.get(*kind).to_string(),
                result.updated.get(*kind).to_string(),
            ]
        })
        .collect()
}

pub fn render_columns(table: &str, columns: &[ColumnInfo]) -> String {
    let rows = columns
        .iter()
        .map(|c| {
            let flag = |on: bool| (if on { "yes" } else { "" }).to_string();
            vec![
                c.name.clone(),
                c.sql_type.clone(),
                flag(c.primary_key),
                flag(c.not_null),
                flag(c.has_default),
            ]
        })
        .collect::<Vec<_>>();
    format!(
        "{table}\n{}",
        render_table(&["column", "type", "pk", "not null", "default"], &rows)
    )
}
