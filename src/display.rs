//! Terminal rendering for the `lw` CLI.
//!
//! Every printer takes a `Write` so the same code feeds stdout and the tests.

use std::io::Write;

use crossterm::{
    QueueableCommand,
    style::{Attribute, Color, Print, SetAttribute, SetForegroundColor},
};

use crate::embedding_store::EmbeddingRecord;
use crate::error::Result;
use crate::generation::Answer;
use crate::models::CodexEntry;
use crate::search::SearchResult;
use crate::session::ImportReport;
use crate::sweep::SweepReport;

const PREVIEW_COMPONENTS: usize = 8;

fn label<W: Write>(out: &mut W, color: Color, text: &str) -> Result<()> {
    out.queue(SetForegroundColor(color))?
        .queue(SetAttribute(Attribute::Bold))?
        .queue(Print(text))?
        .queue(SetAttribute(Attribute::Reset))?
        .queue(SetForegroundColor(Color::Reset))?;
    Ok(())
}

fn dim<W: Write>(out: &mut W, text: &str) -> Result<()> {
    out.queue(SetForegroundColor(Color::DarkGrey))?
        .queue(Print(text))?
        .queue(SetForegroundColor(Color::Reset))?;
    Ok(())
}

fn score_color(score: f64) -> Color {
    if score >= 0.75 {
        Color::Green
    } else if score >= 0.4 {
        Color::Yellow
    } else {
        Color::DarkGrey
    }
}

pub fn print_entry<W: Write>(out: &mut W, entry: &CodexEntry) -> Result<()> {
    label(out, Color::Cyan, &format!("#{} {}", entry.id, entry.name))?;
    dim(out, &format!(" [{}]\n", entry.entry_type))?;
    writeln!(out, "{}", entry.content)?;
    out.flush()?;
    Ok(())
}

pub fn print_entry_list<W: Write>(out: &mut W, entries: &[CodexEntry]) -> Result<()> {
    if entries.is_empty() {
        dim(out, "The codex is empty.\n")?;
        out.flush()?;
        return Ok(());
    }
    for entry in entries {
        label(out, Color::Cyan, &format!("{:>4}  {}", entry.id, entry.name))?;
        dim(out, &format!("  [{}]\n", entry.entry_type))?;
    }
    out.flush()?;
    Ok(())
}

pub fn print_search_results<W: Write>(out: &mut W, results: &[SearchResult]) -> Result<()> {
    if results.is_empty() {
        dim(out, "No matching entries.\n")?;
        out.flush()?;
        return Ok(());
    }
    for (rank, result) in results.iter().enumerate() {
        label(out, score_color(result.score), &format!("{:.3}", result.score))?;
        write!(out, "  {}. ", rank + 1)?;
        label(out, Color::Cyan, &result.entry.name)?;
        dim(out, &format!(" [{}] #{}\n", result.entry.entry_type, result.entry.id))?;
    }
    out.flush()?;
    Ok(())
}

pub fn print_context<W: Write>(out: &mut W, context: &str) -> Result<()> {
    if context.is_empty() {
        dim(out, "No relevant codex entries.\n")?;
    } else {
        writeln!(out, "{context}")?;
    }
    out.flush()?;
    Ok(())
}

pub fn print_answer<W: Write>(out: &mut W, answer: &Answer, show_context: bool) -> Result<()> {
    if show_context && !answer.context.is_empty() {
        dim(out, &answer.context)?;
        writeln!(out)?;
    }
    label(out, Color::Magenta, "Codex: ")?;
    writeln!(out, "{}", answer.text)?;
    out.flush()?;
    Ok(())
}

pub fn print_embedding<W: Write>(out: &mut W, record: &EmbeddingRecord) -> Result<()> {
    label(out, Color::Cyan, &format!("Entry #{}", record.entry_id))?;
    writeln!(out)?;
    writeln!(out, "  model:      {}", record.model_version)?;
    writeln!(out, "  dimensions: {}", record.dimensions())?;
    writeln!(out, "  created:    {}", record.created_at)?;
    writeln!(out, "  updated:    {}", record.updated_at)?;

    let preview: Vec<String> = record
        .vector
        .iter()
        .take(PREVIEW_COMPONENTS)
        .map(|v| format!("{v:.4}"))
        .collect();
    let ellipsis = if record.dimensions() > PREVIEW_COMPONENTS { ", ..." } else { "" };
    dim(out, &format!("  [{}{}]\n", preview.join(", "), ellipsis))?;
    out.flush()?;
    Ok(())
}

pub fn print_sweep_report<W: Write>(out: &mut W, report: &SweepReport) -> Result<()> {
    let color = if report.failed > 0 { Color::Yellow } else { Color::Green };
    label(
        out,
        color,
        &format!(
            "Embedded {} of {} entries ({} failed, {} skipped)\n",
            report.processed, report.total, report.failed, report.skipped
        ),
    )?;
    out.flush()?;
    Ok(())
}

pub fn print_import_report<W: Write>(out: &mut W, report: &ImportReport) -> Result<()> {
    let color = if report.failed > 0 { Color::Yellow } else { Color::Green };
    label(
        out,
        color,
        &format!(
            "Imported {} entries ({} new, {} updated, {} failed)\n",
            report.saved(),
            report.created,
            report.updated,
            report.failed
        ),
    )?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn entry(id: i64, name: &str) -> CodexEntry {
        let at = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        CodexEntry {
            id,
            name: name.into(),
            entry_type: "Character".into(),
            content: "A wandering mage.".into(),
            created_at: at,
            updated_at: at,
        }
    }

    fn rendered(f: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_search_results_show_rank_and_score() {
        let results = vec![
            SearchResult { entry: entry(1, "Aria"), score: 0.91 },
            SearchResult { entry: entry(2, "Vel"), score: 0.12 },
        ];
        let text = rendered(|out| print_search_results(out, &results));
        assert!(text.contains("0.910"));
        assert!(text.contains("1. "));
        assert!(text.contains("Aria"));
        assert!(text.find("Aria").unwrap() < text.find("Vel").unwrap());
    }

    #[test]
    fn test_empty_outputs_say_so() {
        assert!(rendered(|out| print_entry_list(out, &[])).contains("empty"));
        assert!(rendered(|out| print_search_results(out, &[])).contains("No matching"));
        assert!(rendered(|out| print_context(out, "")).contains("No relevant"));
    }

    #[test]
    fn test_embedding_preview_is_truncated() {
        let at = entry(1, "Aria").created_at;
        let record = EmbeddingRecord {
            entry_id: 1,
            model_version: "openai:text-embedding-3-small".into(),
            vector: (0..12).map(|i| i as f32).collect(),
            created_at: at,
            updated_at: at,
        };
        let text = rendered(|out| print_embedding(out, &record));
        assert!(text.contains("dimensions: 12"));
        assert!(text.contains("7.0000, ...]"));
        assert!(!text.contains("8.0000"));
    }

    #[test]
    fn test_import_report_counts() {
        let report = ImportReport { created: 2, updated: 1, failed: 0 };
        let text = rendered(|out| print_import_report(out, &report));
        assert!(text.contains("Imported 3 entries (2 new, 1 updated, 0 failed)"));
    }
}
