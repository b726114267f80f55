// Splits free-text model output into the SQL and DAX artifacts.
//
// Total over any input: unknown shapes degrade to empty fields, never errors.

use crate::models::RawGenerationOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Sql,
    Dax,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub output: RawGenerationOutput,
    /// Neither a sql nor a dax label was found
    pub malformed: bool,
}

/// Extract the `sql` and `dax` blocks from a model response.
///
/// Recognises fenced blocks (```` ```sql ````, ```` ```dax ````) and plain
/// `SQL:` / `DAX:` headings, optionally followed by an unlabelled fence. The
/// first block for each label wins. A missing label leaves that field empty.
pub fn split_labeled_blocks(text: &str) -> ParsedResponse {
    let mut sql: Option<String> = None;
    let mut dax: Option<String> = None;

    let mut pending: Option<Label> = None;
    let mut fence: Option<(Option<Label>, Vec<&str>)> = None;
    let mut heading: Option<(Label, Vec<&str>)> = None;

    for line in text.lines() {
        if let Some((label, body)) = fence.as_mut() {
            if line.trim_start().starts_with("```") {
                if let Some(label) = *label {
                    assign(label, body, &mut sql, &mut dax);
                }
                fence = None;
                pending = None;
            } else {
                body.push(line);
            }
            continue;
        }

        if let Some(info) = line.trim_start().strip_prefix("```") {
            if let Some((label, body)) = heading.take() {
                if body.iter().any(|l| !l.trim().is_empty()) {
                    assign(label, &body, &mut sql, &mut dax);
                }
            }
            let label = fence_label(info).or_else(|| pending.take());
            fence = Some((label, Vec::new()));
            continue;
        }

        if let Some((label, rest)) = heading_label(line) {
            if let Some((previous, body)) = heading.take() {
                assign(previous, &body, &mut sql, &mut dax);
            }
            pending = Some(label);
            heading = Some((label, if rest.is_empty() { Vec::new() } else { vec![rest] }));
            continue;
        }

        if let Some((_, body)) = heading.as_mut() {
            body.push(line);
        }
    }

    // Unterminated fence or trailing heading section
    if let Some((Some(label), body)) = fence {
        assign(label, &body, &mut sql, &mut dax);
    }
    if let Some((label, body)) = heading {
        assign(label, &body, &mut sql, &mut dax);
    }

    let malformed = sql.is_none() && dax.is_none();
    ParsedResponse {
        output: RawGenerationOutput::new(sql.unwrap_or_default(), dax.unwrap_or_default()),
        malformed,
    }
}

fn assign(label: Label, body: &[&str], sql: &mut Option<String>, dax: &mut Option<String>) {
    let slot = match label {
        Label::Sql => sql,
        Label::Dax => dax,
    };
    if slot.is_none() {
        *slot = Some(body.join("\n").trim().to_string());
    }
}

fn fence_label(info: &str) -> Option<Label> {
    match info.trim().to_ascii_lowercase().as_str() {
        "sql" | "postgresql" | "postgres" | "pgsql" => Some(Label::Sql),
        "dax" => Some(Label::Dax),
        _ => None,
    }
}

/// `SQL:`, `**DAX:**`, `## SQL`, `SQL query:` and similar headings.
fn heading_label(line: &str) -> Option<(Label, &str)> {
    let stripped = line
        .trim_start()
        .trim_start_matches(|c| c == '#' || c == '*')
        .trim_start();
    let lower = stripped.to_ascii_lowercase();

    let label = if lower.starts_with("sql") {
        Label::Sql
    } else if lower.starts_with("dax") {
        Label::Dax
    } else {
        return None;
    };

    let rest = stripped[3..].trim_end().trim_end_matches('*');
    if rest.trim().is_empty() {
        return Some((label, ""));
    }

    let (qualifier, after) = rest.split_once(':')?;
    let qualifier = qualifier.trim().trim_end_matches('*');
    if qualifier.chars().all(|c| c.is_ascii_alphabetic()) {
        Some((label, after.trim_start_matches('*').trim()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_blocks() {
        let response = "Here you go:\n```sql\nSELECT COUNT(*) FROM transactions\n```\n\n```dax\nFraud Count = COUNTROWS(transactions)\n```\n";
        let parsed = split_labeled_blocks(response);
        assert!(!parsed.malformed);
        assert_eq!(parsed.output.sql_text, "SELECT COUNT(*) FROM transactions");
        assert_eq!(parsed.output.dax_text, "Fraud Count = COUNTROWS(transactions)");
    }

    #[test]
    fn test_fence_labels_are_case_insensitive() {
        let parsed = split_labeled_blocks("```SQL\nSELECT 1\n```\n```DAX\nX = 1\n```");
        assert_eq!(parsed.output.sql_text, "SELECT 1");
        assert_eq!(parsed.output.dax_text, "X = 1");
    }

    #[test]
    fn test_missing_label_leaves_field_empty() {
        let parsed = split_labeled_blocks("```sql\nSELECT amount FROM transactions\n```");
        assert!(!parsed.malformed);
        assert_eq!(parsed.output.sql_text, "SELECT amount FROM transactions");
        assert_eq!(parsed.output.dax_text, "");
    }

    #[test]
    fn test_plain_headings() {
        let response = "SQL: SELECT SUM(amount) FROM transactions\nDAX:\nTotal = SUM(transactions[amount])\n";
        let parsed = split_labeled_blocks(response);
        assert_eq!(parsed.output.sql_text, "SELECT SUM(amount) FROM transactions");
        assert_eq!(parsed.output.dax_text, "Total = SUM(transactions[amount])");
    }

    #[test]
    fn test_heading_followed_by_unlabelled_fence() {
        let response = "**SQL query:**\n```\nSELECT 1\n```\n## DAX\n```\nOne = 1\n```";
        let parsed = split_labeled_blocks(response);
        assert_eq!(parsed.output.sql_text, "SELECT 1");
        assert_eq!(parsed.output.dax_text, "One = 1");
    }

    #[test]
    fn test_unlabelled_response_is_malformed() {
        let parsed = split_labeled_blocks("I cannot help with that.");
        assert!(parsed.malformed);
        assert_eq!(parsed.output, RawGenerationOutput::default());

        let parsed = split_labeled_blocks("```\nSELECT 1\n```");
        assert!(parsed.malformed);
    }

    #[test]
    fn test_empty_blocks_are_a_decline_not_malformed() {
        let parsed = split_labeled_blocks("```sql\n```\n```dax\n```");
        assert!(!parsed.malformed);
        assert!(parsed.output.is_empty());
    }

    #[test]
    fn test_unterminated_fence_is_kept() {
        let parsed = split_labeled_blocks("```sql\nSELECT amount\nFROM transactions");
        assert_eq!(parsed.output.sql_text, "SELECT amount\nFROM transactions");
    }

    #[test]
    fn test_first_block_wins() {
        let parsed = split_labeled_blocks("```sql\nSELECT 1\n```\n```sql\nSELECT 2\n```");
        assert_eq!(parsed.output.sql_text, "SELECT 1");
    }

    #[test]
    fn test_prose_starting_with_label_word_is_not_a_heading() {
        let parsed = split_labeled_blocks("SQLite is not supported, sorry.");
        assert!(parsed.malformed);
    }
}
