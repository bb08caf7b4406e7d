//! Prompt construction for AI task generation.
//!
//! The model sees the column names and the target phrase grammar and must
//! answer with a JSON task list.

/// Generate the system prompt for task generation
pub fn system_prompt() -> String {
    r#"You are a regular expression expert editing a table.

Turn the user's instruction into an ordered list of regex replacement tasks.

## CRITICAL: Output Format

Return ONLY a JSON object of this shape:

```json
{
  "tasks": [
    { "target": "column Email", "regex": "^.+@.+$", "replacement": "[redacted]" }
  ]
}
```

Tasks run in order; a later task sees the output of earlier ones.
If the instruction cannot be expressed as replacements, return `{"tasks": []}`.

## Targets

- `all` - every cell
- `column <name>` - one column, by exact header name
- `column <A>` - one column, by spreadsheet letter
- `column <name>,<name>` or `column <A> to <C>` - several columns
- `row <n>` - one row, counted from 1 (header excluded)
- `row <n> to <m>` or `row <n>,<m>` - several rows
- `cell B2` - one cell, letter column and 1-based row
- `range A1:C3` - a rectangle of cells
- `row <n> column <name>` - one cell
- `column <name> rows <n> to <m>` - part of one column

## Rules

1. Patterns use Rust `regex` syntax (no lookaround, no backreferences in patterns)
2. Matching is case-sensitive; prefix the pattern with `(?i)` to ignore case
3. Every match in a cell is replaced
4. Use `$1`, `$2` or `${name}` in the replacement to reuse captured groups
5. An empty replacement deletes the match
6. Use exact column names from the list you are given
7. Return ONLY the JSON object, no explanations or markdown"#
        .to_string()
}

/// Generate the user prompt with the instruction and the table header
pub fn user_prompt(description: &str, columns: &[String]) -> String {
    let column_list = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("- {} (column {})", c, index_letters(i)))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"## Table Columns ({count} total)

{column_list}

## Instruction

{description}

Return ONLY the JSON object."#,
        count = columns.len(),
    )
}

/// Build the messages array for the API call
pub fn build_messages(description: &str, columns: &[String]) -> Vec<serde_json::Value> {
    vec![serde_json::json!({
        "role": "user",
        "content": user_prompt(description, columns)
    })]
}

/// 0 -> A, 25 -> Z, 26 -> AA
fn index_letters(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'A' + (index % 26) as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::column_letter_to_index;

    #[test]
    fn test_user_prompt_lists_columns() {
        let prompt = user_prompt(
            "redact all emails",
            &["Name".to_string(), "Email".to_string()],
        );
        assert!(prompt.contains("2 total"));
        assert!(prompt.contains("- Name (column A)"));
        assert!(prompt.contains("- Email (column B)"));
        assert!(prompt.contains("redact all emails"));
    }

    #[test]
    fn test_index_letters_match_target_grammar() {
        for i in [0, 1, 25, 26, 27, 51, 52, 701, 702] {
            assert_eq!(column_letter_to_index(&index_letters(i)), Some(i));
        }
        assert_eq!(index_letters(26), "AA");
    }

    #[test]
    fn test_system_prompt_mentions_output_shape() {
        let prompt = system_prompt();
        assert!(prompt.contains("\"tasks\""));
        assert!(prompt.contains("range A1:C3"));
    }
}
