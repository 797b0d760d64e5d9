use super::types::Statement;
use crate::protocol::Location;

/// Split source text into statements.
///
/// `#` starts a comment running to the end of the line and `;` separates
/// statements, except inside single or double quotes. Blank statements are
/// dropped. Lines are 1-based and columns 0-based, counted in characters.
pub fn split_statements(source: &str) -> Vec<Statement> {
    let mut out = Vec::new();

    for (index, line) in source.lines().enumerate() {
        let line_no = index as u32 + 1;
        let mut current = String::new();
        let mut start = 0u32;
        let mut quote: Option<char> = None;
        let mut escaped = false;

        for (column, ch) in line.chars().enumerate() {
            let column = column as u32;
            if let Some(q) = quote {
                current.push(ch);
                if escaped {
                    escaped = false;
                } else if ch == '\\' && q == '"' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                }
                continue;
            }
            match ch {
                '"' | '\'' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                '#' => break,
                ';' => {
                    flush(&current, line_no, start, &mut out);
                    current.clear();
                    start = column + 1;
                }
                _ => current.push(ch),
            }
        }
        flush(&current, line_no, start, &mut out);
    }

    out
}

fn flush(text: &str, line: u32, start: u32, out: &mut Vec<Statement>) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    let leading = text.chars().take_while(|c| c.is_whitespace()).count() as u32;
    out.push(Statement {
        text: trimmed.to_string(),
        location: Location {
            line,
            column: start + leading,
        },
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_point_at_first_character() {
        let statements = split_statements("let a = 1\n\n  print a; print \"x;y\" # done");
        let found: Vec<(&str, u32, u32)> = statements
            .iter()
            .map(|s| (s.text.as_str(), s.location.line, s.location.column))
            .collect();
        assert_eq!(
            found,
            vec![
                ("let a = 1", 1, 0),
                ("print a", 3, 2),
                ("print \"x;y\"", 3, 11),
            ]
        );
    }

    #[test]
    fn comment_only_lines_vanish() {
        assert!(split_statements("# nothing here\n   \n;;").is_empty());
    }
}
