//! JSON decoding helpers for upstream response bodies.

use serde::de::DeserializeOwned;

/// Decode `body`, and on failure describe where it broke: the serde path,
/// the expected/actual types, and a short snippet around the offending column.
pub fn parse_json_with_context<T: DeserializeOwned>(body: &str) -> Result<T, String> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let inner = err.inner();
        let (line, column) = (inner.line(), inner.column());
        let path = err.path().to_string();

        let msg = inner.to_string();
        let loc = format!(" at line {line} column {column}");
        let msg = msg.strip_suffix(&loc).unwrap_or(&msg);

        let mut out = String::new();
        if !path.is_empty() && path != "." {
            out.push_str(&format!("at path '{path}': "));
        }
        out.push_str(&format!(
            "{} (line {line} col {column})\n{}",
            describe_mismatch(msg),
            snippet(body, line, column, 24)
        ));
        out
    })
}

/// Turn "invalid type: null, expected a string" into "expected a string, got null".
fn describe_mismatch(msg: &str) -> String {
    if let Some(rest) = msg.strip_prefix("invalid type: ")
        && let Some((actual, expected)) = rest.split_once(", expected ")
    {
        return format!("expected {expected}, got {actual}");
    }
    msg.to_string()
}

fn snippet(body: &str, line: usize, column: usize, width: usize) -> String {
    let target = body.lines().nth(line.saturating_sub(1)).unwrap_or("");
    if target.is_empty() {
        return "(empty line)".to_string();
    }

    let idx = column.saturating_sub(1).min(target.len());
    let start = floor_char_boundary(target, idx.saturating_sub(width / 2));
    let end = floor_char_boundary(target, (idx + width / 2).min(target.len()));

    let marker = " ".repeat(idx - start) + "^";
    format!("...{}...\n   {marker}", &target[start..end])
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Standing {
        #[allow(dead_code)]
        position: u32,
        #[allow(dead_code)]
        team: Team,
    }

    #[derive(Debug, Deserialize)]
    struct Team {
        #[allow(dead_code)]
        name: String,
    }

    #[test]
    fn mismatch_is_rewritten() {
        assert_eq!(
            describe_mismatch("invalid type: null, expected a string"),
            "expected a string, got null"
        );
        assert_eq!(describe_mismatch("expected value"), "expected value");
    }

    #[test]
    fn error_names_the_failing_path() {
        let body = r#"{"table": [{"position": 1, "team": {"name": null}}]}"#;

        #[derive(Debug, Deserialize)]
        struct Table {
            #[allow(dead_code)]
            table: Vec<Standing>,
        }

        let err = parse_json_with_context::<Table>(body).unwrap_err();
        assert!(err.contains("table[0].team.name"), "{err}");
        assert!(err.contains("expected a string, got null"), "{err}");
    }

    #[test]
    fn valid_body_decodes() {
        let standing: Standing =
            parse_json_with_context(r#"{"position": 3, "team": {"name": "Arsenal"}}"#).unwrap();
        assert_eq!(standing.position, 3);
    }
}
