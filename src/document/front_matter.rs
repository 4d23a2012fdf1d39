//! Leading `---` metadata block.

use std::collections::BTreeMap;

/// Template variables, ordered for stable output.
pub type Variables = BTreeMap<String, String>;

const DELIMITER: &str = "---";

/// Split a document into its front matter variables and its body.
///
/// Front matter is a block that opens with a `---` line on the very first
/// line and closes with the next `---` line. Each `key: value` line inside
/// becomes a variable; other lines are ignored. Without a closing delimiter
/// the whole text is body.
pub fn split(source: &str) -> (Variables, &str) {
    let mut variables = Variables::new();
    let Some(rest) = strip_delimiter_line(source) else {
        return (variables, source);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        offset += line.len();
        if trimmed.trim_end() == DELIMITER {
            return (variables, &rest[offset..]);
        }
        if let Some((key, value)) = trimmed.split_once(':') {
            let key = key.trim();
            if !key.is_empty() {
                variables.insert(key.to_string(), unquote(value.trim()).to_string());
            }
        }
    }
    (Variables::new(), source)
}

fn strip_delimiter_line(source: &str) -> Option<&str> {
    let rest = source.strip_prefix(DELIMITER)?;
    let rest = rest.trim_start_matches([' ', '\t']);
    rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n'))
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_front_matter_returns_source() {
        let (vars, body) = split("# Hi\n");
        assert!(vars.is_empty());
        assert_eq!(body, "# Hi\n");
    }

    #[test]
    fn test_front_matter_variables_are_extracted() {
        let source = "---\ntitle: Hello World\ntemplate: \"blog\"\n---\n# Hi\n";
        let (vars, body) = split(source);
        assert_eq!(vars.get("title").map(String::as_str), Some("Hello World"));
        assert_eq!(vars.get("template").map(String::as_str), Some("blog"));
        assert_eq!(body, "# Hi\n");
    }

    #[test]
    fn test_value_may_contain_colons() {
        let (vars, _) = split("---\nurl: http://example.com\n---\n");
        assert_eq!(
            vars.get("url").map(String::as_str),
            Some("http://example.com")
        );
    }

    #[test]
    fn test_unterminated_block_is_body() {
        let source = "---\ntitle: x\n# Hi\n";
        let (vars, body) = split(source);
        assert!(vars.is_empty());
        assert_eq!(body, source);
    }

    #[test]
    fn test_delimiter_must_open_the_document() {
        let source = "intro\n---\ntitle: x\n---\n";
        let (vars, body) = split(source);
        assert!(vars.is_empty());
        assert_eq!(body, source);
    }

    #[test]
    fn test_crlf_line_endings() {
        let (vars, body) = split("---\r\ntitle: T\r\n---\r\nbody");
        assert_eq!(vars.get("title").map(String::as_str), Some("T"));
        assert_eq!(body, "body");
    }
}
