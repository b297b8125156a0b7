//! Launch command line parsing.

/// Split a command line into arguments, honoring double quotes.
///
/// `arduino-language-server -cli "C:\Program Files\Arduino CLI\arduino-cli.exe"`
/// yields three arguments; quotes group, they are not kept. No shell is ever
/// involved — the result is used as an argv directly.
pub(crate) fn split_command_line(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in input.chars() {
        match c {
            '"' => {
                // Toggling marks a token even for "" (an explicit empty arg).
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_arguments() {
        assert_eq!(
            split_command_line("clangd --background-index --limit-results=20"),
            vec!["clangd", "--background-index", "--limit-results=20"]
        );
    }

    #[test]
    fn test_quoted_argument_with_spaces() {
        assert_eq!(
            split_command_line(r#"arduino-language-server -cli "C:\Program Files\arduino-cli.exe" -fqbn uno"#),
            vec![
                "arduino-language-server",
                "-cli",
                r"C:\Program Files\arduino-cli.exe",
                "-fqbn",
                "uno"
            ]
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(split_command_line("").is_empty());
        assert!(split_command_line("   ").is_empty());
    }

    #[test]
    fn test_collapses_repeated_whitespace() {
        assert_eq!(split_command_line("a   b\t c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_explicit_empty_quoted_argument() {
        assert_eq!(split_command_line(r#"prog "" next"#), vec!["prog", "", "next"]);
    }

    #[test]
    fn test_quotes_inside_token() {
        assert_eq!(
            split_command_line(r#"prog --flag="a b""#),
            vec!["prog", "--flag=a b"]
        );
    }

    #[test]
    fn test_unterminated_quote_swallows_rest() {
        assert_eq!(
            split_command_line(r#"prog "unterminated rest"#),
            vec!["prog", "unterminated rest"]
        );
    }
}
