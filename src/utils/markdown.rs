//! Utility functions for handling Telegram MarkdownV2 formatting
//!
//! Every outbound message is sent in MarkdownV2 mode, so any user- or
//! store-provided text must pass through one of these before it is embedded.

/// Escapes markdown special characters for MarkdownV2 parsing mode
///
/// # Example
/// ```
/// use workshop_signup_bot::utils::markdown::escape_markdown;
///
/// let text = "Hello *world* (test)";
/// let escaped = escape_markdown(text);
/// assert_eq!(escaped, "Hello \\*world\\* \\(test\\)");
/// ```
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        if matches!(
            ch,
            '\\' | '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '='
                | '|' | '{' | '}' | '.' | '!'
        ) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Escapes text placed inside a ``` block, where only ` and \ are special.
pub fn escape_code(text: &str) -> String {
    text.replace('\\', "\\\\").replace('`', "\\`")
}

/// Wraps `code` in a fenced pre block.
pub fn code_block(code: &str) -> String {
    format!("```\n{}\n```", escape_code(code.trim_end()))
}

pub fn bold(text: &str) -> String {
    format!("*{}*", escape_markdown(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_basic_markdown() {
        assert_eq!(escape_markdown("Hello *world*"), "Hello \\*world\\*");
        assert_eq!(escape_markdown("_italic_"), "\\_italic\\_");
        assert_eq!(escape_markdown("`code`"), "\\`code\\`");
    }

    #[test]
    fn test_escape_brackets_and_parentheses() {
        assert_eq!(escape_markdown("[link](url)"), "\\[link\\]\\(url\\)");
        assert_eq!(escape_markdown("{code}"), "\\{code\\}");
    }

    #[test]
    fn test_escape_backslash_first() {
        assert_eq!(escape_markdown("a\\b"), "a\\\\b");
        assert_eq!(escape_markdown("\\."), "\\\\\\.");
    }

    #[test]
    fn test_escape_empty_and_plain_text() {
        assert_eq!(escape_markdown(""), "");
        assert_eq!(escape_markdown("Ali Rezai"), "Ali Rezai");
        assert_eq!(escape_markdown("سلام دنیا"), "سلام دنیا");
    }

    #[test]
    fn test_escape_phone_and_price() {
        assert_eq!(escape_markdown("+98 912-123-4567"), "\\+98 912\\-123\\-4567");
        assert_eq!(escape_markdown("790,000 Toman."), "790,000 Toman\\.");
    }

    #[test]
    fn test_code_block_only_escapes_backticks() {
        assert_eq!(
            code_block("print(\"a.b\")\n"),
            "```\nprint(\"a.b\")\n```"
        );
        assert_eq!(escape_code("`x` \\n"), "\\`x\\` \\\\n");
    }

    #[test]
    fn test_bold_escapes_inner_text() {
        assert_eq!(bold("Lesson 1: Intro!"), "*Lesson 1: Intro\\!*");
    }
}
