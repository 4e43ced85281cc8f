use super::*;
use std::collections::HashMap;

fn env() -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("ONEVAR".to_string(), "a".to_string());
    env.insert("TWOVAR".to_string(), "hellohello".to_string());
    env.insert("SPACED".to_string(), "two words".to_string());
    env
}

fn tokens(value: &str) -> Result<Vec<String>, LexError> {
    ValueCursor::new(value).collect_tokens(&env())
}

// ============================================================================
// Line splitting
// ============================================================================

#[test]
fn test_split_setting_with_equals() {
    let line = split_line("command = /bin/echo hi").unwrap();
    let Line::Setting(directive) = line else {
        panic!("expected a setting, got {:?}", line);
    };
    assert_eq!(directive.setting, "command");
    assert_eq!(directive.value, " /bin/echo hi");
}

#[test]
fn test_split_setting_with_colon_and_no_spaces() {
    let Line::Setting(directive) = split_line("depends-on:abc").unwrap() else {
        panic!("expected a setting");
    };
    assert_eq!(directive.setting, "depends-on");
    assert_eq!(directive.value, "abc");
}

#[test]
fn test_split_blank_and_comment_lines() {
    assert_eq!(split_line("").unwrap(), Line::Blank);
    assert_eq!(split_line("    ").unwrap(), Line::Blank);
    assert_eq!(split_line("  # type = process").unwrap(), Line::Blank);
}

#[test]
fn test_split_meta_command() {
    assert_eq!(split_line("@include common").unwrap(), Line::Meta("include common"));
}

#[test]
fn test_split_missing_separator() {
    assert_eq!(
        split_line("command /bin/true"),
        Err(LexError::MissingSeparator("command".to_string()))
    );
}

#[test]
fn test_split_missing_setting_name() {
    assert_eq!(split_line("= value"), Err(LexError::MissingSettingName));
}

// ============================================================================
// Logical lines
// ============================================================================

#[test]
fn test_logical_lines_keep_physical_numbers() {
    let lines = logical_lines("type = process\n\ncommand = /bin/true\n");
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0].number, 1);
    assert_eq!(lines[2].number, 3);
    assert_eq!(lines[2].text, "command = /bin/true");
}

#[test]
fn test_logical_lines_join_continuations() {
    let lines = logical_lines("command = /bin/echo \\\n    one two\nrestart = yes");
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].number, 1);
    assert_eq!(lines[0].text, "command = /bin/echo     one two");
    assert_eq!(lines[1].number, 3);
}

#[test]
fn test_logical_lines_escaped_backslash_does_not_continue() {
    let lines = logical_lines("command = echo \\\\\nrestart = no");
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].text, "command = echo \\\\");
}

// ============================================================================
// Value tokens
// ============================================================================

#[test]
fn test_plain_tokens() {
    assert_eq!(tokens("  /bin/echo  one two ").unwrap(), vec!["/bin/echo", "one", "two"]);
}

#[test]
fn test_quoted_token_preserves_whitespace() {
    assert_eq!(
        tokens(r#"sh -c "echo  hello world""#).unwrap(),
        vec!["sh", "-c", "echo  hello world"]
    );
}

#[test]
fn test_mixed_quoted_and_unquoted_segments() {
    assert_eq!(tokens(r#"a"b c"d"#).unwrap(), vec!["ab cd"]);
}

#[test]
fn test_empty_quotes_yield_empty_token() {
    assert_eq!(tokens(r#"echo """#).unwrap(), vec!["echo", ""]);
}

#[test]
fn test_backslash_escapes() {
    assert_eq!(tokens(r#"one\ two "say \"hi\"""#).unwrap(), vec!["one two", "say \"hi\""]);
}

#[test]
fn test_unterminated_quote_is_error() {
    assert_eq!(tokens(r#"echo "unfinished"#), Err(LexError::UnterminatedQuote));
}

#[test]
fn test_trailing_backslash_is_error() {
    assert_eq!(tokens("echo \\"), Err(LexError::TrailingBackslash));
}

#[test]
fn test_trailing_comment_ends_value() {
    assert_eq!(tokens("abc # the abc service").unwrap(), vec!["abc"]);
    // A '#' inside a token is literal
    assert_eq!(tokens("a#b").unwrap(), vec!["a#b"]);
}

// ============================================================================
// Substitution
// ============================================================================

#[test]
fn test_substitution_with_unset_variable() {
    assert_eq!(
        tokens("echo $ONEVAR $TWOVAR $THREEVAR").unwrap(),
        vec!["echo", "a", "hellohello", ""]
    );
}

#[test]
fn test_braced_substitution() {
    assert_eq!(tokens("${ONEVAR}b pre${TWOVAR}").unwrap(), vec!["ab", "prehellohello"]);
}

#[test]
fn test_substitution_does_not_split_words() {
    assert_eq!(tokens("echo $SPACED").unwrap(), vec!["echo", "two words"]);
}

#[test]
fn test_substitution_inside_quotes() {
    assert_eq!(tokens(r#""x $ONEVAR y""#).unwrap(), vec!["x a y"]);
}

#[test]
fn test_escaped_and_doubled_dollar_are_literal() {
    assert_eq!(tokens(r"\$ONEVAR $$ONEVAR").unwrap(), vec!["$ONEVAR", "$ONEVAR"]);
}

#[test]
fn test_malformed_substitutions() {
    assert!(matches!(tokens("${ONEVAR"), Err(LexError::MalformedSubstitution(_))));
    assert!(matches!(tokens("${}"), Err(LexError::MalformedSubstitution(_))));
    assert!(matches!(tokens("${ONE-VAR}"), Err(LexError::MalformedSubstitution(_))));
    assert!(matches!(tokens("cost $"), Err(LexError::MalformedSubstitution(_))));
    assert!(matches!(tokens("$-x"), Err(LexError::MalformedSubstitution(_))));
}

#[test]
fn test_cursor_advances_token_by_token() {
    let env = env();
    let mut cursor = ValueCursor::new("first second");
    assert_eq!(cursor.next_token(&env).unwrap().as_deref(), Some("first"));
    assert_eq!(cursor.remaining(), " second");
    assert_eq!(cursor.next_token(&env).unwrap().as_deref(), Some("second"));
    assert_eq!(cursor.next_token(&env).unwrap(), None);
}
