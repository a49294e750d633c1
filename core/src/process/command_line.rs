//! Command-line splitting and secret redaction

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Placeholder written in place of secrets
pub const REDACTED: &str = "******";

/// Command-line splitting errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandLineError {
    /// A quote was opened and never closed
    #[error("unterminated {0} quote in command line")]
    UnterminatedQuote(char),

    /// Nothing to execute
    #[error("empty command")]
    EmptyCommand,
}

/// Split a command line into program and arguments
///
/// Single quotes, double quotes and backticks group words; inside one kind of
/// quote the other kinds are literal. A backslash escapes the next character
/// except inside single quotes. Quotes are removed, so `''` yields an empty
/// argument.
pub fn split_command_line(line: &str) -> Result<Vec<String>, CommandLineError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(q), '\\') if q != '\'' => match chars.next() {
                Some(next) => current.push(next),
                None => current.push('\\'),
            },
            (Some(_), c) => current.push(c),
            (None, '\'' | '"' | '`') => {
                quote = Some(c);
                in_token = true;
            }
            (None, '\\') => {
                match chars.next() {
                    Some(next) => current.push(next),
                    None => current.push('\\'),
                }
                in_token = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if let Some(q) = quote {
        return Err(CommandLineError::UnterminatedQuote(q));
    }
    if in_token {
        tokens.push(current);
    }
    if tokens.is_empty() {
        return Err(CommandLineError::EmptyCommand);
    }

    Ok(tokens)
}

static SECRET_FLAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(--[\w-]*(?:password|passwd|secret|token)[\w-]*[= ])('[^']*'|"[^"]*"|\S+)"#)
        .expect("valid secret flag pattern")
});

/// Mask values of password-like flags
pub fn redact_command_line(line: &str) -> String {
    SECRET_FLAG
        .replace_all(line, |caps: &regex::Captures<'_>| format!("{}{REDACTED}", &caps[1]))
        .into_owned()
}

/// Whether an environment variable name holds a secret
pub fn is_secret_key(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    ["PASSWORD", "PASSWD", "PWD", "SECRET", "TOKEN"]
        .iter()
        .any(|marker| upper.contains(marker))
        && upper != "PWD"
        && upper != "OLDPWD"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_simple() {
        assert_eq!(
            split_command_line("sysbench mysql run").unwrap(),
            vec!["sysbench", "mysql", "run"]
        );
        assert_eq!(
            split_command_line("sysbench mysql --threads=8 --time=60 run")
                .unwrap()
                .len(),
            5
        );
    }

    #[test]
    fn test_split_collapses_whitespace() {
        assert_eq!(
            split_command_line("  a \t b\n c  ").unwrap(),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn test_split_quotes() {
        assert_eq!(
            split_command_line(r#"sh -c 'echo "hi there"; exit 1'"#).unwrap(),
            vec!["sh", "-c", r#"echo "hi there"; exit 1"#]
        );
        assert_eq!(
            split_command_line(r#"--pass="it's" x"#).unwrap(),
            vec!["--pass=it's", "x"]
        );
        assert_eq!(
            split_command_line("mysql -e `SELECT 'a'`").unwrap(),
            vec!["mysql", "-e", "SELECT 'a'"]
        );
    }

    #[test]
    fn test_split_escapes() {
        assert_eq!(
            split_command_line(r#"a\ b "c\"d" 'e\f'"#).unwrap(),
            vec!["a b", "c\"d", "e\\f"]
        );
        assert_eq!(split_command_line("trailing\\").unwrap(), vec!["trailing\\"]);
    }

    #[test]
    fn test_split_empty_quotes_produce_empty_argument() {
        assert_eq!(
            split_command_line("cmd '' x").unwrap(),
            vec!["cmd", "", "x"]
        );
    }

    #[test]
    fn test_split_errors() {
        assert_eq!(
            split_command_line("sysbench 'unterminated"),
            Err(CommandLineError::UnterminatedQuote('\''))
        );
        assert_eq!(
            split_command_line("echo \"open"),
            Err(CommandLineError::UnterminatedQuote('"'))
        );
        assert_eq!(split_command_line(""), Err(CommandLineError::EmptyCommand));
        assert_eq!(split_command_line("   "), Err(CommandLineError::EmptyCommand));
    }

    #[test]
    fn test_redact_password_flags() {
        let line = "sysbench --mysql-user=bench --mysql-password=hunter2 --pgsql-password='a b' run";
        let redacted = redact_command_line(line);
        assert_eq!(
            redacted,
            "sysbench --mysql-user=bench --mysql-password=****** --pgsql-password=****** run"
        );
    }

    #[test]
    fn test_secret_env_keys() {
        assert!(is_secret_key("MYSQL_PWD"));
        assert!(is_secret_key("PGPASSWORD"));
        assert!(!is_secret_key("PWD"));
        assert!(!is_secret_key("PATH"));
    }
}
