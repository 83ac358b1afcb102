//! Worker command lines.
//!
//! `Command` is a single string, as typed in a shell on Windows. It is split
//! with the Windows argument rules so that quoted paths with spaces survive:
//! whitespace separates arguments outside quotes, `"` toggles quoting, and a
//! run of backslashes is literal unless it precedes a `"`, where every pair
//! becomes one backslash and an odd one out escapes the quote.

use super::error::SupervisorError;

/// Longest command line the Windows process-creation call accepts.
pub const MAX_COMMAND_LINE: usize = 32_767;

/// Fail instead of truncating when `command_line` exceeds the platform limit.
pub fn check_length(command_line: &str) -> Result<(), SupervisorError> {
    let len = command_line.encode_utf16().count();
    if len > MAX_COMMAND_LINE {
        return Err(SupervisorError::CommandLineTooLong {
            len,
            limit: MAX_COMMAND_LINE,
        });
    }
    Ok(())
}

/// Split `command_line` into program and arguments.
pub fn split_command_line(command_line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut started = false;
    let mut in_quotes = false;
    let mut backslashes = 0usize;

    for c in command_line.chars() {
        match c {
            '\\' => {
                backslashes += 1;
                started = true;
            }
            '"' => {
                current.extend(std::iter::repeat('\\').take(backslashes / 2));
                if backslashes % 2 == 1 {
                    current.push('"');
                } else {
                    in_quotes = !in_quotes;
                }
                backslashes = 0;
                started = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                current.extend(std::iter::repeat('\\').take(backslashes));
                backslashes = 0;
                if started {
                    args.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            c => {
                current.extend(std::iter::repeat('\\').take(backslashes));
                backslashes = 0;
                current.push(c);
                started = true;
            }
        }
    }
    current.extend(std::iter::repeat('\\').take(backslashes));
    if started {
        args.push(current);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(s: &str) -> Vec<String> {
        split_command_line(s)
    }

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(split("  python  -m\tworker  "), vec!["python", "-m", "worker"]);
        assert!(split("   ").is_empty());
    }

    #[test]
    fn quotes_group_and_disappear() {
        assert_eq!(
            split(r#""C:\Program Files\Py\python.exe" -c "print(1)""#),
            vec![r"C:\Program Files\Py\python.exe", "-c", "print(1)"]
        );
        assert_eq!(split(r#"a"b c"d"#), vec!["ab cd"]);
        assert_eq!(split(r#"x "" y"#), vec!["x", "", "y"]);
    }

    #[test]
    fn backslash_rules() {
        assert_eq!(split(r"C:\dir\run.exe"), vec![r"C:\dir\run.exe"]);
        assert_eq!(split(r#"a\"b"#), vec![r#"a"b"#]);
        assert_eq!(split(r#""a\\" b"#), vec![r"a\", "b"]);
        assert_eq!(split(r"trailing\\"), vec![r"trailing\\"]);
    }

    #[test]
    fn length_limit_is_explicit() {
        assert!(check_length("worker.exe").is_ok());
        let long = "x".repeat(MAX_COMMAND_LINE + 1);
        match check_length(&long) {
            Err(SupervisorError::CommandLineTooLong { len, limit }) => {
                assert_eq!(len, MAX_COMMAND_LINE + 1);
                assert_eq!(limit, MAX_COMMAND_LINE);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
