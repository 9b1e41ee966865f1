//! Work descriptions and command normalization.
//!
//! A submitted piece of work is free text, a pre-split argument list, or an
//! in-process task. Normalization converts it into the form execution needs:
//! direct spawns want an argv vector (so free text is tokenized with
//! shell-like quoting rules), shell execution wants a single string (so argv
//! lists are joined). Tasks pass through untouched. The display form always
//! collapses string commands to single-spaced tokens so insignificant
//! whitespace never shows up in logs.

use crate::job::JobKind;
use crate::task::TaskSpec;

/// A unit of work as the caller describes it.
#[derive(Debug)]
pub enum Work {
    /// Free-form command text, tokenized at normalization time.
    Line(String),
    /// Pre-split argument tokens, passed to the child verbatim.
    Argv(Vec<String>),
    /// An in-process computation.
    Task(TaskSpec),
}

impl From<&str> for Work {
    fn from(text: &str) -> Self {
        Work::Line(text.to_string())
    }
}

impl From<String> for Work {
    fn from(text: String) -> Self {
        Work::Line(text)
    }
}

impl From<Vec<String>> for Work {
    fn from(argv: Vec<String>) -> Self {
        Work::Argv(argv)
    }
}

impl From<Vec<&str>> for Work {
    fn from(argv: Vec<&str>) -> Self {
        Work::Argv(argv.into_iter().map(String::from).collect())
    }
}

impl From<TaskSpec> for Work {
    fn from(spec: TaskSpec) -> Self {
        Work::Task(spec)
    }
}

/// Work in its canonical execution form.
#[derive(Debug)]
pub(crate) enum Exec {
    /// Spawn directly: program followed by its arguments.
    Argv(Vec<String>),
    /// Run through the shell as a single command string.
    Shell(String),
    /// Run on an in-process worker.
    Task(TaskSpec),
}

impl Exec {
    pub(crate) fn kind(&self) -> JobKind {
        match self {
            Exec::Argv(_) | Exec::Shell(_) => JobKind::Command,
            Exec::Task(_) => JobKind::Task,
        }
    }
}

/// Convert a work description into its execution form.
///
/// Pure transformation, no failure modes. Normalizing the same input twice
/// yields identical results.
pub(crate) fn normalize(work: Work, shell: bool) -> Exec {
    match work {
        Work::Task(spec) => Exec::Task(spec),
        Work::Line(text) => {
            if shell {
                Exec::Shell(text)
            } else {
                Exec::Argv(split_line(&text))
            }
        }
        Work::Argv(argv) => {
            if shell {
                Exec::Shell(argv.join(" "))
            } else {
                Exec::Argv(argv)
            }
        }
    }
}

/// Canonical display string for a normalized command.
pub(crate) fn display(exec: &Exec) -> String {
    match exec {
        Exec::Argv(argv) => argv.join(" "),
        Exec::Shell(text) => split_line(text).join(" "),
        Exec::Task(spec) => spec.label.clone(),
    }
}

/// Split free-form command text into tokens with shell-like quoting rules.
///
/// Single quotes are literal, double quotes process backslash escapes for
/// `"`, `\`, `$` and `` ` ``, and an unquoted backslash escapes the next
/// character. Quoted substrings with embedded spaces survive as one token.
pub fn split_line(text: &str) -> Vec<String> {
    #[derive(PartialEq)]
    enum Quote {
        None,
        Single,
        Double,
    }

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote = Quote::None;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    current.push(c);
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\' | '$' | '`')) => current.push(next),
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => current.push('\\'),
                },
                _ => current.push(c),
            },
            Quote::None => match c {
                '\'' => {
                    quote = Quote::Single;
                    in_token = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_token = true;
                }
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                    in_token = true;
                }
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                _ => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }

    if in_token {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("echo hello world", vec!["echo", "hello", "world"])]
    #[case("echo  'hello   world'", vec!["echo", "hello   world"])]
    #[case(r#"grep "a b" file.txt"#, vec!["grep", "a b", "file.txt"])]
    #[case(r#"printf "%s\n" x"#, vec!["printf", r"%s\n", "x"])]
    #[case(r"echo a\ b", vec!["echo", "a b"])]
    #[case("  padded   args  ", vec!["padded", "args"])]
    #[case("", Vec::<&str>::new())]
    fn tokenizes_shell_style(#[case] text: &str, #[case] expected: Vec<&str>) {
        assert_eq!(split_line(text), expected);
    }

    #[test]
    fn empty_quotes_make_empty_token() {
        assert_eq!(split_line("cmd '' last"), vec!["cmd", "", "last"]);
    }

    #[test]
    fn double_quote_escapes() {
        assert_eq!(split_line(r#"echo "say \"hi\"""#), vec!["echo", r#"say "hi""#]);
        assert_eq!(split_line(r#"echo "back\\slash""#), vec!["echo", r"back\slash"]);
    }

    #[test]
    fn normalize_line_without_shell_tokenizes() {
        let exec = normalize(Work::from("ls -la '/tmp/my dir'"), false);
        match exec {
            Exec::Argv(argv) => assert_eq!(argv, vec!["ls", "-la", "/tmp/my dir"]),
            other => panic!("expected argv form, got {other:?}"),
        }
    }

    #[test]
    fn normalize_argv_with_shell_joins() {
        let exec = normalize(Work::from(vec!["echo", "a", "b"]), true);
        match exec {
            Exec::Shell(text) => assert_eq!(text, "echo a b"),
            other => panic!("expected shell form, got {other:?}"),
        }
    }

    #[test]
    fn normalize_is_deterministic() {
        let first = normalize(Work::from("du  -sh   /var"), false);
        let second = normalize(Work::from("du  -sh   /var"), false);
        assert_eq!(display(&first), display(&second));
    }

    #[test]
    fn display_collapses_whitespace() {
        let exec = normalize(Work::from("echo    spaced\tout"), true);
        assert_eq!(display(&exec), "echo spaced out");
    }

    #[test]
    fn display_round_trips_tokens() {
        let tokens = vec!["tar", "-czf", "out.tgz", "src"];
        let exec = normalize(Work::from(tokens.clone()), false);
        let shown = display(&exec);
        assert_eq!(split_line(&shown), tokens);
    }
}
