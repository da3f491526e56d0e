//! # Command templates for helper and worker processes.
//!
//! A [`CommandTemplate`] is an ordered list of arguments, each made of literal text
//! and [`Placeholder`]s. Templates are validated once, when they are built: an
//! unknown `{name}` is rejected with [`TemplateError::UnknownPlaceholder`], so
//! rendering can never fail.
//!
//! Rendering substitutes the placeholders, shell-quotes each argument on its own
//! and joins them with spaces into one command line for `/bin/sh -c`.
//!
//! ```text
//! ["cat", "{programPath}"]  ──► "cat /sandbox/vm-1/program"
//! ["sh", "-c", "exit 5"]    ──► "sh -c 'exit 5'"
//! ```
//!
//! ## Example
//! ```rust
//! use slotvisor::{CommandTemplate, Substitutions};
//!
//! let tpl = CommandTemplate::parse(["cat", "{programPath}"]).unwrap();
//! let vars = Substitutions::new("/tmp/vm-1/program", "/program");
//! assert_eq!(tpl.render(&vars), "cat /tmp/vm-1/program");
//! ```

use std::fmt;

use crate::error::TemplateError;

/// Values a template argument may refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `{programPath}`: host path of the slot's program file.
    ProgramPath,
    /// `{innerProgramPath}`: program path as seen from inside the sandbox.
    InnerProgramPath,
}

impl Placeholder {
    /// Looks up a placeholder by the name written between braces.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "programPath" => Some(Placeholder::ProgramPath),
            "innerProgramPath" => Some(Placeholder::InnerProgramPath),
            _ => None,
        }
    }

    /// Name as written between braces.
    pub fn name(self) -> &'static str {
        match self {
            Placeholder::ProgramPath => "programPath",
            Placeholder::InnerProgramPath => "innerProgramPath",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Var(Placeholder),
}

/// Concrete values for every [`Placeholder`].
#[derive(Debug, Clone)]
pub struct Substitutions {
    program_path: String,
    inner_program_path: String,
}

impl Substitutions {
    /// Creates a substitution set.
    pub fn new(program_path: impl Into<String>, inner_program_path: impl Into<String>) -> Self {
        Self {
            program_path: program_path.into(),
            inner_program_path: inner_program_path.into(),
        }
    }

    fn get(&self, p: Placeholder) -> &str {
        match p {
            Placeholder::ProgramPath => &self.program_path,
            Placeholder::InnerProgramPath => &self.inner_program_path,
        }
    }
}

/// A validated argument list with typed placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    args: Vec<Vec<Token>>,
}

impl CommandTemplate {
    /// Parses an argument list, validating every `{name}` it contains.
    ///
    /// A brace pair counts as a placeholder only when its content matches
    /// `[A-Za-z0-9_-]+`; other brace text such as `{ :; }` is kept literally.
    /// Shell code like `${x}` is therefore a placeholder and gets rejected,
    /// write `$x` instead.
    pub fn parse<I, S>(args: I) -> Result<Self, TemplateError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args = args
            .into_iter()
            .map(|a| parse_arg(a.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if args.is_empty() {
            return Err(TemplateError::Empty);
        }
        Ok(Self { args })
    }

    /// A command that does nothing and succeeds (`true`).
    pub fn noop() -> Self {
        Self {
            args: vec![vec![Token::Literal("true".to_string())]],
        }
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Always false: empty templates are rejected by [`CommandTemplate::parse`].
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Whether any argument refers to `p`.
    pub fn uses(&self, p: Placeholder) -> bool {
        self.args
            .iter()
            .flatten()
            .any(|t| matches!(t, Token::Var(v) if *v == p))
    }

    /// Substitutes placeholders and returns the individual (unquoted) arguments.
    pub fn substitute(&self, vars: &Substitutions) -> Vec<String> {
        self.args
            .iter()
            .map(|tokens| {
                let mut out = String::new();
                for t in tokens {
                    match t {
                        Token::Literal(s) => out.push_str(s),
                        Token::Var(p) => out.push_str(vars.get(*p)),
                    }
                }
                out
            })
            .collect()
    }

    /// Builds a single shell command line with every argument quoted.
    pub fn render(&self, vars: &Substitutions) -> String {
        build_command_line(self.substitute(vars))
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, tokens) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            for t in tokens {
                match t {
                    Token::Literal(s) => f.write_str(s)?,
                    Token::Var(p) => write!(f, "{{{}}}", p.name())?,
                }
            }
        }
        Ok(())
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn parse_arg(arg: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut rest = arg;

    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let name_len = after.find(|c: char| !is_name_char(c)).unwrap_or(after.len());
        let closes = after[name_len..].starts_with('}');

        if name_len == 0 || !closes {
            literal.push_str(&rest[..=open]);
            rest = after;
            continue;
        }

        let name = &after[..name_len];
        let p = Placeholder::from_name(name).ok_or_else(|| TemplateError::UnknownPlaceholder {
            name: name.to_string(),
        })?;

        literal.push_str(&rest[..open]);
        if !literal.is_empty() {
            tokens.push(Token::Literal(std::mem::take(&mut literal)));
        }
        tokens.push(Token::Var(p));
        rest = &after[name_len + 1..];
    }

    literal.push_str(rest);
    if !literal.is_empty() || tokens.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    Ok(tokens)
}

/// Quotes one argument for a POSIX shell.
///
/// Arguments made only of `[A-Za-z0-9_./-]` are returned bare; everything else
/// is wrapped in single quotes with embedded quotes written as `'\''`.
pub fn quote_shell_arg(arg: &str) -> String {
    let bare = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-'));
    if bare {
        return arg.to_string();
    }

    let mut out = String::with_capacity(arg.len() + 2);
    out.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Quotes every argument and joins them with single spaces.
pub fn build_command_line<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .map(|a| quote_shell_arg(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Wraps a shell snippet as an argument list: `exec sh -c <command>`.
///
/// Handy for configuring inline helper scripts.
pub fn shell_command(command: &str) -> Vec<String> {
    vec![
        "exec".to_string(),
        "sh".to_string(),
        "-c".to_string(),
        command.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> Substitutions {
        Substitutions::new("/root/vm-3/program", "/program")
    }

    #[test]
    fn test_bare_arguments_are_not_quoted() {
        assert_eq!(quote_shell_arg("/bin/true"), "/bin/true");
        assert_eq!(quote_shell_arg("a-b_c.d/e"), "a-b_c.d/e");
    }

    #[test]
    fn test_special_arguments_are_quoted() {
        assert_eq!(quote_shell_arg("exit 5"), "'exit 5'");
        assert_eq!(quote_shell_arg(""), "''");
        assert_eq!(quote_shell_arg("it's"), "'it'\\''s'");
        assert_eq!(quote_shell_arg("$HOME"), "'$HOME'");
    }

    #[test]
    fn test_render_substitutes_and_quotes() {
        let tpl = CommandTemplate::parse(["cat", "{programPath}", "x={innerProgramPath}"]).unwrap();
        assert_eq!(
            tpl.render(&vars()),
            "cat /root/vm-3/program 'x=/program'"
        );
        assert!(tpl.uses(Placeholder::ProgramPath));
    }

    #[test]
    fn test_unknown_placeholder_rejected_at_parse() {
        let err = CommandTemplate::parse(["/bin/kill", "{pid}"]).unwrap_err();
        assert_eq!(
            err,
            TemplateError::UnknownPlaceholder {
                name: "pid".to_string()
            }
        );
    }

    #[test]
    fn test_non_placeholder_braces_kept_literally() {
        let tpl = CommandTemplate::parse(["sh", "-c", "f() { :; }; f", "{", "a{b c}"]).unwrap();
        assert_eq!(
            tpl.substitute(&vars()),
            vec!["sh", "-c", "f() { :; }; f", "{", "a{b c}"]
        );
    }

    #[test]
    fn test_empty_template_rejected() {
        let none: [&str; 0] = [];
        assert_eq!(CommandTemplate::parse(none).unwrap_err(), TemplateError::Empty);
    }

    #[test]
    fn test_empty_argument_survives() {
        let tpl = CommandTemplate::parse(["echo", ""]).unwrap();
        assert_eq!(tpl.render(&vars()), "echo ''");
    }

    #[test]
    fn test_display_round_trips_placeholders() {
        let tpl = CommandTemplate::parse(["cp", "{programPath}", "{innerProgramPath}"]).unwrap();
        assert_eq!(tpl.to_string(), "cp {programPath} {innerProgramPath}");
    }

    #[test]
    fn test_shell_command_wraps_snippet() {
        let tpl = CommandTemplate::parse(shell_command("kill -15 $$")).unwrap();
        assert_eq!(tpl.render(&vars()), "exec sh -c 'kill -15 $$'");
    }
}
