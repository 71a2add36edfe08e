//! Variable declarations and references in command templates.
//!
//! A stage argument is declared as `< name | Human readable description >`;
//! commands reference bound values as `$<name>`.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VariableError {
    #[error("invalid variable declaration: '{0}'")]
    InvalidDeclaration(String),
    #[error("variable '{name}' in command '{command}' could not be resolved")]
    Unresolved { name: String, command: String },
}

fn declaration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^< *([a-zA-Z0-9_-]+) *\| *([A-Z]+[a-zA-Z0-9_ -]*) *>$")
            .expect("declaration pattern is valid")
    })
}

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$<([a-zA-Z0-9_-]+)>").expect("reference pattern is valid"))
}

pub fn is_valid_declaration(expression: &str) -> bool {
    declaration_pattern().is_match(expression)
}

/// Extracts the variable name from a declaration expression.
pub fn declared_name(declaration: &str) -> Result<String, VariableError> {
    let captures = declaration_pattern()
        .captures(declaration)
        .ok_or_else(|| VariableError::InvalidDeclaration(declaration.to_string()))?;
    Ok(captures[1].to_string())
}

/// Replaces every `$<name>` reference in `command` with its bound value.
/// Fails on the first reference that has no binding, before anything runs.
pub fn substitute(
    command: &str,
    bindings: &BTreeMap<String, String>,
) -> Result<String, VariableError> {
    let pattern = reference_pattern();
    if !pattern.is_match(command) {
        return Ok(command.to_string());
    }

    let mut substituted = String::with_capacity(command.len());
    let mut last_end = 0;
    for captures in pattern.captures_iter(command) {
        let reference = captures.get(0).expect("match has a full capture");
        let name = &captures[1];
        let value = bindings.get(name).ok_or_else(|| VariableError::Unresolved {
            name: name.to_string(),
            command: command.to_string(),
        })?;
        substituted.push_str(&command[last_end..reference.start()]);
        substituted.push_str(value);
        last_end = reference.end();
    }
    substituted.push_str(&command[last_end..]);
    Ok(substituted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("branch".to_string(), "feature/login".to_string()),
            ("remote".to_string(), "origin".to_string()),
        ])
    }

    #[test]
    fn extracts_declared_name() {
        assert_eq!(
            declared_name("< branch | Name of the branch >").unwrap(),
            "branch"
        );
        assert_eq!(declared_name("<version|Release version>").unwrap(), "version");
    }

    #[test]
    fn rejects_malformed_declarations() {
        assert_eq!(
            declared_name("< branch >").unwrap_err(),
            VariableError::InvalidDeclaration("< branch >".to_string())
        );
        assert!(!is_valid_declaration("branch | description"));
    }

    #[test]
    fn substitutes_every_reference() {
        let command = "git push $<remote> $<branch>";
        assert_eq!(
            substitute(command, &bindings()).unwrap(),
            "git push origin feature/login"
        );
    }

    #[test]
    fn commands_without_references_pass_through() {
        assert_eq!(substitute("git status", &bindings()).unwrap(), "git status");
    }

    #[test]
    fn unresolved_reference_is_an_error() {
        let err = substitute("echo $<missing>", &bindings()).unwrap_err();
        assert_eq!(
            err,
            VariableError::Unresolved {
                name: "missing".to_string(),
                command: "echo $<missing>".to_string(),
            }
        );
    }
}
