use std::collections::BTreeSet;

use lazy_regex::{lazy_regex, Lazy};
use regex::{Captures, Regex};

use crate::error::{Error, Result};

static RE_VARIABLE_NAME: Lazy<Regex> = lazy_regex!(r"^[a-z_][a-z0-9_]{0,15}$");
static RE_GENERATOR_NAME: Lazy<Regex> = lazy_regex!(r"^[a-zA-Z0-9_]+$");
static RE_GENSCRIPT_LINE: Lazy<Regex> = lazy_regex!(r"^[a-zA-Z0-9_]+( \S+)*$");
static RE_GENSCRIPT_COMMENT: Lazy<Regex> = lazy_regex!(r"^(#|//).*$");
static RE_INPUT_FILE: Lazy<Regex> =
    lazy_regex!(r"^([a-zA-Z0-9_\-]+)?%0?([2-9]|[1-9][0-9]+)d([a-zA-Z0-9_\-]+)?\.in(\.txt)?$");
static RE_OUTPUT_FILE: Lazy<Regex> =
    lazy_regex!(r"^([a-zA-Z0-9_\-]+)?%0?([2-9]|[1-9][0-9]+)d([a-zA-Z0-9_\-]+)?\.out(\.txt)?$");
static RE_ENUMERATION: Lazy<Regex> = lazy_regex!(r"%(0?)([0-9]+)d");

/// Words that would clash with type names, containers or keywords of the
/// languages modules are written in.
const BANNED_VARIABLE_NAMES: &[&str] = &[
    "int", "str", "bool", "long", "float", "double", "short", "integer", "string", "boolean",
    "number", "vector", "set", "queue", "list", "dict", "map", "array", "size", "len", "length",
    "filter", "for", "if", "else", "while", "def", "try", "catch", "except", "finally", "fn",
    "solution", "answer",
];

pub fn check_variable_name(name: &str) -> Result<()> {
    if !RE_VARIABLE_NAME.is_match(name) {
        return Err(Error::Syntax(format!(
            "variable name `{}` must be lowercase, at most 16 characters",
            name
        )));
    }
    if BANNED_VARIABLE_NAMES.contains(&name) {
        return Err(Error::Syntax(format!("variable name `{}` is reserved", name)));
    }
    Ok(())
}

pub fn check_generator_name(name: &str) -> Result<()> {
    if RE_GENERATOR_NAME.is_match(name) {
        Ok(())
    } else {
        Err(Error::Syntax(format!("invalid generator name `{}`", name)))
    }
}

pub fn check_input_syntax(syntax: &str) -> Result<()> {
    if RE_INPUT_FILE.is_match(syntax) {
        Ok(())
    } else {
        Err(Error::Syntax(format!("invalid input file syntax `{}`", syntax)))
    }
}

pub fn check_output_syntax(syntax: &str) -> Result<()> {
    if RE_OUTPUT_FILE.is_match(syntax) {
        Ok(())
    } else {
        Err(Error::Syntax(format!("invalid output file syntax `{}`", syntax)))
    }
}

/// Split a genscript line into the generator name and its arguments.
///
/// Blank and comment lines give `None`.
pub fn clean_genscript(line: &str, generators: &BTreeSet<String>) -> Result<Option<Vec<String>>> {
    let line = line.trim();
    if line.is_empty() || RE_GENSCRIPT_COMMENT.is_match(line) {
        return Ok(None);
    }
    if !RE_GENSCRIPT_LINE.is_match(line) {
        return Err(Error::Syntax(format!(
            "genscript `{}` does not satisfy syntax",
            line
        )));
    }
    let words: Vec<String> = line
        .split(' ')
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect();
    if !generators.contains(&words[0]) {
        return Err(Error::Syntax(format!(
            "unknown generator `{}` in genscript",
            words[0]
        )));
    }
    Ok(Some(words))
}

/// Substitute a 1-based test index into an IO file syntax such as `%02d.in.txt`.
pub fn format_index(syntax: &str, index: usize) -> String {
    RE_ENUMERATION
        .replace(syntax, |caps: &Captures| {
            let width: usize = caps[2].parse().unwrap_or(0);
            if &caps[1] == "0" {
                format!("{:0width$}", index, width = width)
            } else {
                format!("{:width$}", index, width = width)
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_names() {
        assert!(check_variable_name("a").is_ok());
        assert!(check_variable_name("_count2").is_ok());
        assert!(check_variable_name("abcdefghijklmnop").is_ok());
        assert!(check_variable_name("abcdefghijklmnopq").is_err());
        assert!(check_variable_name("Upper").is_err());
        assert!(check_variable_name("2x").is_err());
        assert!(matches!(check_variable_name("answer"), Err(Error::Syntax(_))));
        assert!(check_variable_name("answers").is_ok());
    }

    #[test]
    fn io_syntaxes() {
        assert!(check_input_syntax("%02d.in.txt").is_ok());
        assert!(check_input_syntax("test_%03dcase.in").is_ok());
        assert!(check_input_syntax("%d.in").is_err());
        assert!(check_input_syntax("%1d.in").is_err());
        assert!(check_input_syntax("%02d.out.txt").is_err());
        assert!(check_output_syntax("%02d.out.txt").is_ok());
        assert!(check_output_syntax("a b%02d.out").is_err());
    }

    #[test]
    fn genscripts() -> Result<()> {
        let generators: BTreeSet<String> = ["manual".to_string(), "random".to_string()].into();
        assert_eq!(clean_genscript("  ", &generators)?, None);
        assert_eq!(clean_genscript("# later", &generators)?, None);
        assert_eq!(clean_genscript("// later", &generators)?, None);
        assert_eq!(
            clean_genscript("manual 1 2 3", &generators)?,
            Some(vec!["manual".into(), "1".into(), "2".into(), "3".into()])
        );
        assert!(matches!(
            clean_genscript("unknown 1", &generators),
            Err(Error::Syntax(_))
        ));
        assert!(clean_genscript("manual  1", &generators).is_err());
        Ok(())
    }

    #[test]
    fn index_substitution() {
        assert_eq!(format_index("%02d.in.txt", 3), "03.in.txt");
        assert_eq!(format_index("case%03d.out", 12), "case012.out");
        assert_eq!(format_index("%2d.in", 7), " 7.in");
        assert_eq!(format_index("%02d.in", 123), "123.in");
    }
}
