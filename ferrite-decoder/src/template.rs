//! Mustache-lite substitution for turn content: `{{name}}` is replaced with a declared
//! variable's value before the turn is tokenized. No conditionals, no sections, no escaping —
//! just the one substitution form `write` needs.

use std::collections::HashMap;

use crate::{Error, Result};

pub fn render(template: &str, vars: &HashMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(Error::MalformedTemplate(template.to_string()));
        };
        let key = after[..end].trim();
        let value = vars.get(key).ok_or_else(|| Error::UndeclaredVariable(key.to_string()))?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_a_declared_variable() {
        let mut vars = HashMap::new();
        vars.insert("name".to_string(), "Ferrite".to_string());
        assert_eq!(render("hello {{name}}", &vars).unwrap(), "hello Ferrite");
    }

    #[test]
    fn leaves_text_without_placeholders_untouched() {
        let vars = HashMap::new();
        assert_eq!(render("no placeholders here", &vars).unwrap(), "no placeholders here");
    }

    #[test]
    fn trims_whitespace_inside_braces() {
        let mut vars = HashMap::new();
        vars.insert("x".to_string(), "1".to_string());
        assert_eq!(render("{{ x }}", &vars).unwrap(), "1");
    }

    #[test]
    fn rejects_an_undeclared_variable() {
        let vars = HashMap::new();
        assert!(matches!(render("{{missing}}", &vars), Err(Error::UndeclaredVariable(ref k)) if k == "missing"));
    }

    #[test]
    fn rejects_an_unterminated_placeholder() {
        let vars = HashMap::new();
        assert!(matches!(render("hello {{name", &vars), Err(Error::MalformedTemplate(_))));
    }
}
