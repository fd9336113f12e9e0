use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::{Captures, Regex};

use crate::capture::Header;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.-]*)\}").expect("PLACEHOLDER_RE is valid")
    })
}

/// Replaces every `${NAME}` with its value. Unknown names are left as
/// written. Single pass: substituted values are never scanned again.
pub fn substitute(text: &str, vars: &HashMap<String, String>) -> String {
    if vars.is_empty() || !text.contains("${") {
        return text.to_string();
    }
    placeholder_re()
        .replace_all(text, |caps: &Captures| match vars.get(&caps[1]) {
            Some(v) => v.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

pub fn substitute_headers(headers: Vec<Header>, vars: &HashMap<String, String>) -> Vec<Header> {
    headers
        .into_iter()
        .map(|h| Header {
            value: substitute(&h.value, vars),
            name: h.name,
        })
        .collect()
}

/// Source of the flat variable map, resolved once per run.
#[async_trait]
pub trait VariableSource: Send + Sync {
    async fn variables(&self) -> anyhow::Result<HashMap<String, String>>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticVariables(pub HashMap<String, String>);

#[async_trait]
impl VariableSource for StaticVariables {
    async fn variables(&self) -> anyhow::Result<HashMap<String, String>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitute_known_and_unknown() {
        let v = vars(&[("TOKEN", "abc"), ("env.region", "eu")]);
        assert_eq!(
            substitute("Bearer ${TOKEN} ${MISSING} ${env.region}", &v),
            "Bearer abc ${MISSING} eu"
        );
    }

    #[test]
    fn test_substitution_is_single_pass() {
        // A value that itself looks like a placeholder must not expand again.
        let v = vars(&[("A", "${B}"), ("B", "boom")]);
        assert_eq!(substitute("x=${A}", &v), "x=${B}");
    }

    #[test]
    fn test_substitute_headers_keeps_names() {
        let v = vars(&[("TOKEN", "abc")]);
        let out = substitute_headers(vec![Header::new("${TOKEN}", "t=${TOKEN}")], &v);
        assert_eq!(out, vec![Header::new("${TOKEN}", "t=abc")]);
    }
}
