use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Expand `{{ env.VAR }}` placeholders in raw TOML text
///
/// `{{ env.VAR | default("value") }}` falls back to `value` when `VAR` is
/// unset. Comment lines are copied through untouched so a commented-out
/// secret never has to exist in the environment.
pub fn expand_env(input: &str) -> Result<String, String> {
    let mut lines = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            lines.push(line.to_owned());
        } else {
            lines.push(expand_line(line)?);
        }
    }

    let mut output = lines.join("\n");
    if input.ends_with('\n') {
        output.push('\n');
    }

    Ok(output)
}

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\{\{\s*([A-Za-z0-9_.]+)\s*(?:\|\s*default\("([^"]*)"\))?\s*\}\}"#).expect("must be valid regex")
    })
}

fn expand_line(line: &str) -> Result<String, String> {
    let mut expanded = String::with_capacity(line.len());
    let mut cursor = 0;

    for caps in placeholder().captures_iter(line) {
        let Some(whole) = caps.get(0) else { continue };
        expanded.push_str(&line[cursor..whole.start()]);
        expanded.push_str(&resolve(&caps)?);
        cursor = whole.end();
    }

    expanded.push_str(&line[cursor..]);
    Ok(expanded)
}

fn resolve(caps: &Captures<'_>) -> Result<String, String> {
    let key = caps.get(1).map_or("", |m| m.as_str());
    let fallback = caps.get(2).map(|m| m.as_str());

    let Some(var) = key.strip_prefix("env.").filter(|v| !v.is_empty() && !v.contains('.')) else {
        return Err(format!("only variables scoped with 'env.' are supported: `{key}`"));
    };

    match (std::env::var(var), fallback) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(default)) => Ok(default.to_owned()),
        (Err(_), None) => Err(format!("environment variable not found: `{var}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_without_placeholders_is_unchanged() {
        let input = "[ledger]\ncharge_demo = false\n";
        assert_eq!(expand_env(input).unwrap(), input);
    }

    #[test]
    fn substitutes_secret_from_environment() {
        temp_env::with_var("TOLLGATE_TEST_KEY", Some("sk-test"), || {
            let result = expand_env("api_key = \"{{ env.TOLLGATE_TEST_KEY }}\"").unwrap();
            assert_eq!(result, "api_key = \"sk-test\"");
        });
    }

    #[test]
    fn several_placeholders_on_one_line() {
        let vars = [("TG_HOST", Some("localhost")), ("TG_PORT", Some("8080"))];
        temp_env::with_vars(vars, || {
            let result = expand_env("url = \"http://{{ env.TG_HOST }}:{{env.TG_PORT}}\"").unwrap();
            assert_eq!(result, "url = \"http://localhost:8080\"");
        });
    }

    #[test]
    fn missing_variable_is_an_error() {
        temp_env::with_var_unset("TG_MISSING", || {
            let err = expand_env("jwt_secret = \"{{ env.TG_MISSING }}\"").unwrap_err();
            assert!(err.contains("TG_MISSING"));
        });
    }

    #[test]
    fn default_applies_only_when_unset() {
        temp_env::with_var_unset("TG_OPTIONAL", || {
            let result = expand_env("k = \"{{ env.TG_OPTIONAL | default(\"fallback\") }}\"").unwrap();
            assert_eq!(result, "k = \"fallback\"");
        });
        temp_env::with_var("TG_OPTIONAL", Some("set"), || {
            let result = expand_env("k = \"{{ env.TG_OPTIONAL | default(\"fallback\") }}\"").unwrap();
            assert_eq!(result, "k = \"set\"");
        });
    }

    #[test]
    fn rejects_non_env_scope() {
        let err = expand_env("k = \"{{ vault.KEY }}\"").unwrap_err();
        assert!(err.contains("only variables scoped with 'env.'"));
    }

    #[test]
    fn comments_are_not_expanded() {
        temp_env::with_var_unset("TG_COMMENTED", || {
            let input = "  # api_key = \"{{ env.TG_COMMENTED }}\"\nplan = \"free\"";
            assert_eq!(expand_env(input).unwrap(), input);
        });
    }
}
