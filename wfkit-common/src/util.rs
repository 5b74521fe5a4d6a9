//! Shared helpers for logging act invocations and reading its output.

use std::sync::OnceLock;

use regex::Regex;

/// Length of the value starting at the beginning of `s`, honouring quotes,
/// `$(...)` substitutions, and backslash escapes.
fn find_value_end(s: &str) -> usize {
    let mut end = 0;
    let mut in_quote = None;
    let mut depth = 0usize;
    let mut escaped = false;

    for c in s.chars() {
        let char_len = c.len_utf8();

        if escaped {
            escaped = false;
            end += char_len;
            continue;
        }

        match c {
            '\\' => escaped = true,
            q if in_quote == Some(q) => in_quote = None,
            _ if in_quote.is_some() => {}
            '"' | '\'' => in_quote = Some(c),
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            c if c.is_whitespace() && depth == 0 => break,
            _ => {}
        }
        end += char_len;
    }
    end
}

/// Variable names whose values never reach a log line.
const SENSITIVE_KEYS: &[&str] = &[
    "GITHUB_TOKEN",
    "GH_TOKEN",
    "ACTIONS_RUNTIME_TOKEN",
    "VAULT_TOKEN",
    "GCOM_TOKEN",
    "API_KEY",
    "PASSWORD",
    "SECRET",
    "TOKEN",
];

/// Mask secret values in a command line before logging it.
///
/// Every `--secret NAME=value` (or `-s NAME=value`) argument keeps its name
/// and loses its value, as does any `KEY=value` pair whose key ends with one
/// of the sensitive names.
pub fn mask_sensitive_command(cmd: &str) -> String {
    let mut result = String::with_capacity(cmd.len());
    let mut rest = cmd;
    let mut mask_next = false;

    while !rest.is_empty() {
        let trimmed = rest.trim_start();
        result.push_str(&rest[..rest.len() - trimmed.len()]);
        rest = trimmed;
        if rest.is_empty() {
            break;
        }

        let len = find_value_end(rest).max(1);
        let (token, tail) = rest.split_at(len);
        rest = tail;

        let is_flag = matches!(token, "--secret" | "-s");
        match token.split_once('=') {
            Some((key, _)) if mask_next || is_sensitive_key(key) => {
                result.push_str(key);
                result.push_str("=***");
            }
            _ if mask_next => result.push_str("***"),
            _ => result.push_str(token),
        }
        mask_next = is_flag;
    }
    result
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.trim_start_matches('-').to_ascii_uppercase();
    SENSITIVE_KEYS.iter().any(|name| key.ends_with(name))
}

fn uuid_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"-?[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
            )
            .ok()
        })
        .as_ref()
}

/// Remove run ids (and the dash joining them) from act's job and workflow labels.
pub fn strip_uuids(raw: &str) -> String {
    match uuid_pattern() {
        Some(pattern) => pattern.replace_all(raw, "").trim().to_string(),
        None => raw.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret_flags_keep_names() {
        let cmd = r#"act push --secret GITHUB_TOKEN="$(gh auth token)" -s OTHER=plain --json"#;
        let masked = mask_sensitive_command(cmd);
        assert_eq!(masked, "act push --secret GITHUB_TOKEN=*** -s OTHER=*** --json");
    }

    #[test]
    fn test_mask_sensitive_env_pairs() {
        let masked = mask_sensitive_command("VAULT_TOKEN=abc MY_API_KEY='x y' LOG=debug");
        assert_eq!(masked, "VAULT_TOKEN=*** MY_API_KEY=*** LOG=debug");
    }

    #[test]
    fn test_mask_secret_equals_form() {
        let masked = mask_sensitive_command("act --secret=NAME=value --verbose");
        assert_eq!(masked, "act --secret=*** --verbose");
    }

    #[test]
    fn test_mask_leaves_plain_commands_alone() {
        let cmd = "act pull_request --workflows /tmp/a.yml  --json";
        assert_eq!(mask_sensitive_command(cmd), cmd);
    }

    #[test]
    fn test_strip_uuids() {
        assert_eq!(
            strip_uuids("act-ci-0f8fad5b-d9cb-469f-a165-70867728950e.yml"),
            "act-ci.yml"
        );
        assert_eq!(strip_uuids("build"), "build");
        assert_eq!(
            strip_uuids("publish-0F8FAD5B-D9CB-469F-A165-70867728950E/upload"),
            "publish/upload"
        );
    }
}
