use std::collections::BTreeMap;

use super::{MockError, actions, append_value_lines, expect_action, mock_name};
use crate::workflow::Step;

/// Canned secret values, keyed by the `path:key` reference the pipeline asks for.
#[derive(Debug, Clone, Default)]
pub struct SecretTables {
    /// Resolves `common_secrets` lines.
    pub common: BTreeMap<String, String>,
    /// Resolves `repo_secrets` lines.
    pub repo: BTreeMap<String, String>,
    /// Used for references neither table knows; `None` makes them an error.
    pub default_value: Option<String>,
}

impl SecretTables {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn common(mut self, reference: &str, value: &str) -> Self {
        self.common.insert(reference.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn repo(mut self, reference: &str, value: &str) -> Self {
        self.repo.insert(reference.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: &str) -> Self {
        self.default_value = Some(value.to_string());
        self
    }

    fn resolve(
        &self,
        table: &BTreeMap<String, String>,
        reference: &str,
    ) -> Result<String, MockError> {
        table
            .get(reference)
            .or(self.default_value.as_ref())
            .cloned()
            .ok_or_else(|| MockError::UnresolvedSecret {
                reference: reference.to_string(),
            })
    }
}

/// Parse `NAME=reference` lines, skipping blanks.
fn parse_secret_lines<'a>(input: &str, text: &'a str) -> Result<Vec<(&'a str, &'a str)>, MockError> {
    let mut pairs = Vec::new();
    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let malformed = || MockError::MalformedSecretLine {
            input: input.to_string(),
            line: line.to_string(),
        };
        let (name, reference) = line.split_once('=').ok_or_else(malformed)?;
        let (name, reference) = (name.trim(), reference.trim());
        if name.is_empty() || reference.is_empty() {
            return Err(malformed());
        }
        pairs.push((name, reference));
    }
    Ok(pairs)
}

/// Replace a secrets-store fetch with canned values from `tables`.
///
/// With `export_env` (default `true`) each secret is appended to
/// `$GITHUB_ENV`; otherwise a single `secrets` output carries them as a JSON
/// object, staged in the step's `MOCK_SECRETS_JSON` env var.
pub fn vault_secrets(original: &Step, tables: &SecretTables) -> Result<Step, MockError> {
    expect_action(original, actions::VAULT_SECRETS)?;

    let mut resolved = BTreeMap::new();
    for (input, table) in [("common_secrets", &tables.common), ("repo_secrets", &tables.repo)] {
        let Some(text) = original.input_str_opt(input)? else {
            continue;
        };
        for (name, reference) in parse_secret_lines(input, text)? {
            resolved.insert(name.to_string(), tables.resolve(table, reference)?);
        }
    }

    let export_env = original.input_bool("export_env", true)?;
    let mut step = Step {
        id: original.id.clone(),
        name: Some(mock_name(original, "secrets")),
        shell: Some("bash".to_string()),
        ..Default::default()
    };

    if export_env {
        let mut script = String::from("set -euo pipefail\n");
        for (name, value) in &resolved {
            script.push_str(&append_value_lines("GITHUB_ENV", name, value));
        }
        step.run = Some(script);
    } else {
        let json = serde_json::to_string(&resolved)?;
        step.env.insert("MOCK_SECRETS_JSON".to_string(), json.into());
        step.run = Some(
            "set -euo pipefail\necho \"secrets=$MOCK_SECRETS_JSON\" >> \"$GITHUB_OUTPUT\"\n"
                .to_string(),
        );
    }
    Ok(step)
}
