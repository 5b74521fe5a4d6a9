//! Drop-in replacements for steps that call external services.
//!
//! Each factory takes the original step, checks it calls the action it knows
//! how to fake (by `uses:` prefix), and returns a `run:` step with the same
//! observable effect: files in a local directory instead of a bucket, canned
//! values instead of a secrets store. Factories run while the workflow is
//! being assembled, so a misconfigured mock fails before act is started.
//!
//! Use them with [`crate::workflow::Workflow::mock_all_steps_using_action`]:
//!
//! ```ignore
//! workflow.mock_all_steps_using_action(actions::APP_TOKEN, |step| {
//!     mocks::app_token(step, "ghs_test")
//! })?;
//! ```

mod secrets;
mod storage;


use std::path::Path;

use thiserror::Error;

use crate::workflow::Step;

pub use secrets::{SecretTables, vault_secrets};
pub use storage::gcs_upload;

/// `uses:` prefixes of the actions this module can fake.
pub mod actions {
    pub const GCS_UPLOAD: &str = "google-github-actions/upload-cloud-storage@";
    pub const VAULT_SECRETS: &str = "grafana/shared-workflows/actions/get-vault-secrets@";
    pub const ARGO_TRIGGER: &str = "grafana/shared-workflows/actions/trigger-argo-workflow@";
    pub const APP_TOKEN: &str = "actions/create-github-app-token@";
}

/// Heredoc delimiter for multi-line values written to `$GITHUB_OUTPUT` / `$GITHUB_ENV`.
const VALUE_DELIMITER: &str = "WFKIT_EOF";

#[derive(Debug, Error)]
pub enum MockError {
    #[error("step {step} uses {found}, expected an action starting with {expected}")]
    WrongAction {
        step: String,
        expected: &'static str,
        found: String,
    },

    #[error("step {step} is missing input `{input}`")]
    MissingInput { step: String, input: String },

    #[error("step {step} input `{input}` should be a {expected}, found {found}")]
    InputType {
        step: String,
        input: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("step {step} input `{input}` is invalid: {reason}")]
    InvalidInput {
        step: String,
        input: String,
        reason: String,
    },

    #[error("malformed secret line in `{input}`: {line:?} (expected NAME=reference)")]
    MalformedSecretLine { input: String, line: String },

    #[error("no mock value for secret reference {reference:?} and no default configured")]
    UnresolvedSecret { reference: String },

    #[error("failed to encode mock value: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Fail unless `step` calls an action starting with `prefix`.
pub(crate) fn expect_action(step: &Step, prefix: &'static str) -> Result<(), MockError> {
    if step.uses_action(prefix) {
        return Ok(());
    }
    Err(MockError::WrongAction {
        step: step.label(),
        expected: prefix,
        found: step.uses.clone().unwrap_or_else(|| "no action".to_string()),
    })
}

pub(crate) fn quote(raw: &str) -> String {
    shell_escape::unix::escape(raw.into()).into_owned()
}

/// Shell lines appending `name=value` to the file named by `$file_var`.
///
/// Multi-line values use the heredoc form GitHub documents for both files.
pub(crate) fn append_value_lines(file_var: &str, name: &str, value: &str) -> String {
    if value.contains('\n') {
        format!(
            "{{\n  echo {}\n  printf '%s\\n' {}\n  echo {VALUE_DELIMITER}\n}} >> \"${file_var}\"\n",
            quote(&format!("{name}<<{VALUE_DELIMITER}")),
            quote(value),
        )
    } else {
        format!("echo {} >> \"${file_var}\"\n", quote(&format!("{name}={value}")))
    }
}

fn mock_name(original: &Step, what: &str) -> String {
    match &original.name {
        Some(name) => format!("{name} (mocked {what})"),
        None => format!("Mocked {what}"),
    }
}

/// A step that does nothing but keep the original's id, so later
/// `steps.<id>` references still resolve.
pub fn no_op(original: &Step) -> Step {
    Step {
        id: original.id.clone(),
        name: Some(mock_name(original, "no-op")),
        run: Some("true".to_string()),
        shell: Some("bash".to_string()),
        ..Default::default()
    }
}

/// A step that copies the contents of `src` into `dst`.
pub fn copy_files(src: &Path, dst: &Path) -> Step {
    let src = quote(&src.to_string_lossy());
    let dst = quote(&dst.to_string_lossy());
    Step::run(
        "Copy mock files",
        format!("set -euo pipefail\nmkdir -p {dst}\ncp -R {src}/. {dst}/\n"),
    )
}

/// A step that only sets the given outputs.
pub fn outputs<'a>(id: &str, values: impl IntoIterator<Item = (&'a str, &'a str)>) -> Step {
    let mut script = String::from("set -euo pipefail\n");
    for (name, value) in values {
        script.push_str(&append_value_lines("GITHUB_OUTPUT", name, value));
    }
    Step::run("Mock outputs", script).with_id(id)
}

/// Replace a workflow-trigger step with one that reports `uri`.
pub fn argo_trigger(original: &Step, uri: &str) -> Result<Step, MockError> {
    expect_action(original, actions::ARGO_TRIGGER)?;
    Ok(Step {
        id: original.id.clone(),
        name: Some(mock_name(original, "workflow trigger")),
        run: Some(format!(
            "set -euo pipefail\n{}",
            append_value_lines("GITHUB_OUTPUT", "uri", uri)
        )),
        shell: Some("bash".to_string()),
        ..Default::default()
    })
}

/// Replace an app-token step with one that emits `token`.
pub fn app_token(original: &Step, token: &str) -> Result<Step, MockError> {
    expect_action(original, actions::APP_TOKEN)?;
    Ok(Step {
        id: original.id.clone(),
        name: Some(mock_name(original, "app token")),
        run: Some("set -euo pipefail\necho \"token=$MOCK_APP_TOKEN\" >> \"$GITHUB_OUTPUT\"\n".to_string()),
        shell: Some("bash".to_string()),
        env: [("MOCK_APP_TOKEN".to_string(), token.into())].into_iter().collect(),
        ..Default::default()
    })
}
