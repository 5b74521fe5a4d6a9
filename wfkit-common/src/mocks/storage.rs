use std::path::Path;

use super::{MockError, actions, expect_action, mock_name, quote};
use crate::workflow::Step;

const UPLOAD_SCRIPT: &str = r#"set -euo pipefail
src=__SRC__
root=__ROOT__
dest_rel=__DEST__
if [ -d "$src" ]; then
  if [ __PARENT__ = true ]; then
    dest_rel="$dest_rel/$(basename "$src")"
  fi
  mkdir -p "$root/$dest_rel"
  cp -R "$src"/. "$root/$dest_rel"/
  mapfile -t files < <(cd "$src" && find . -type f | sed 's|^\./||' | LC_ALL=C sort)
else
  mkdir -p "$root/$dest_rel"
  cp "$src" "$root/$dest_rel"/
  files=("$(basename "$src")")
fi
uploaded=""
for f in "${files[@]}"; do
  uploaded="${uploaded:+$uploaded,}$dest_rel/$f"
done
echo "uploaded=$uploaded" >> "$GITHUB_OUTPUT"
"#;

/// Replace a cloud-storage upload with a copy into `storage_root`.
///
/// `destination` (`bucket/folder`) becomes a directory under `storage_root`.
/// With `parent: true` (the action's default) a directory source keeps its
/// own name below the destination. The `uploaded` output lists the copied
/// files, comma separated, each prefixed with the destination.
///
/// Job containers only see `storage_root` if the runner mounts it.
pub fn gcs_upload(original: &Step, storage_root: &Path) -> Result<Step, MockError> {
    expect_action(original, actions::GCS_UPLOAD)?;

    let path = original.input_str("path")?;
    let destination = original.input_str("destination")?.trim_matches('/');
    if destination.is_empty() {
        return Err(MockError::InvalidInput {
            step: original.label(),
            input: "destination".to_string(),
            reason: "must name at least a bucket".to_string(),
        });
    }
    let parent = original.input_bool("parent", true)?;

    let script = UPLOAD_SCRIPT
        .replace("__SRC__", &quote(path))
        .replace("__ROOT__", &quote(&storage_root.to_string_lossy()))
        .replace("__DEST__", &quote(destination))
        .replace("__PARENT__", if parent { "true" } else { "false" });

    Ok(Step {
        id: original.id.clone(),
        name: Some(mock_name(original, "cloud storage upload")),
        run: Some(script),
        shell: Some("bash".to_string()),
        working_directory: original.working_directory.clone(),
        ..Default::default()
    })
}
