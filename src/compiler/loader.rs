use crate::dsl::Workflow;
use crate::error::DefinitionError;
use std::fs;
use std::path::Path;

/// Reads and validates a workflow definition; the format follows the file
/// extension (`.json`, `.yaml`, `.yml`).
pub fn load_workflow(path: &Path) -> Result<Workflow, DefinitionError> {
    let content = fs::read_to_string(path).map_err(|source| DefinitionError::Io {
        path: path.display().to_string(),
        source,
    })?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Workflow::from_json(&content),
        Some("yaml") | Some("yml") => Workflow::from_yaml(&content),
        other => Err(DefinitionError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}
