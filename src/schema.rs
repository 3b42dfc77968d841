use std::fs;
use std::path::Path;

use anyhow::Context;
use schemars::schema_for;
use serde_json::{Map, Value, json};

use crate::config::BridgeConfig;
use crate::registry::OperationInfo;

pub const CONFIG_SCHEMA_FILE: &str = "config.schema.json";

/// Write the config schema plus one schema per tool under
/// `out_dir/tool-<name>/tool-<name>.schema.json`. Resources take no input and
/// get no file. Returns how many files were written.
pub fn write_schema(out_dir: &Path, operations: &[OperationInfo]) -> anyhow::Result<usize> {
    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;

    let config_schema = schema_for!(BridgeConfig);
    fs::write(
        out_dir.join(CONFIG_SCHEMA_FILE),
        serde_json::to_string_pretty(&config_schema)?,
    )?;

    let tools: Vec<&OperationInfo> = operations.iter().filter(|o| !o.is_resource()).collect();
    for tool in &tools {
        let mut root = match &tool.input_schema {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        root.insert("title".into(), json!(tool.name));
        root.insert("description".into(), json!(tool.description));
        root.insert("x-write".into(), json!(tool.write));
        root.insert("x-requires-collection".into(), json!(tool.requires_collection));

        let tool_dir = out_dir.join(format!("tool-{}", tool.name));
        fs::create_dir_all(&tool_dir)?;
        fs::write(
            tool_dir.join(format!("tool-{}.schema.json", tool.name)),
            serde_json::to_string_pretty(&Value::Object(root))?,
        )?;
    }

    Ok(tools.len() + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::table;

    #[test]
    fn writes_config_and_tool_schemas() {
        let dir = tempfile::tempdir().unwrap();
        let infos = table().unwrap().infos();
        let written = write_schema(dir.path(), &infos).unwrap();
        let tools = infos.iter().filter(|i| !i.is_resource()).count();
        assert_eq!(written, tools + 1);
        assert!(!dir.path().join("tool-system_info").exists());

        let config: Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(CONFIG_SCHEMA_FILE)).unwrap()).unwrap();
        assert!(config["properties"]["poll_interval_ms"].is_object());

        let add_note: Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("tool-addNote/tool-addNote.schema.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(add_note["title"], "addNote");
        assert_eq!(add_note["x-write"], true);
        assert!(add_note["properties"]["fields"].is_object());
    }
}
