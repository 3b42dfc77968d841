use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::collection::search::wildcard;
use crate::collection::{Collection, MEDIA_FOLDER};
use crate::registry::{OperationError, OperationSpec, OperationTableBuilder};

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StoreMediaArgs {
    /// Name to store the file under, e.g. `image.png`.
    pub filename: String,
    /// Base64-encoded content. Exclusive with `path`.
    #[serde(default)]
    pub data: Option<String>,
    /// Local file to copy. Exclusive with `data`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Replace a file with the same name instead of storing under a new name.
    #[serde(default = "default_true")]
    pub delete_existing: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MediaNamesArgs {
    /// Glob such as `*.mp3`; `?` matches one character.
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteMediaArgs {
    pub filename: String,
}

pub fn register(builder: &mut OperationTableBuilder<Collection>) {
    builder
        .register(
            OperationSpec::new(
                "store_media_file",
                "Store a file in the media folder from base64 data or a local path.",
                store_media_file,
            )
            .write(),
        )
        .register(OperationSpec::new(
            "get_media_files_names",
            "List media file names, optionally filtered by a glob pattern.",
            media_file_names,
        ))
        .register(
            OperationSpec::new(
                "delete_media_file",
                "Delete a file from the media folder. Cards referencing it will show a missing file.",
                delete_media_file,
            )
            .write(),
        );
}

fn store_media_file(col: &mut Collection, args: StoreMediaArgs) -> Result<Value, OperationError> {
    let filename = args.filename.trim();
    if filename.is_empty() {
        return Err(OperationError::handler("Filename cannot be empty"));
    }
    if filename.contains(['/', '\\']) {
        return Err(OperationError::handler(format!("Invalid filename: {filename}"))
            .with_hint("Media files live in a flat folder; pass a bare file name"));
    }

    let (bytes, source_type) = match (args.data, args.path) {
        (Some(data), None) => {
            let bytes = STANDARD.decode(data.trim()).map_err(|e| {
                OperationError::handler(format!("Failed to decode base64 data: {e}")).with_data("filename", filename)
            })?;
            (bytes, "base64")
        }
        (None, Some(path)) => {
            if !path.is_file() {
                return Err(OperationError::handler(format!("File not found: {}", path.display()))
                    .with_data("filename", filename));
            }
            let bytes = std::fs::read(&path).map_err(|e| {
                OperationError::handler(format!("Failed to read file: {e}"))
                    .with_data("path", path.display().to_string())
            })?;
            (bytes, "file")
        }
        (None, None) => return Err(OperationError::handler("Must provide exactly one of: data, path")),
        (Some(_), Some(_)) => {
            return Err(OperationError::handler("Must provide exactly one of: data, path (got multiple)"));
        }
    };
    if bytes.is_empty() {
        return Err(OperationError::handler("File data is empty").with_data("filename", filename));
    }

    let size = bytes.len();
    let actual = col.write_media(filename, bytes, args.delete_existing);
    Ok(json!({
        "success": true,
        "filename": actual,
        "size": size,
        "message": format!("Successfully stored media file \"{actual}\" ({size} bytes)"),
        "details": {
            "source_type": source_type,
            "original_filename": filename,
            "actual_filename": actual,
            "replaced_existing": args.delete_existing,
        },
    }))
}

fn media_file_names(col: &mut Collection, args: MediaNamesArgs) -> Result<Value, OperationError> {
    let pattern = args.pattern.as_deref().filter(|p| !p.is_empty());
    let matcher = pattern
        .map(|p| wildcard(p, '?'))
        .transpose()
        .map_err(|e| OperationError::handler(e.to_string()))?;

    let files: Vec<&str> = col
        .media_names()
        .filter(|name| matcher.as_ref().is_none_or(|re| re.is_match(name)))
        .collect();

    let mut result = json!({
        "success": true,
        "total": files.len(),
        "files": files,
        "media_folder": MEDIA_FOLDER,
    });
    if let Some(pattern) = pattern {
        result["pattern"] = json!(pattern);
    }
    if files.is_empty() {
        result["message"] = json!(match pattern {
            Some(p) => format!("No media files match pattern: {p}"),
            None => "Media folder is empty".to_owned(),
        });
    }
    Ok(result)
}

fn delete_media_file(col: &mut Collection, args: DeleteMediaArgs) -> Result<Value, OperationError> {
    let filename = args.filename.trim();
    if filename.is_empty() {
        return Err(OperationError::handler("Filename cannot be empty"));
    }
    if filename.contains(['/', '\\']) || filename.contains("..") || filename.starts_with('.') {
        return Err(OperationError::handler(format!("Invalid filename: {filename}"))
            .with_hint("Pass a bare file name from get_media_files_names"));
    }
    if !col.remove_media(filename) {
        return Err(OperationError::handler(format!("Media file not found: {filename}"))
            .with_hint("Use get_media_files_names to list existing files"));
    }
    Ok(json!({
        "success": true,
        "filename": filename,
        "message": format!("Deleted media file \"{filename}\""),
        "warning": "Cards referencing this file will show it as missing",
    }))
}
