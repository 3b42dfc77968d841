use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::collection::{Collection, ModelKind};
use crate::registry::{NoArguments, OperationError, OperationSpec, OperationTableBuilder};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelFieldNamesArgs {
    /// Note type name, e.g. `Basic` or `Cloze`.
    pub model_name: String,
}

pub fn register(builder: &mut OperationTableBuilder<Collection>) {
    builder
        .register(OperationSpec::new(
            "modelNames",
            "List the names of all note types.",
            model_names,
        ))
        .register(OperationSpec::new(
            "modelFieldNames",
            "List the field names of a note type, in order.",
            model_field_names,
        ));
}

fn model_names(col: &mut Collection, _: NoArguments) -> Result<Value, OperationError> {
    let names: Vec<&str> = col.models().iter().map(|m| m.name.as_str()).collect();
    let pick = |wanted: &str| names.iter().find(|n| **n == wanted).copied();
    Ok(json!({
        "success": true,
        "total": names.len(),
        "message": format!("Found {} note types", names.len()),
        "commonTypes": {
            "basic": pick("Basic"),
            "basicReversed": pick("Basic (and reversed card)"),
            "cloze": pick("Cloze"),
        },
        "modelNames": names,
    }))
}

fn model_field_names(col: &mut Collection, args: ModelFieldNamesArgs) -> Result<Value, OperationError> {
    let Some(model) = col.model_by_name(&args.model_name) else {
        return Err(
            OperationError::handler(format!("Model \"{}\" not found", args.model_name))
                .with_hint("Use modelNames tool to see available note types"),
        );
    };

    let mut result = json!({
        "success": true,
        "modelName": model.name,
        "fieldNames": model.fields,
        "total": model.fields.len(),
        "message": format!("Note type \"{}\" has {} fields", model.name, model.fields.len()),
    });

    let example: Map<String, Value> = model
        .fields
        .iter()
        .map(|f| (f.clone(), json!(format!("Your {} here", f.to_lowercase()))))
        .collect();
    result["example"] = Value::Object(example);
    if model.kind == ModelKind::Cloze {
        result["hint"] = json!("Mark deletions in the first field as {{c1::answer}}");
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Arguments;
    use crate::operations::table;

    #[test]
    fn lists_stock_types() {
        let table = table().unwrap();
        let mut col = Collection::new();
        let value = table.execute(&mut col, "modelNames", Arguments::new()).unwrap();
        assert_eq!(value["total"], 3);
        assert_eq!(value["commonTypes"]["cloze"], "Cloze");
        assert_eq!(value["modelNames"][1], "Basic (and reversed card)");
    }

    #[test]
    fn field_names_for_known_and_unknown_types() {
        let table = table().unwrap();
        let mut col = Collection::new();
        let args = |name: &str| json!({ "modelName": name }).as_object().cloned().unwrap();

        let cloze = table.execute(&mut col, "modelFieldNames", args("Cloze")).unwrap();
        assert_eq!(cloze["fieldNames"], json!(["Text", "Extra"]));
        assert!(cloze["hint"].is_string());

        let err = table
            .execute(&mut col, "modelFieldNames", args("Vocab"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Model \"Vocab\" not found (hint: Use modelNames tool to see available note types)"
        );
    }

    #[test]
    fn closed_collection_is_reported() {
        let table = table().unwrap();
        let mut col = Collection::new();
        col.set_open(false);
        assert_eq!(
            table.execute(&mut col, "modelNames", Arguments::new()),
            Err(OperationError::CollectionUnavailable)
        );
    }
}
