//! Note-level tools: create, search, inspect, edit and delete.

use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::collection::{Collection, NoteId};
use crate::registry::{OperationError, OperationSpec, OperationTableBuilder};

const MAX_NOTES_PER_CALL: usize = 100;
const SEARCH_HINT: &str = "Examples: deck:Spanish, tag:verb, is:due, front:hola, \"exact phrase\"";

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddNoteArgs {
    /// Target deck, e.g. `Default` or `Japanese::Vocabulary`.
    pub deck_name: String,
    /// Note type, e.g. `Basic` or `Cloze`.
    pub model_name: String,
    /// Field values keyed by field name. Every field of the note type is required.
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Add the note even if another note of the same type has the same first field.
    #[serde(default)]
    pub allow_duplicate: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FindNotesArgs {
    /// Search query, e.g. `deck:Spanish tag:verb`.
    pub query: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NotesInfoArgs {
    /// Note ids, typically from `findNotes`.
    pub notes: Vec<NoteId>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NoteUpdate {
    pub id: NoteId,
    /// Only the listed fields change.
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateNoteFieldsArgs {
    pub note: NoteUpdate,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteNotesArgs {
    pub notes: Vec<NoteId>,
    /// Must be `true`; deletion cannot be undone.
    #[serde(default)]
    pub confirm_deletion: bool,
}

pub fn register(builder: &mut OperationTableBuilder<Collection>) {
    builder
        .register(
            OperationSpec::new(
                "addNote",
                "Add a note. Use modelNames and modelFieldNames to find note types and their fields. \
                 Only create notes the user asked for.",
                add_note,
            )
            .write(),
        )
        .register(
            OperationSpec::new(
                "findNotes",
                "Search for notes and return their ids. Supports deck:, tag:, note:, is:, field:value and quoted phrases.",
                find_notes,
            )
            .enveloped(),
        )
        .register(OperationSpec::new(
            "notesInfo",
            "Get fields, tags, note type and cards of notes by id.",
            notes_info,
        ))
        .register(
            OperationSpec::new(
                "updateNoteFields",
                "Change field values of an existing note.",
                update_note_fields,
            )
            .write(),
        )
        .register(
            OperationSpec::new(
                "deleteNotes",
                "Permanently delete notes and all their cards. Requires confirmDeletion.",
                delete_notes,
            )
            .write(),
        );
}

fn add_note(col: &mut Collection, args: AddNoteArgs) -> Result<Value, OperationError> {
    let empty: Vec<&str> = args
        .fields
        .iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k.as_str())
        .collect();
    if !empty.is_empty() {
        return Err(
            OperationError::handler(format!("Fields cannot be empty: {}", empty.join(", ")))
                .with_data("emptyFields", empty),
        );
    }

    let Some(deck_id) = col.deck_by_name(&args.deck_name).map(|d| d.id) else {
        return Err(OperationError::handler(format!("Deck not found: {}", args.deck_name))
            .with_hint("Use list_decks tool to see available decks or create_deck to create a new one."));
    };
    let Some(model) = col.model_by_name(&args.model_name).cloned() else {
        return Err(OperationError::handler(format!("Model not found: {}", args.model_name))
            .with_hint("Use modelNames tool to see available models."));
    };

    let missing: Vec<&str> = model
        .fields
        .iter()
        .filter(|f| !args.fields.contains_key(*f))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(
            OperationError::handler(format!("Missing required fields: {}", missing.join(", ")))
                .with_hint("Use modelFieldNames tool to see required fields for this model.")
                .with_data("requiredFields", model.fields.clone()),
        );
    }
    let extra: Vec<&str> = args
        .fields
        .keys()
        .filter(|k| model.field_index(k).is_none())
        .map(String::as_str)
        .collect();
    if !extra.is_empty() {
        return Err(
            OperationError::handler(format!("Unknown fields for this model: {}", extra.join(", ")))
                .with_hint("Use modelFieldNames tool to see valid fields for this model.")
                .with_data("requiredFields", model.fields.clone()),
        );
    }

    let values: Vec<String> = model
        .fields
        .iter()
        .map(|f| args.fields.get(f).cloned().unwrap_or_default())
        .collect();
    if !args.allow_duplicate && values.first().is_some_and(|first| col.is_duplicate(model.id, first)) {
        return Err(OperationError::handler("Failed to create note - it may be a duplicate").with_hint(
            "The note appears to be a duplicate. Set allowDuplicate to true if you want to add it anyway.",
        ));
    }

    let field_count = values.len();
    let tag_count = args.tags.len();
    let note_id = col
        .add_note(deck_id, model.id, values, args.tags)
        .map_err(|e| OperationError::handler(format!("Failed to create note: {e}")))?;

    Ok(json!({
        "success": true,
        "noteId": note_id,
        "deckName": args.deck_name,
        "modelName": args.model_name,
        "message": format!("Successfully created note in deck \"{}\"", args.deck_name),
        "details": {
            "fieldsAdded": field_count,
            "tagsAdded": tag_count,
            "duplicateCheckScope": if args.allow_duplicate { "none" } else { "collection" },
        },
    }))
}

fn find_notes(col: &mut Collection, args: FindNotesArgs) -> Result<Value, OperationError> {
    let ids = col.find_notes(&args.query).map_err(|e| {
        OperationError::handler(format!("Search query failed: {e}")).with_hint(SEARCH_HINT)
    })?;
    let message = if ids.is_empty() {
        format!("No notes found matching query: {}", args.query)
    } else {
        format!("Found {} notes", ids.len())
    };
    Ok(json!({
        "count": ids.len(),
        "noteIds": ids,
        "query": args.query,
        "message": message,
        "hint": "Use notesInfo with these ids to read note contents",
    }))
}

fn notes_info(col: &mut Collection, args: NotesInfoArgs) -> Result<Value, OperationError> {
    if args.notes.is_empty() {
        return Err(OperationError::handler("No note IDs provided"));
    }
    if args.notes.len() > MAX_NOTES_PER_CALL {
        return Err(OperationError::handler(format!(
            "Cannot fetch more than {MAX_NOTES_PER_CALL} notes at once. Requested: {}",
            args.notes.len()
        )));
    }

    let mut found = Vec::new();
    let mut model_names = BTreeSet::new();
    for id in &args.notes {
        let Some(note) = col.note(*id) else {
            continue;
        };
        let Some(model) = col.model(note.model_id) else {
            continue;
        };
        let fields: Map<String, Value> = model
            .fields
            .iter()
            .zip(&note.fields)
            .enumerate()
            .map(|(order, (name, value))| (name.clone(), json!({ "value": value, "order": order })))
            .collect();
        let cards: Vec<i64> = col.cards_of_note(note.id).iter().map(|c| c.id).collect();
        model_names.insert(model.name.clone());
        found.push(json!({
            "noteId": note.id,
            "modelName": model.name,
            "tags": note.tags,
            "fields": fields,
            "cards": cards,
            "mod": note.modified,
        }));
    }

    let not_found = args.notes.len() - found.len();
    let message = if not_found == 0 {
        format!("Retrieved {} notes", found.len())
    } else {
        format!("Retrieved {} notes ({not_found} not found)", found.len())
    };
    Ok(json!({
        "success": true,
        "count": found.len(),
        "notes": found,
        "notFound": not_found,
        "requestedIds": args.notes,
        "message": message,
        "models": model_names,
        "hint": "Field values may contain HTML",
    }))
}

fn update_note_fields(col: &mut Collection, args: UpdateNoteFieldsArgs) -> Result<Value, OperationError> {
    let NoteUpdate { id, fields } = args.note;
    if fields.is_empty() {
        return Err(OperationError::handler("No fields provided to update")
            .with_hint("Pass at least one field in note.fields"));
    }
    let Some(note) = col.note(id) else {
        return Err(OperationError::handler(format!("Note not found with ID {id}"))
            .with_hint("Use findNotes to look up note ids"));
    };
    let Some(model) = col.model(note.model_id).cloned() else {
        return Err(OperationError::handler(format!("Note type of note {id} is missing")));
    };

    let invalid: Vec<&str> = fields
        .keys()
        .filter(|k| model.field_index(k).is_none())
        .map(String::as_str)
        .collect();
    if !invalid.is_empty() {
        return Err(OperationError::handler(format!(
            "Invalid fields for model \"{}\": {}. Valid fields are: {}",
            model.name,
            invalid.join(", "),
            model.fields.join(", ")
        )));
    }

    col.update_note_fields(id, &fields)
        .map_err(|e| OperationError::handler(e.to_string()))?;
    let updated: Vec<&String> = fields.keys().collect();
    Ok(json!({
        "success": true,
        "noteId": id,
        "fieldCount": updated.len(),
        "updatedFields": updated,
        "modelName": model.name,
        "message": format!("Updated {} field(s) of note {id}", updated.len()),
    }))
}

fn delete_notes(col: &mut Collection, args: DeleteNotesArgs) -> Result<Value, OperationError> {
    if !args.confirm_deletion {
        return Err(OperationError::handler("Deletion not confirmed")
            .with_hint("Set confirmDeletion to true to permanently delete these notes"));
    }
    if args.notes.is_empty() {
        return Err(OperationError::handler("No note IDs provided"));
    }
    if args.notes.len() > MAX_NOTES_PER_CALL {
        return Err(OperationError::handler(format!(
            "Cannot delete more than {MAX_NOTES_PER_CALL} notes at once for safety. Requested: {} notes",
            args.notes.len()
        )));
    }

    let existing: Vec<NoteId> = args
        .notes
        .iter()
        .copied()
        .filter(|id| col.note(*id).is_some())
        .collect();
    let cards_deleted = col.remove_notes(&existing);
    let not_found = args.notes.len() - existing.len();

    Ok(json!({
        "success": true,
        "deletedCount": existing.len(),
        "deletedNoteIds": existing,
        "cardsDeleted": cards_deleted,
        "notFoundCount": not_found,
        "requestedIds": args.notes,
        "message": format!("Deleted {} notes and {cards_deleted} cards", existing.len()),
        "warning": "This action cannot be undone",
    }))
}
