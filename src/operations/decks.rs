use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::collection::Collection;
use crate::registry::{OperationError, OperationSpec, OperationTableBuilder};

const MAX_DECK_DEPTH: usize = 2;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListDecksArgs {
    /// Include new/learning/review counts for each deck.
    #[serde(default)]
    pub include_stats: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateDeckArgs {
    /// Deck name; `Parent::Child` creates a nested deck.
    pub deck_name: String,
}

pub fn register(builder: &mut OperationTableBuilder<Collection>) {
    builder
        .register(OperationSpec::new(
            "list_decks",
            "List all decks, optionally with card counts.",
            list_decks,
        ))
        .register(
            OperationSpec::new(
                "create_deck",
                "Create a deck. Supports one level of nesting with `Parent::Child`.",
                create_deck,
            )
            .write(),
        );
}

fn list_decks(col: &mut Collection, args: ListDecksArgs) -> Result<Value, OperationError> {
    let mut decks = Vec::new();
    let (mut total_cards, mut new, mut learning, mut review) = (0, 0, 0, 0);

    for deck in col.decks() {
        let mut entry = json!({ "name": deck.name });
        if args.include_stats {
            let counts = col.deck_counts(deck.id);
            // parents include their children; only top-level decks feed the summary
            if !deck.name.contains("::") {
                total_cards += counts.total;
                new += counts.new;
                learning += counts.learning;
                review += counts.review;
            }
            entry["stats"] = json!({
                "deck_id": deck.id,
                "name": deck.name,
                "new_count": counts.new,
                "learn_count": counts.learning,
                "review_count": counts.review,
                "total_new": counts.new,
                "total_cards": counts.total,
            });
        }
        decks.push(entry);
    }
    decks.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

    let mut result = json!({
        "success": true,
        "total": decks.len(),
        "decks": decks,
    });
    if args.include_stats {
        result["summary"] = json!({
            "total_cards": total_cards,
            "new_cards": new,
            "learning_cards": learning,
            "review_cards": review,
        });
    }
    if result["total"] == 0 {
        result["message"] = json!("No decks found");
    }
    Ok(result)
}

fn create_deck(col: &mut Collection, args: CreateDeckArgs) -> Result<Value, OperationError> {
    let name = args.deck_name.trim();
    if name.is_empty() {
        return Err(OperationError::handler("Deck name cannot be empty"));
    }
    let parts: Vec<&str> = name.split("::").collect();
    if parts.len() > MAX_DECK_DEPTH {
        return Err(OperationError::handler(format!(
            "Deck name can have maximum {MAX_DECK_DEPTH} levels (parent::child). Provided: {} levels",
            parts.len()
        ))
        .with_data("deck_name", name));
    }
    if parts.iter().any(|p| p.trim().is_empty()) {
        return Err(OperationError::handler("Deck name parts cannot be empty").with_data("deck_name", name));
    }

    let (deck_id, created) = col.deck_id_or_create(name);
    let mut result = json!({
        "success": true,
        "deckId": deck_id,
        "deckName": name,
        "created": created,
    });
    if !created {
        result["exists"] = json!(true);
        result["message"] = json!(format!("Deck '{name}' already exists"));
    } else {
        result["message"] = json!(format!("Successfully created deck '{name}'"));
    }
    if let [parent, child] = parts.as_slice() {
        result["parentDeck"] = json!(parent);
        result["childDeck"] = json!(child);
    }
    Ok(result)
}
