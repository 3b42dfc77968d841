use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::collection::{CardId, Collection};
use crate::registry::{OperationError, OperationSpec, OperationTableBuilder};

const DEFAULT_DUE_LIMIT: usize = 10;
const MAX_DUE_LIMIT: usize = 50;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DueCardsArgs {
    /// Restrict to this deck and its children.
    #[serde(default)]
    pub deck_name: Option<String>,
    /// How many cards to return, 1 to 50.
    #[serde(default)]
    pub limit: Option<i64>,
}

fn default_step() -> i64 {
    1
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(tag = "action")]
pub enum CardManagementArgs {
    /// Set the learning order of new cards. Other cards are skipped.
    #[serde(rename = "reposition")]
    Reposition {
        card_ids: Vec<CardId>,
        #[serde(default)]
        starting_from: i64,
        #[serde(default = "default_step")]
        step_size: i64,
        #[serde(default)]
        randomize: bool,
        /// Push other new cards back to make room.
        #[serde(default)]
        shift_existing: bool,
    },
    /// Move cards to a deck, creating it if needed.
    #[serde(rename = "changeDeck")]
    ChangeDeck {
        card_ids: Vec<CardId>,
        /// Target deck; `Parent::Child` for nested decks.
        deck: String,
    },
}

impl CardManagementArgs {
    fn action(&self) -> &'static str {
        match self {
            CardManagementArgs::Reposition { .. } => "reposition",
            CardManagementArgs::ChangeDeck { .. } => "changeDeck",
        }
    }

    fn card_ids(&self) -> &[CardId] {
        match self {
            CardManagementArgs::Reposition { card_ids, .. } | CardManagementArgs::ChangeDeck { card_ids, .. } => {
                card_ids
            }
        }
    }
}

pub fn register(builder: &mut OperationTableBuilder<Collection>) {
    builder
        .register(OperationSpec::new(
            "get_due_cards",
            "Get cards due for review, with front and back text.",
            get_due_cards,
        ))
        .register(
            OperationSpec::new(
                "card_management",
                "Organize cards. `reposition` sets the order of new cards; \
                 `changeDeck` moves cards of any kind to another deck (created if missing).",
                card_management,
            )
            .write()
            .enveloped(),
        );
}

fn get_due_cards(col: &mut Collection, args: DueCardsArgs) -> Result<Value, OperationError> {
    let limit = args
        .limit
        .map(|l| l.clamp(1, MAX_DUE_LIMIT as i64) as usize)
        .unwrap_or(DEFAULT_DUE_LIMIT);

    let query = match args.deck_name.as_deref().filter(|d| !d.is_empty()) {
        Some(deck) => format!("\"deck:{}\" is:due", deck.replace('"', "\\\"")),
        None => "is:due".to_owned(),
    };
    let ids = col
        .find_cards(&query)
        .map_err(|e| OperationError::handler(format!("Failed to find due cards: {e}")))?;

    if ids.is_empty() {
        return Ok(json!({
            "success": true,
            "message": "No cards are due for review",
            "cards": [],
            "total": 0,
            "returned": 0,
        }));
    }

    let mut cards = Vec::new();
    for id in ids.iter().take(limit) {
        let Some(card) = col.card(*id) else {
            warn!(card_id = id, "due card vanished");
            continue;
        };
        let Some(note) = col.note(card.note_id) else {
            warn!(card_id = id, "due card has no note");
            continue;
        };
        let model = col.model(note.model_id);
        let field = |name: &str| {
            model
                .and_then(|m| m.field_index(name))
                .and_then(|i| note.fields.get(i))
                .cloned()
                .unwrap_or_default()
        };
        let (mut front, mut back) = (field("Front"), field("Back"));
        if front.is_empty() && back.is_empty() {
            front = note.fields.first().cloned().unwrap_or_default();
            back = note.fields.get(1).cloned().unwrap_or_default();
        }
        cards.push(json!({
            "cardId": card.id,
            "front": front,
            "back": back,
            "deckName": col.deck(card.deck_id).map_or("Unknown", |d| d.name.as_str()),
            "modelName": model.map_or("Unknown", |m| m.name.as_str()),
            "due": card.due,
            "interval": card.interval,
            "factor": card.factor,
        }));
    }

    Ok(json!({
        "success": true,
        "total": ids.len(),
        "returned": cards.len(),
        "message": format!("Found {} due cards, returning {}", ids.len(), cards.len()),
        "cards": cards,
    }))
}

fn card_management(col: &mut Collection, args: CardManagementArgs) -> Result<Value, OperationError> {
    if args.card_ids().is_empty() {
        return Err(OperationError::handler("card_ids is required and cannot be empty")
            .with_hint("Provide at least one card ID")
            .with_data("action", args.action()));
    }

    match args {
        CardManagementArgs::Reposition {
            card_ids,
            starting_from,
            step_size,
            randomize,
            shift_existing,
        } => {
            if starting_from < 0 {
                return Err(OperationError::handler("starting_from must be >= 0")
                    .with_hint("Use 0 or positive integers for card positions")
                    .with_data("starting_from", starting_from));
            }
            if step_size < 1 {
                return Err(OperationError::handler("step_size must be >= 1")
                    .with_hint("Use positive integers for step size (typically 1)")
                    .with_data("step_size", step_size));
            }
            let count = col
                .reposition_new_cards(&card_ids, starting_from, step_size, randomize, shift_existing)
                .map_err(|_| {
                    OperationError::handler("step_size/starting_from too large")
                        .with_hint("Use smaller values so every card position fits")
                        .with_data("starting_from", starting_from)
                })?;
            Ok(json!({
                "repositioned": count,
                "message": format!("Repositioned {count} new cards starting at position {starting_from}"),
            }))
        }
        CardManagementArgs::ChangeDeck { card_ids, deck } => {
            let deck = deck.trim();
            if deck.is_empty() {
                return Err(OperationError::handler("deck name cannot be empty")
                    .with_hint("Provide a valid deck name (e.g., 'Spanish' or 'Spanish::Verbs')"));
            }
            let (deck_id, _) = col.deck_id_or_create(deck);
            let moved = col.set_deck(&card_ids, deck_id);
            Ok(json!({
                "moved": moved,
                "deck_id": deck_id,
                "message": format!("Moved {moved} cards to deck '{deck}'"),
            }))
        }
    }
}
