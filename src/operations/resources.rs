//! Read-only documents published through `resources/read`.
//!
//! They run on the host thread like tools, but never write and are listed
//! by URI rather than by name.

use serde_json::{Value, json};

use crate::collection::{CardQueue, Collection, MEDIA_FOLDER};
use crate::registry::{NoArguments, OperationError, OperationSpec, OperationTableBuilder};

pub const SYSTEM_INFO_URI: &str = "anki://system-info";
pub const QUERY_SYNTAX_URI: &str = "anki://query-syntax";
pub const SCHEMA_URI: &str = "anki://schema";
pub const STATS_COLLECTION_URI: &str = "anki://stats/collection";
pub const STATS_FORECAST_URI: &str = "anki://stats/forecast";

/// Days covered by the review forecast, today included.
pub const FORECAST_DAYS: i64 = 30;
/// Interval (days) from which a review card counts as mature.
pub const MATURE_INTERVAL: u32 = 21;

pub fn register(builder: &mut OperationTableBuilder<Collection>) {
    builder
        .register(
            OperationSpec::new(
                "system_info",
                "Server and collection information: version, platform, scheduler day and entity counts.",
                system_info,
            )
            .resource(SYSTEM_INFO_URI, "System Information"),
        )
        .register(
            OperationSpec::new(
                "query_syntax",
                "Search syntax accepted by findNotes and get_due_cards, with examples.",
                query_syntax,
            )
            .without_collection()
            .resource(QUERY_SYNTAX_URI, "Search Query Syntax"),
        )
        .register(
            OperationSpec::new(
                "schema",
                "Data model documentation: decks, note types, notes, cards and media.",
                schema,
            )
            .without_collection()
            .resource(SCHEMA_URI, "Data Model Schema"),
        )
        .register(
            OperationSpec::new(
                "stats_collection",
                "Collection totals with a breakdown of cards by state and maturity.",
                stats_collection,
            )
            .resource(STATS_COLLECTION_URI, "Collection Statistics"),
        )
        .register(
            OperationSpec::new(
                "stats_forecast",
                "Review forecast: cards falling due on each of the next 30 days.",
                stats_forecast,
            )
            .resource(STATS_FORECAST_URI, "30-Day Review Forecast"),
        );
}

fn system_info(col: &mut Collection, _: NoArguments) -> Result<Value, OperationError> {
    Ok(json!({
        "server_name": crate::server::SERVER_NAME,
        "server_version": env!("CARGO_PKG_VERSION"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "collection_open": col.is_open(),
        "scheduler_day": col.today(),
        "media_folder": MEDIA_FOLDER,
        "decks": col.decks().count(),
        "note_types": col.models().len(),
        "notes": col.note_count(),
        "cards": col.cards().count(),
    }))
}

fn syntax(example: &str, description: &str) -> Value {
    json!({ "example": example, "description": description })
}

fn query_syntax(_: &mut Collection, _: NoArguments) -> Result<Value, OperationError> {
    Ok(json!({
        "basic_searches": {
            "description": "Search for text anywhere in a note",
            "syntax": {
                "text": syntax("dog", "Notes with 'dog' in any field"),
                "exact_phrase": syntax("\"a dog\"", "Quote phrases that contain spaces"),
                "wildcards": syntax("d_g, do*", "_ matches one character, * matches any run"),
            },
        },
        "field_searches": {
            "description": "Search within one field",
            "syntax": {
                "field:value": syntax("front:dog", "The whole 'Front' field is 'dog'"),
                "field:*value*": syntax("front:*dog*", "'dog' anywhere in the 'Front' field"),
            },
        },
        "deck_and_tag": {
            "description": "Filter by deck or tag",
            "syntax": {
                "deck:NAME": syntax("deck:Spanish", "Cards in 'Spanish' and its child decks"),
                "deck:NAME::CHILD": syntax("deck:Spanish::Verbs", "Cards in a child deck"),
                "deck:*": syntax("deck:Span*", "Wildcards work in deck names"),
                "\"deck:name with spaces\"": syntax("\"deck:My Deck\"", "Quote names with spaces"),
                "tag:NAME": syntax("tag:verb", "Notes tagged 'verb'"),
                "tag:*": syntax("tag:vocab*", "Notes with a tag starting with 'vocab'"),
                "note:TYPE": syntax("note:Cloze", "Notes of one note type"),
            },
        },
        "card_state": {
            "description": "Filter by card state",
            "syntax": {
                "is:due": syntax("is:due", "Review and learning cards due today or earlier"),
                "is:new": syntax("is:new", "Cards never studied"),
                "is:learn": syntax("is:learn", "Cards in learning"),
                "is:review": syntax("is:review", "Review and learning cards"),
                "is:suspended": syntax("is:suspended", "Suspended cards"),
                "is:buried": syntax("is:buried", "Buried cards"),
            },
        },
        "combining": {
            "description": "Terms separated by spaces must all match; case never matters",
            "syntax": {
                "AND (implicit)": syntax("deck:Spanish tag:verb", "Both terms must match"),
                "NOT (-)": syntax("-tag:easy", "Prefix a term with - to exclude matches"),
            },
        },
        "examples": [
            { "query": "deck:Spanish is:due", "description": "Due cards in the Spanish deck tree" },
            { "query": "tag:verb -is:suspended", "description": "Verb notes with a card that is not suspended" },
            { "query": "note:Cloze deck:Biology", "description": "Cloze notes in Biology" },
            { "query": "\"deck:My Deck\" back:*river*", "description": "'river' in the Back field of a deck with spaces" },
        ],
    }))
}

fn schema(_: &mut Collection, _: NoArguments) -> Result<Value, OperationError> {
    Ok(json!({
        "entities": {
            "deck": {
                "description": "Container for cards. '::' nests decks, at most two levels deep.",
                "fields": {
                    "id": "Deck id; 1 is the Default deck",
                    "name": "Full name, e.g. 'Spanish::Verbs'",
                },
            },
            "note_type": {
                "description": "Defines a note's fields and which cards it generates.",
                "fields": {
                    "id": "Note type id",
                    "name": "e.g. 'Basic', 'Basic (and reversed card)', 'Cloze'",
                    "fields": "Ordered field names",
                    "templates": "Card templates; a Cloze type makes one card per deletion",
                },
            },
            "note": {
                "description": "One unit of knowledge. Generates one or more cards.",
                "fields": {
                    "id": "Note id (millisecond timestamp)",
                    "model_id": "Note type id",
                    "fields": "Field values, in note type order",
                    "tags": "Tag list",
                    "mod": "Last modification, seconds since epoch",
                },
            },
            "card": {
                "description": "One reviewable prompt generated from a note.",
                "fields": {
                    "id": "Card id",
                    "note_id": "Owning note",
                    "deck_id": "Deck holding the card",
                    "ord": "Template or cloze ordinal, 0-based",
                    "queue": "new, learning, review, suspended or buried",
                    "due": "New cards: queue position. Others: scheduler day number",
                    "interval": "Days between reviews",
                    "factor": "Ease in permille, e.g. 2500 = 250%",
                },
            },
            "media": {
                "description": format!("Files referenced from fields, kept in '{MEDIA_FOLDER}'."),
            },
        },
        "concepts": {
            "note_vs_card": "Edit notes; review cards. Deleting a note deletes its cards.",
            "due": "A review card is due when its due day is on or before the scheduler day.",
            "positions": "New cards are studied in ascending position order; card_management can reposition them.",
        },
    }))
}

fn stats_collection(col: &mut Collection, _: NoArguments) -> Result<Value, OperationError> {
    let mut by_queue = [0usize; 5];
    let (mut mature, mut young, mut ease_sum, mut ease_count) = (0usize, 0usize, 0u64, 0u64);
    for card in col.cards() {
        by_queue[queue_slot(card.queue)] += 1;
        if card.queue == CardQueue::Review {
            if card.interval >= MATURE_INTERVAL {
                mature += 1;
            } else {
                young += 1;
            }
            ease_sum += u64::from(card.factor);
            ease_count += 1;
        }
    }
    let average_ease = if ease_count == 0 {
        Value::Null
    } else {
        // permille -> ratio, two decimals
        json!((ease_sum as f64 / ease_count as f64 / 10.0).round() / 100.0)
    };

    Ok(json!({
        "total_notes": col.note_count(),
        "total_cards": col.cards().count(),
        "total_decks": col.decks().count(),
        "total_models": col.models().len(),
        "cards_by_state": {
            "new": by_queue[0],
            "learning": by_queue[1],
            "review": by_queue[2],
            "suspended": by_queue[3],
            "buried": by_queue[4],
        },
        "mature_cards": mature,
        "young_cards": young,
        "average_ease": average_ease,
    }))
}

fn queue_slot(queue: CardQueue) -> usize {
    match queue {
        CardQueue::New => 0,
        CardQueue::Learning => 1,
        CardQueue::Review => 2,
        CardQueue::Suspended => 3,
        CardQueue::Buried => 4,
    }
}

fn stats_forecast(col: &mut Collection, _: NoArguments) -> Result<Value, OperationError> {
    let today = col.today();
    let mut per_day = vec![0usize; FORECAST_DAYS as usize];
    for card in col.cards() {
        if !matches!(card.queue, CardQueue::Review | CardQueue::Learning) {
            continue;
        }
        // overdue cards land on day 0
        let offset = card.due.saturating_sub(today).max(0);
        if offset < FORECAST_DAYS {
            per_day[offset as usize] += 1;
        }
    }

    let total: usize = per_day.iter().sum();
    let (peak_day, peak_due) = per_day
        .iter()
        .enumerate()
        .fold((0, 0), |best, (day, &due)| if due > best.1 { (day, due) } else { best });
    let forecast: Vec<Value> = per_day
        .iter()
        .enumerate()
        .map(|(day, due)| json!({ "day": day, "due": due }))
        .collect();

    Ok(json!({
        "forecast": forecast,
        "total_due": total,
        "peak_day": { "day": peak_day, "due": peak_due },
        "average_per_day": ((total as f64 / FORECAST_DAYS as f64) * 100.0).round() / 100.0,
        "generated_at": chrono::Utc::now().to_rfc3339(),
    }))
}
