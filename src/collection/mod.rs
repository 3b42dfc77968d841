//! In-memory flashcard collection: decks, note types, notes, cards and media.
//!
//! This is the host state the bridge exists to protect. It is deliberately
//! not `Sync` in spirit: every method assumes it runs on the host thread,
//! and the table's wrappers reach it through [`HostAccess`].

pub mod search;

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use rand::seq::SliceRandom;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::registry::HostAccess;
use search::{CardState, SearchError, Term};

pub type DeckId = i64;
pub type NoteId = i64;
pub type CardId = i64;
pub type ModelId = i64;

pub const DEFAULT_DECK_ID: DeckId = 1;
pub const DEFAULT_DECK: &str = "Default";
pub const MEDIA_FOLDER: &str = "collection.media";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollectionError {
    #[error("Note not found: {0}")]
    NoteNotFound(NoteId),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Deck not found: {0}")]
    DeckNotFound(String),

    #[error("unknown fields for note type \"{model}\": {}", .fields.join(", "))]
    UnknownFields { model: String, fields: Vec<String> },

    #[error("cloze note has no cloze deletions")]
    NoClozeDeletions,

    #[error("card positions overflow (start {start}, step {step})")]
    PositionOverflow { start: i64, step: i64 },

    #[error(transparent)]
    Search(#[from] SearchError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deck {
    pub id: DeckId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    /// One card per template.
    Standard { templates: u32 },
    /// One card per distinct `{{cN::...}}` deletion in the first field.
    Cloze,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteType {
    pub id: ModelId,
    pub name: String,
    pub fields: Vec<String>,
    pub kind: ModelKind,
}

impl NoteType {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub model_id: ModelId,
    /// Values in the note type's field order.
    pub fields: Vec<String>,
    pub tags: Vec<String>,
    /// Unix seconds of the last modification.
    pub modified: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardQueue {
    New,
    Learning,
    Review,
    Suspended,
    Buried,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub note_id: NoteId,
    pub deck_id: DeckId,
    pub ordinal: u32,
    pub queue: CardQueue,
    /// Position for new cards, day number otherwise.
    pub due: i64,
    pub interval: u32,
    pub factor: u32,
}

/// Per-deck counts of cards available today.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeckCounts {
    pub new: usize,
    pub learning: usize,
    pub review: usize,
    pub total: usize,
}

#[derive(Debug)]
pub struct Collection {
    open: bool,
    decks: BTreeMap<DeckId, Deck>,
    models: Vec<NoteType>,
    notes: BTreeMap<NoteId, Note>,
    cards: BTreeMap<CardId, Card>,
    media: BTreeMap<String, Vec<u8>>,
    next_id: i64,
    next_new_position: i64,
    today: i64,
    write_depth: u32,
    needs_reset: bool,
    ui_refreshes: u32,
}

impl Default for Collection {
    fn default() -> Self {
        Self::new()
    }
}

impl Collection {
    /// An open collection with the default deck and the stock note types.
    pub fn new() -> Self {
        let now = Utc::now();
        let mut decks = BTreeMap::new();
        decks.insert(
            DEFAULT_DECK_ID,
            Deck {
                id: DEFAULT_DECK_ID,
                name: DEFAULT_DECK.into(),
            },
        );
        let models = vec![
            NoteType {
                id: 1,
                name: "Basic".into(),
                fields: vec!["Front".into(), "Back".into()],
                kind: ModelKind::Standard { templates: 1 },
            },
            NoteType {
                id: 2,
                name: "Basic (and reversed card)".into(),
                fields: vec!["Front".into(), "Back".into()],
                kind: ModelKind::Standard { templates: 2 },
            },
            NoteType {
                id: 3,
                name: "Cloze".into(),
                fields: vec!["Text".into(), "Extra".into()],
                kind: ModelKind::Cloze,
            },
        ];
        Self {
            open: true,
            decks,
            models,
            notes: BTreeMap::new(),
            cards: BTreeMap::new(),
            media: BTreeMap::new(),
            next_id: now.timestamp_millis(),
            next_new_position: 1,
            today: now.timestamp().div_euclid(86_400),
            write_depth: 0,
            needs_reset: false,
            ui_refreshes: 0,
        }
    }

    fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Simulates closing or opening the profile.
    pub fn set_open(&mut self, open: bool) {
        self.open = open;
    }

    /// Day number used for due calculations.
    pub fn today(&self) -> i64 {
        self.today
    }

    pub fn set_today(&mut self, day: i64) {
        self.today = day;
    }

    /// How many times a write session ended and asked the UI to refresh.
    pub fn ui_refreshes(&self) -> u32 {
        self.ui_refreshes
    }

    pub fn write_depth(&self) -> u32 {
        self.write_depth
    }

    // ---------------------------------------------------------------------
    // decks
    // ---------------------------------------------------------------------

    pub fn decks(&self) -> impl Iterator<Item = &Deck> {
        self.decks.values()
    }

    pub fn deck(&self, id: DeckId) -> Option<&Deck> {
        self.decks.get(&id)
    }

    pub fn deck_by_name(&self, name: &str) -> Option<&Deck> {
        self.decks.values().find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Id of `name`, creating it (and any missing parents) if needed.
    /// The flag is `true` when the deck itself was created.
    pub fn deck_id_or_create(&mut self, name: &str) -> (DeckId, bool) {
        if let Some(deck) = self.deck_by_name(name) {
            return (deck.id, false);
        }
        let parts: Vec<&str> = name.split("::").collect();
        for depth in 1..parts.len() {
            let parent = parts[..depth].join("::");
            if self.deck_by_name(&parent).is_none() {
                self.insert_deck(parent);
            }
        }
        (self.insert_deck(name.to_owned()), true)
    }

    fn insert_deck(&mut self, name: String) -> DeckId {
        let id = self.allocate_id();
        debug!(deck = %name, id, "deck created");
        self.decks.insert(id, Deck { id, name });
        id
    }

    /// Counts for `deck_id` and its children.
    pub fn deck_counts(&self, deck_id: DeckId) -> DeckCounts {
        let Some(deck) = self.decks.get(&deck_id) else {
            return DeckCounts::default();
        };
        let prefix = format!("{}::", deck.name);
        let in_tree: BTreeSet<DeckId> = self
            .decks
            .values()
            .filter(|d| d.id == deck_id || d.name.starts_with(&prefix))
            .map(|d| d.id)
            .collect();

        let mut counts = DeckCounts::default();
        for card in self.cards.values().filter(|c| in_tree.contains(&c.deck_id)) {
            counts.total += 1;
            match card.queue {
                CardQueue::New => counts.new += 1,
                CardQueue::Learning if card.due <= self.today => counts.learning += 1,
                CardQueue::Review if card.due <= self.today => counts.review += 1,
                _ => {}
            }
        }
        counts
    }

    // ---------------------------------------------------------------------
    // note types
    // ---------------------------------------------------------------------

    pub fn models(&self) -> &[NoteType] {
        &self.models
    }

    pub fn model(&self, id: ModelId) -> Option<&NoteType> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn model_by_name(&self, name: &str) -> Option<&NoteType> {
        self.models.iter().find(|m| m.name == name)
    }

    // ---------------------------------------------------------------------
    // notes and cards
    // ---------------------------------------------------------------------

    pub fn note(&self, id: NoteId) -> Option<&Note> {
        self.notes.get(&id)
    }

    pub fn note_count(&self) -> usize {
        self.notes.len()
    }

    pub fn card(&self, id: CardId) -> Option<&Card> {
        self.cards.get(&id)
    }

    /// All cards, in id order.
    pub fn cards(&self) -> impl Iterator<Item = &Card> {
        self.cards.values()
    }

    pub fn card_mut(&mut self, id: CardId) -> Option<&mut Card> {
        self.cards.get_mut(&id)
    }

    pub fn cards_of_note(&self, note_id: NoteId) -> Vec<&Card> {
        self.cards.values().filter(|c| c.note_id == note_id).collect()
    }

    /// Whether a note of `model_id` already has `first_field` as its first field.
    pub fn is_duplicate(&self, model_id: ModelId, first_field: &str) -> bool {
        let needle = first_field.trim();
        self.notes.values().any(|n| {
            n.model_id == model_id && n.fields.first().is_some_and(|f| f.trim() == needle)
        })
    }

    /// Create a note and its cards. `fields` must be in the note type's order.
    pub fn add_note(
        &mut self,
        deck_id: DeckId,
        model_id: ModelId,
        fields: Vec<String>,
        tags: Vec<String>,
    ) -> Result<NoteId, CollectionError> {
        let model = self
            .model(model_id)
            .ok_or_else(|| CollectionError::ModelNotFound(model_id.to_string()))?;
        if !self.decks.contains_key(&deck_id) {
            return Err(CollectionError::DeckNotFound(deck_id.to_string()));
        }
        let ordinals: Vec<u32> = match model.kind {
            ModelKind::Standard { templates } => (0..templates).collect(),
            ModelKind::Cloze => {
                let ords = cloze_ordinals(fields.first().map(String::as_str).unwrap_or(""));
                if ords.is_empty() {
                    return Err(CollectionError::NoClozeDeletions);
                }
                ords
            }
        };

        let note_id = self.allocate_id();
        self.notes.insert(
            note_id,
            Note {
                id: note_id,
                model_id,
                fields,
                tags,
                modified: Utc::now().timestamp(),
            },
        );
        for ordinal in ordinals {
            let card_id = self.allocate_id();
            let due = self.next_new_position;
            self.next_new_position += 1;
            self.cards.insert(
                card_id,
                Card {
                    id: card_id,
                    note_id,
                    deck_id,
                    ordinal,
                    queue: CardQueue::New,
                    due,
                    interval: 0,
                    factor: 0,
                },
            );
        }
        debug!(note_id, deck_id, "note added");
        Ok(note_id)
    }

    /// Overwrite the named fields of a note.
    pub fn update_note_fields(
        &mut self,
        note_id: NoteId,
        updates: &BTreeMap<String, String>,
    ) -> Result<(), CollectionError> {
        let note = self
            .notes
            .get(&note_id)
            .ok_or(CollectionError::NoteNotFound(note_id))?;
        let model = self
            .model(note.model_id)
            .ok_or_else(|| CollectionError::ModelNotFound(note.model_id.to_string()))?;

        let unknown: Vec<String> = updates
            .keys()
            .filter(|k| model.field_index(k).is_none())
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(CollectionError::UnknownFields {
                model: model.name.clone(),
                fields: unknown,
            });
        }
        let positions: Vec<(usize, String)> = updates
            .iter()
            .filter_map(|(k, v)| model.field_index(k).map(|i| (i, v.clone())))
            .collect();

        if let Some(note) = self.notes.get_mut(&note_id) {
            for (index, value) in positions {
                if let Some(slot) = note.fields.get_mut(index) {
                    *slot = value;
                }
            }
            note.modified = Utc::now().timestamp();
        }
        Ok(())
    }

    /// Delete notes and their cards. Returns how many cards went with them.
    pub fn remove_notes(&mut self, ids: &[NoteId]) -> usize {
        let doomed: BTreeSet<NoteId> = ids.iter().copied().collect();
        self.notes.retain(|id, _| !doomed.contains(id));
        let before = self.cards.len();
        self.cards.retain(|_, c| !doomed.contains(&c.note_id));
        before - self.cards.len()
    }

    /// Move cards to `deck_id`. Returns how many existed.
    pub fn set_deck(&mut self, card_ids: &[CardId], deck_id: DeckId) -> usize {
        let mut moved = 0;
        for id in card_ids {
            if let Some(card) = self.cards.get_mut(id) {
                card.deck_id = deck_id;
                moved += 1;
            }
        }
        moved
    }

    /// Assign new-queue positions `start, start+step, ...` to the given new
    /// cards. With `shift_existing`, other new cards at or after `start` move
    /// back to make room. Returns how many cards were repositioned.
    pub fn reposition_new_cards(
        &mut self,
        card_ids: &[CardId],
        start: i64,
        step: i64,
        randomize: bool,
        shift_existing: bool,
    ) -> Result<usize, CollectionError> {
        let mut seen = BTreeSet::new();
        let mut targets: Vec<CardId> = card_ids
            .iter()
            .copied()
            .filter(|id| self.cards.get(id).is_some_and(|c| c.queue == CardQueue::New))
            .filter(|id| seen.insert(*id))
            .collect();
        if randomize {
            targets.shuffle(&mut rand::rng());
        }
        let count = targets.len();
        if count == 0 {
            return Ok(0);
        }

        // every position is computed before any card is touched
        let overflow = CollectionError::PositionOverflow { start, step };
        let offset = |n: usize| {
            i64::try_from(n)
                .ok()
                .and_then(|n| step.checked_mul(n))
        };
        let positions = (0..count)
            .map(|i| offset(i).and_then(|o| start.checked_add(o)))
            .collect::<Option<Vec<i64>>>()
            .ok_or_else(|| overflow.clone())?;
        let next_position = positions
            .last()
            .and_then(|last| last.checked_add(1))
            .ok_or_else(|| overflow.clone())?;

        let shifted = if shift_existing {
            let shift = offset(count).ok_or_else(|| overflow.clone())?;
            let moving: BTreeSet<CardId> = targets.iter().copied().collect();
            self.cards
                .values()
                .filter(|c| c.queue == CardQueue::New && c.due >= start && !moving.contains(&c.id))
                .map(|c| c.due.checked_add(shift).map(|due| (c.id, due)))
                .collect::<Option<Vec<(CardId, i64)>>>()
                .ok_or(overflow)?
        } else {
            Vec::new()
        };

        for (id, due) in shifted.into_iter().chain(targets.into_iter().zip(positions)) {
            if let Some(card) = self.cards.get_mut(&id) {
                card.due = due;
            }
        }
        self.next_new_position = self.next_new_position.max(next_position);
        Ok(count)
    }

    // ---------------------------------------------------------------------
    // search
    // ---------------------------------------------------------------------

    /// Note ids matching `query`, ascending.
    pub fn find_notes(&self, query: &str) -> Result<Vec<NoteId>, CollectionError> {
        let terms = search::parse(query)?;
        Ok(self
            .notes
            .values()
            .filter(|note| {
                let cards = self.cards_of_note(note.id);
                if terms.iter().any(Term::is_card_term) {
                    cards.iter().any(|card| self.matches_all(&terms, note, Some(card)))
                } else {
                    self.matches_all(&terms, note, None)
                }
            })
            .map(|note| note.id)
            .collect())
    }

    /// Card ids matching `query`, ascending.
    pub fn find_cards(&self, query: &str) -> Result<Vec<CardId>, CollectionError> {
        let terms = search::parse(query)?;
        Ok(self
            .cards
            .values()
            .filter(|card| {
                self.notes
                    .get(&card.note_id)
                    .is_some_and(|note| self.matches_all(&terms, note, Some(card)))
            })
            .map(|card| card.id)
            .collect())
    }

    fn matches_all(&self, terms: &[Term], note: &Note, card: Option<&Card>) -> bool {
        terms.iter().all(|t| self.matches(t, note, card))
    }

    fn matches(&self, term: &Term, note: &Note, card: Option<&Card>) -> bool {
        match term {
            Term::Not(inner) => !self.matches(inner, note, card),
            Term::Text(re) => note.fields.iter().any(|f| re.is_match(f)),
            Term::Tag(re) => note.tags.iter().any(|t| re.is_match(t)),
            Term::NoteType(re) => self.model(note.model_id).is_some_and(|m| re.is_match(&m.name)),
            Term::Field { name, value } => self.model(note.model_id).is_some_and(|m| {
                m.fields
                    .iter()
                    .position(|f| f.eq_ignore_ascii_case(name))
                    .and_then(|i| note.fields.get(i))
                    .is_some_and(|v| value.is_match(v))
            }),
            Term::Deck(re) => card.is_some_and(|c| self.deck_matches(re, c.deck_id)),
            Term::Is(state) => card.is_some_and(|c| self.state_matches(*state, c)),
        }
    }

    /// A deck pattern also matches every child of a matching deck.
    fn deck_matches(&self, re: &Regex, deck_id: DeckId) -> bool {
        let Some(deck) = self.decks.get(&deck_id) else {
            return false;
        };
        let parts: Vec<&str> = deck.name.split("::").collect();
        (1..=parts.len()).any(|depth| re.is_match(&parts[..depth].join("::")))
    }

    fn state_matches(&self, state: CardState, card: &Card) -> bool {
        match state {
            CardState::New => card.queue == CardQueue::New,
            CardState::Learn => card.queue == CardQueue::Learning,
            CardState::Review => matches!(card.queue, CardQueue::Review | CardQueue::Learning),
            CardState::Due => {
                matches!(card.queue, CardQueue::Review | CardQueue::Learning) && card.due <= self.today
            }
            CardState::Suspended => card.queue == CardQueue::Suspended,
            CardState::Buried => card.queue == CardQueue::Buried,
        }
    }

    // ---------------------------------------------------------------------
    // media
    // ---------------------------------------------------------------------

    pub fn media_names(&self) -> impl Iterator<Item = &str> {
        self.media.keys().map(String::as_str)
    }

    pub fn media_data(&self, name: &str) -> Option<&[u8]> {
        self.media.get(name).map(Vec::as_slice)
    }

    /// Store `data` as `name`. Without `replace`, an existing file with
    /// different content makes the new file land under a numbered name.
    /// Returns the name actually used.
    pub fn write_media(&mut self, name: &str, data: Vec<u8>, replace: bool) -> String {
        let actual = match self.media.get(name) {
            Some(existing) if !replace && *existing != data => self.free_media_name(name),
            _ => name.to_owned(),
        };
        self.media.insert(actual.clone(), data);
        actual
    }

    fn free_media_name(&self, name: &str) -> String {
        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
            _ => (name, String::new()),
        };
        (1..)
            .map(|n| format!("{stem}-{n}{ext}"))
            .find(|candidate| !self.media.contains_key(candidate))
            .unwrap_or_else(|| name.to_owned())
    }

    pub fn remove_media(&mut self, name: &str) -> bool {
        self.media.remove(name).is_some()
    }
}

impl HostAccess for Collection {
    fn collection_open(&self) -> bool {
        self.open
    }

    fn begin_write(&mut self, operation: &str) {
        self.write_depth += 1;
        self.needs_reset = true;
        debug!(operation, depth = self.write_depth, "write session started");
    }

    fn end_write(&mut self, operation: &str) {
        self.write_depth = self.write_depth.saturating_sub(1);
        if self.write_depth == 0 && self.needs_reset {
            self.needs_reset = false;
            self.ui_refreshes += 1;
        }
        debug!(operation, depth = self.write_depth, "write session ended");
    }
}

/// Distinct zero-based ordinals of `{{cN::...}}` deletions, ascending.
pub fn cloze_ordinals(text: &str) -> Vec<u32> {
    let mut ords = BTreeSet::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{c") {
        rest = &rest[start + 3..];
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        if !digits.is_empty() && rest[digits.len()..].starts_with("::") {
            if let Ok(n) = digits.parse::<u32>() {
                if n > 0 {
                    ords.insert(n - 1);
                }
            }
        }
    }
    ords.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(col: &mut Collection, deck: &str, front: &str, back: &str, tags: &[&str]) -> NoteId {
        let (deck_id, _) = col.deck_id_or_create(deck);
        col.add_note(
            deck_id,
            1,
            vec![front.into(), back.into()],
            tags.iter().map(|t| t.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn new_collection_has_default_deck_and_stock_types() {
        let col = Collection::new();
        assert!(col.is_open());
        assert_eq!(col.deck(DEFAULT_DECK_ID).unwrap().name, "Default");
        let names: Vec<&str> = col.models().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Basic", "Basic (and reversed card)", "Cloze"]);
    }

    #[test]
    fn creating_child_deck_creates_parent() {
        let mut col = Collection::new();
        let (_, created) = col.deck_id_or_create("Japanese::Tokyo");
        assert!(created);
        assert!(col.deck_by_name("Japanese").is_some());
        let (_, again) = col.deck_id_or_create("japanese::tokyo");
        assert!(!again);
    }

    #[test]
    fn card_count_follows_note_type() {
        let mut col = Collection::new();
        let reversed = col
            .add_note(DEFAULT_DECK_ID, 2, vec!["a".into(), "b".into()], vec![])
            .unwrap();
        assert_eq!(col.cards_of_note(reversed).len(), 2);

        let cloze = col
            .add_note(
                DEFAULT_DECK_ID,
                3,
                vec!["{{c1::Paris}} is in {{c2::France}}, {{c1::yes}}".into(), String::new()],
                vec![],
            )
            .unwrap();
        assert_eq!(col.cards_of_note(cloze).len(), 2);

        assert_eq!(
            col.add_note(DEFAULT_DECK_ID, 3, vec!["plain".into(), String::new()], vec![]),
            Err(CollectionError::NoClozeDeletions)
        );
    }

    #[test]
    fn search_combines_terms() {
        let mut col = Collection::new();
        let hola = basic(&mut col, "Spanish::Verbs", "hola", "hello", &["greeting"]);
        let gato = basic(&mut col, "Spanish", "gato", "cat", &["animal"]);
        let chat = basic(&mut col, "French", "chat", "cat", &["animal"]);

        assert_eq!(col.find_notes("deck:Spanish").unwrap(), vec![hola, gato]);
        assert_eq!(col.find_notes("tag:animal -deck:French").unwrap(), vec![gato]);
        assert_eq!(col.find_notes("back:cat").unwrap(), vec![gato, chat]);
        assert_eq!(col.find_notes("HELL").unwrap(), vec![hola]);
        assert_eq!(col.find_notes("\"deck:Spanish::Verbs\"").unwrap(), vec![hola]);
        assert_eq!(col.find_notes("").unwrap().len(), 3);
        assert!(col.find_notes("is:bogus").is_err());
    }

    #[test]
    fn due_search_respects_today() {
        let mut col = Collection::new();
        col.set_today(100);
        let note = basic(&mut col, "Default", "q", "a", &[]);
        let card_id = col.cards_of_note(note)[0].id;
        assert!(col.find_cards("is:due").unwrap().is_empty());

        let card = col.card_mut(card_id).unwrap();
        card.queue = CardQueue::Review;
        card.due = 101;
        assert!(col.find_cards("is:due").unwrap().is_empty());
        col.set_today(101);
        assert_eq!(col.find_cards("is:due").unwrap(), vec![card_id]);
        assert_eq!(col.deck_counts(DEFAULT_DECK_ID).review, 1);
    }

    #[test]
    fn reposition_and_shift() {
        let mut col = Collection::new();
        let ids: Vec<CardId> = (0..3)
            .map(|i| {
                let n = basic(&mut col, "Default", &format!("q{i}"), "a", &[]);
                col.cards_of_note(n)[0].id
            })
            .collect();
        // positions 1, 2, 3; move the last one to the front
        assert_eq!(col.reposition_new_cards(&ids[2..], 1, 1, false, true).unwrap(), 1);
        assert_eq!(col.card(ids[2]).unwrap().due, 1);
        assert_eq!(col.card(ids[0]).unwrap().due, 2);
        assert_eq!(col.card(ids[1]).unwrap().due, 3);
    }

    #[test]
    fn reposition_overflow_leaves_cards_untouched() {
        let mut col = Collection::new();
        let ids: Vec<CardId> = (0..2)
            .map(|i| {
                let n = basic(&mut col, "Default", &format!("q{i}"), "a", &[]);
                col.cards_of_note(n)[0].id
            })
            .collect();
        let before: Vec<i64> = ids.iter().map(|id| col.card(*id).unwrap().due).collect();

        let err = col.reposition_new_cards(&ids, 1, i64::MAX, false, false).unwrap_err();
        assert_eq!(err, CollectionError::PositionOverflow { start: 1, step: i64::MAX });
        let err = col.reposition_new_cards(&ids[..1], i64::MAX, 1, false, true).unwrap_err();
        assert!(matches!(err, CollectionError::PositionOverflow { .. }));

        let after: Vec<i64> = ids.iter().map(|id| col.card(*id).unwrap().due).collect();
        assert_eq!(after, before);
    }

    #[test]
    fn update_rejects_unknown_fields() {
        let mut col = Collection::new();
        let note = basic(&mut col, "Default", "q", "a", &[]);
        let mut updates = BTreeMap::new();
        updates.insert("Back".to_string(), "answer".to_string());
        col.update_note_fields(note, &updates).unwrap();
        assert_eq!(col.note(note).unwrap().fields[1], "answer");

        updates.insert("Nope".to_string(), "x".to_string());
        let err = col.update_note_fields(note, &updates).unwrap_err();
        assert_eq!(err.to_string(), "unknown fields for note type \"Basic\": Nope");
        assert_eq!(
            col.update_note_fields(42, &updates).unwrap_err(),
            CollectionError::NoteNotFound(42)
        );
    }

    #[test]
    fn media_names_do_not_clobber_without_replace() {
        let mut col = Collection::new();
        assert_eq!(col.write_media("a.png", vec![1], true), "a.png");
        assert_eq!(col.write_media("a.png", vec![1], false), "a.png");
        assert_eq!(col.write_media("a.png", vec![2], false), "a-1.png");
        assert_eq!(col.write_media("a.png", vec![3], true), "a.png");
        assert_eq!(col.media_data("a.png"), Some(&[3u8][..]));
        assert!(col.remove_media("a-1.png"));
        assert!(!col.remove_media("a-1.png"));
    }

    #[test]
    fn nested_write_sessions_refresh_once() {
        let mut col = Collection::new();
        col.begin_write("outer");
        col.begin_write("inner");
        col.end_write("inner");
        assert_eq!(col.ui_refreshes(), 0);
        col.end_write("outer");
        assert_eq!(col.ui_refreshes(), 1);
        assert_eq!(col.write_depth(), 0);
    }

    #[test]
    fn cloze_ordinals_are_distinct() {
        assert_eq!(cloze_ordinals("{{c2::b}} {{c1::a}} {{c2::c}}"), vec![0, 1]);
        assert!(cloze_ordinals("{{c::x}} {{c0::y}}").is_empty());
    }
}
