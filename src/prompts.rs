//! Prompt templates served through `prompts/*`.
//!
//! Prompts only render text, so they are answered on the server thread and
//! never cross the bridge.

use bridge_protocol::message::{PromptArgument, PromptDescriptor, PromptGetResult};
use serde_json::{Map, Value};
use thiserror::Error;

pub const DEFAULT_REVIEW_DECK: &str = "Default";
pub const DEFAULT_REVIEW_LIMIT: u32 = 20;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("unknown prompt: {0}")]
    Unknown(String),

    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: String, reason: String },
}

type Render = fn(&Map<String, Value>) -> Result<String, PromptError>;

struct Prompt {
    name: &'static str,
    title: &'static str,
    description: &'static str,
    arguments: &'static [(&'static str, &'static str)],
    render: Render,
}

/// The fixed prompt set, in listing order.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptSet;

const PROMPTS: &[Prompt] = &[
    Prompt {
        name: "twenty_rules",
        title: "Twenty Rules of Formulating Knowledge",
        description: "Twenty rules of formulating knowledge for writing effective flashcards, \
                      based on Piotr Wozniak's SuperMemo research.",
        arguments: &[],
        render: twenty_rules,
    },
    Prompt {
        name: "review_session",
        title: "Review Session",
        description: "Guides a review session: fetch due cards, quiz the user one card at a \
                      time, and summarise how it went.",
        arguments: &[
            ("deck_name", "Deck to review (default: Default)"),
            ("card_limit", "Maximum number of cards to review (default: 20)"),
            ("review_style", "interactive, quick or voice (default: interactive)"),
        ],
        render: review_session,
    },
];

impl PromptSet {
    pub fn list(&self) -> Vec<PromptDescriptor> {
        PROMPTS
            .iter()
            .map(|p| PromptDescriptor {
                name: p.name.to_owned(),
                title: Some(p.title.to_owned()),
                description: p.description.to_owned(),
                arguments: p
                    .arguments
                    .iter()
                    .map(|(name, description)| PromptArgument {
                        name: (*name).to_owned(),
                        description: (*description).to_owned(),
                        required: false,
                    })
                    .collect(),
            })
            .collect()
    }

    pub fn get(&self, name: &str, arguments: &Map<String, Value>) -> Result<PromptGetResult, PromptError> {
        let prompt = PROMPTS
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| PromptError::Unknown(name.to_owned()))?;
        let text = (prompt.render)(arguments)?;
        Ok(PromptGetResult::user_text(prompt.description, text))
    }
}

/// String form of an argument; numbers and booleans are accepted as-is.
fn argument(arguments: &Map<String, Value>, name: &str) -> Option<String> {
    match arguments.get(name)? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_owned()),
        other => Some(other.to_string()),
    }
}

const TWENTY_RULES: &[(&str, &str)] = &[
    ("Do not learn if you do not understand", "Make sure the material makes sense before turning it into cards."),
    ("Learn before you memorize", "Build the overall picture first; cards come after."),
    ("Build upon the basics", "Simple foundations are cheap to keep and make the details stick."),
    ("Stick to the minimum information principle", "One fact per card, worded as simply as possible."),
    ("Cloze deletion is easy and effective", "Turn a sentence into a card by hiding the key word: {{c1::answer}}."),
    ("Use imagery", "A picture is often worth many words."),
    ("Use mnemonic techniques", "Memorable associations help with hard items."),
    ("Graphic deletion is as good as cloze deletion", "Hide part of a diagram instead of part of a sentence."),
    ("Avoid sets", "Sets of unordered items are very hard to remember; split them up."),
    ("Avoid enumerations", "Break long lists into overlapping cloze deletions."),
    ("Combat interference", "Make similar items clearly distinguishable."),
    ("Optimize wording", "Shorter, sharper questions are faster to review."),
    ("Refer to other memories", "Link new items to what the learner already knows."),
    ("Personalize and provide examples", "Personal context makes items easier to recall."),
    ("Rely on emotional states", "Vivid or emotional examples are remembered better."),
    ("Context cues simplify wording", "Prefix cards with a short context such as 'chem:'."),
    ("Redundancy does not contradict minimum information", "Asking the same fact from two sides is fine."),
    ("Provide sources", "Record where a fact came from so it can be checked."),
    ("Provide date stamping", "Mark facts that may go out of date."),
    ("Prioritize", "Learn what matters most first."),
];

fn twenty_rules(_: &Map<String, Value>) -> Result<String, PromptError> {
    let mut text = String::from(
        "You are helping the user write high-quality flashcards. Apply these twenty rules \
         of formulating knowledge to every card you propose:\n\n",
    );
    for (i, (rule, detail)) in TWENTY_RULES.iter().enumerate() {
        text.push_str(&format!("{}. {rule}. {detail}\n", i + 1));
    }
    text.push_str(
        "\nWORKFLOW:\n\
         1. Ask what the user wants to learn and check that they understand it.\n\
         2. Use list_decks and modelNames to pick a deck and note type; create_deck if needed.\n\
         3. Draft cards following the rules above and show them to the user before adding.\n\
         4. Add approved cards with addNote (use the Cloze type for cloze deletions).\n\
         5. Use findNotes to avoid duplicating cards that already exist.\n",
    );
    Ok(text)
}

fn review_session(arguments: &Map<String, Value>) -> Result<String, PromptError> {
    let deck = argument(arguments, "deck_name").unwrap_or_else(|| DEFAULT_REVIEW_DECK.to_owned());
    let limit = match argument(arguments, "card_limit") {
        None => DEFAULT_REVIEW_LIMIT,
        Some(raw) => raw
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| PromptError::InvalidArgument {
                name: "card_limit".into(),
                reason: format!("expected a positive integer, got {raw}"),
            })?,
    };
    let style = argument(arguments, "review_style").unwrap_or_else(|| "interactive".to_owned());

    let style_instructions = match style.as_str() {
        "quick" => {
            "QUICK REVIEW MODE:\n\
             - Present cards rapidly with minimal discussion\n\
             - Show the question, wait for the user's signal, show the answer\n\
             - Let the user self-assess (Again/Hard/Good/Easy) and move on"
        }
        "voice" => {
            "VOICE REVIEW MODE:\n\
             - The user cannot see the screen; read each question aloud\n\
             - Skip cards whose text refers to images or audio\n\
             - Read the answer after the user responds and judge their recall"
        }
        _ => {
            "INTERACTIVE REVIEW MODE:\n\
             - Present each question and wait for the user's answer\n\
             - Reveal the answer, then discuss anything they struggled with\n\
             - Offer mnemonics or explanations when they help"
        }
    };

    Ok(format!(
        "You are helping the user conduct a flashcard review session.\n\n\
         SESSION PARAMETERS:\n\
         - Deck: \"{deck}\"\n\
         - Cards to review: up to {limit}\n\
         - Style: {style}\n\n\
         {style_instructions}\n\n\
         WORKFLOW:\n\
         1. Fetch due cards with get_due_cards using deck_name=\"{deck}\" and limit={limit}\n\
         2. For each card, show the front and wait for the user's answer\n\
         3. Reveal the back and evaluate the answer honestly\n\
         4. Suggest a rating (Again, Hard, Good or Easy) and note it for the summary\n\
         5. Use notesInfo if you need the full note behind a card\n\
         6. Stop when no cards are left or {limit} cards have been reviewed\n\n\
         GUIDELINES:\n\
         - Be encouraging but honest about mistakes\n\
         - Track progress: \"Card X of Y\"\n\
         - If the user wants to stop early, that is fine\n\
         - Finish with a summary of cards reviewed and how recall went\n\n\
         Begin by fetching the due cards for the \"{deck}\" deck."
    ))
}
