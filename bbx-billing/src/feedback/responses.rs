//! Feedback response pools

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackCategory {
    Encouraging,
    Helpful,
    Roast,
}

impl FeedbackCategory {
    pub fn from_score(score: u8) -> Self {
        match score {
            8.. => FeedbackCategory::Encouraging,
            6..=7 => FeedbackCategory::Helpful,
            _ => FeedbackCategory::Roast,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackCategory::Encouraging => "encouraging",
            FeedbackCategory::Helpful => "helpful",
            FeedbackCategory::Roast => "roast",
        }
    }
}

const ENCOURAGING: &[&str] = &[
    "This is a keeper. The {mood} energy sits perfectly on a {genre} track.",
    "Strong writing! Your {mood} lines would carry a {genre} hook with ease.",
    "You clearly know how songs are built. This {mood} {genre} lyric is ready for the booth.",
    "Great instincts here. The {mood} feel and {genre} flavor lock together.",
];

const HELPFUL: &[&str] = &[
    "Solid foundation. Tighten the rhymes and this {mood} {genre} song will land.",
    "Good start. A clearer chorus would make the {mood} mood hit harder in {genre}.",
    "There's a real {mood} song in here. Trim the filler and lean into the {genre} style.",
    "Nice ideas. Give the {genre} structure more shape and the {mood} tone will shine.",
];

const ROAST: &[&str] = &[
    "Bold of you to call this a song. Even a {genre} beat can't save that {mood} shrug.",
    "The {mood} vibe is there somewhere, hiding from the rhymes. {genre} fans deserve a chorus.",
    "This reads like a grocery list with {mood} feelings. Give the {genre} crowd a hook.",
    "Your lyric and a rhyme scheme walked past each other. Try again, {genre} legend.",
];

fn pool(category: FeedbackCategory) -> &'static [&'static str] {
    match category {
        FeedbackCategory::Encouraging => ENCOURAGING,
        FeedbackCategory::Helpful => HELPFUL,
        FeedbackCategory::Roast => ROAST,
    }
}

/// Pick a response for the category, filled with mood and genre
pub fn respond<R: Rng + ?Sized>(
    category: FeedbackCategory,
    mood: &str,
    genre: &str,
    rng: &mut R,
) -> String {
    let templates = pool(category);
    let template = templates[rng.gen_range(0..templates.len())];
    template.replace("{mood}", mood).replace("{genre}", genre)
}
