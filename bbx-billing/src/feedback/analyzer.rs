//! Heuristic lyric analysis
//!
//! Base score 5. Bonuses: verse+chorus structure (+2), a rhyming group of
//! four lines (+1), vocabulary diversity (+1), eight or more lines (+1).
//! The result is clamped to 1..=10. Every heuristic tolerates empty input.

use super::lexicon::{GENRES, MOODS, NEUTRAL_MOOD, SECTION_MARKERS, UNIVERSAL_GENRE};
use super::responses::FeedbackCategory;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const BASE_SCORE: i32 = 5;
const MIN_SCORE: i32 = 1;
const MAX_SCORE: i32 = 10;
const STRUCTURE_BONUS: i32 = 2;
const RHYME_BONUS: i32 = 1;
const VOCABULARY_BONUS: i32 = 1;
const LENGTH_BONUS: i32 = 1;

const RHYME_GROUP_SIZE: usize = 4;
const RHYME_SUFFIX_LEN: usize = 2;
const LONG_WORD_MIN_LEN: usize = 4;
const DIVERSITY_THRESHOLD: f64 = 0.6;
const MIN_LINES_FOR_BONUS: usize = 8;

pub const FREE_FORM: &str = "free-form";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricAnalysis {
    pub score: u8,
    /// Section labels joined with ", " or "free-form"
    pub structure: String,
    pub sections: Vec<String>,
    pub mood: String,
    pub genre: String,
    /// First matching pattern (AABB, ABAB, ABCB)
    pub rhyme_scheme: Option<String>,
    pub vocabulary_ratio: f64,
    pub line_count: usize,
    pub word_count: usize,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub category: FeedbackCategory,
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| !w.is_empty())
}

/// Longest unbracketed header without a colon, e.g. "Verse 2 - Intro"
const MAX_BARE_HEADER_WORDS: usize = 4;

/// Prefixes folded into the section they precede ("Pre-Chorus" -> chorus)
const SECTION_PREFIXES: &[&str] = &["pre", "post"];

fn marker_keyword(word: &str) -> Option<&'static str> {
    let head = word.trim_end_matches(|c: char| c.is_ascii_digit());
    SECTION_MARKERS.iter().copied().find(|marker| *marker == head)
}

/// Section label when the line is a header
///
/// Bracketed lines ("[Chorus: Artist]", "(Pre-Chorus)") are headers when any
/// word is a section keyword. Bare lines are headers when they start with a
/// keyword and either carry a colon or are short ("Chorus x2", "Verse 1 - Intro").
pub fn section_marker(line: &str) -> Option<&'static str> {
    let trimmed = line.trim();
    let bracketed = (trimmed.starts_with('[') && trimmed.ends_with(']'))
        || (trimmed.starts_with('(') && trimmed.ends_with(')'));
    let tokens: Vec<String> = words(trimmed).collect();

    if bracketed {
        return tokens.iter().find_map(|t| marker_keyword(t));
    }

    let mut rest = tokens.iter().map(String::as_str).peekable();
    if rest.peek().is_some_and(|t| SECTION_PREFIXES.contains(t)) {
        rest.next();
    }
    let marker = marker_keyword(rest.next()?)?;

    let short = tokens.len() <= MAX_BARE_HEADER_WORDS;
    (short || trimmed.contains(':')).then_some(marker)
}

fn detect_sections(lines: &[&str]) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    for marker in lines.iter().filter_map(|l| section_marker(l)) {
        if !sections.iter().any(|s| s == marker) {
            sections.push(marker.to_string());
        }
    }
    sections
}

fn classify(tokens: &[String], bags: &[(&'static str, &[&str])], default: &'static str) -> String {
    let counts: Vec<(&str, usize)> = bags
        .iter()
        .map(|(label, bag)| {
            let hits = tokens.iter().filter(|t| bag.contains(&t.as_str())).count();
            (*label, hits)
        })
        .collect();

    let best = counts.iter().map(|(_, n)| *n).max().unwrap_or(0);
    let leaders: Vec<&str> = counts
        .iter()
        .filter(|(_, n)| *n == best)
        .map(|(label, _)| *label)
        .collect();

    match leaders.as_slice() {
        [only] if best > 0 => only.to_string(),
        _ => default.to_string(),
    }
}

fn ending_suffix(line: &str) -> Option<String> {
    let last = words(line).last()?;
    let chars: Vec<char> = last.chars().collect();
    let start = chars.len().saturating_sub(RHYME_SUFFIX_LEN);
    Some(chars[start..].iter().collect())
}

fn group_scheme(group: &[&str]) -> Option<&'static str> {
    let s: Vec<Option<String>> = group.iter().map(|l| ending_suffix(l)).collect();
    let same = |a: usize, b: usize| matches!((&s[a], &s[b]), (Some(x), Some(y)) if x == y);

    if same(0, 1) && same(2, 3) {
        Some("AABB")
    } else if same(0, 2) && same(1, 3) {
        Some("ABAB")
    } else if same(1, 3) {
        Some("ABCB")
    } else {
        None
    }
}

/// Rhyme scheme of the first matching group of four lyric lines
pub fn detect_rhyme_scheme(lyric_lines: &[&str]) -> Option<String> {
    lyric_lines
        .chunks_exact(RHYME_GROUP_SIZE)
        .find_map(group_scheme)
        .map(str::to_string)
}

/// Unique long words over all long words (0.0 when there are none)
pub fn vocabulary_ratio(tokens: &[String]) -> f64 {
    let long: Vec<&String> = tokens
        .iter()
        .filter(|w| w.chars().count() >= LONG_WORD_MIN_LEN)
        .collect();
    if long.is_empty() {
        return 0.0;
    }
    let unique: HashSet<&String> = long.iter().copied().collect();
    unique.len() as f64 / long.len() as f64
}

/// Analyze lyrics; never fails
pub fn analyze(lyrics: &str) -> LyricAnalysis {
    let lines: Vec<&str> = lyrics
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let lyric_lines: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|l| section_marker(l).is_none())
        .collect();
    let tokens: Vec<String> = lyric_lines.iter().flat_map(|l| words(l)).collect();

    let sections = detect_sections(&lines);
    let has_verse = sections.iter().any(|s| s == "verse");
    let has_chorus = sections.iter().any(|s| s == "chorus");
    let has_bridge = sections.iter().any(|s| s == "bridge");

    let mood = classify(&tokens, MOODS, NEUTRAL_MOOD);
    let genre = classify(&tokens, GENRES, UNIVERSAL_GENRE);
    let rhyme_scheme = detect_rhyme_scheme(&lyric_lines);
    let ratio = vocabulary_ratio(&tokens);

    let mut score = BASE_SCORE;
    let mut strengths = Vec::new();
    let mut improvements = Vec::new();

    if has_verse && has_chorus {
        score += STRUCTURE_BONUS;
        strengths.push("Clear song structure with distinct verse and chorus".to_string());
    } else {
        improvements.push("Mark out a verse and a chorus so the song has a clear shape".to_string());
    }
    if has_bridge {
        strengths.push("The bridge adds contrast before the final chorus".to_string());
    }

    match &rhyme_scheme {
        Some(scheme) => {
            score += RHYME_BONUS;
            strengths.push(format!("Consistent {} rhyme scheme", scheme));
        }
        None => improvements
            .push("Try rhyming line endings (AABB or ABAB) to make lines stick".to_string()),
    }

    if ratio > DIVERSITY_THRESHOLD {
        score += VOCABULARY_BONUS;
        strengths.push("Varied vocabulary keeps the lyric fresh".to_string());
    } else {
        improvements.push("Vary your word choices; repeated words flatten the imagery".to_string());
    }

    if lines.len() >= MIN_LINES_FOR_BONUS {
        score += LENGTH_BONUS;
        strengths.push("Enough material for a full song".to_string());
    } else {
        improvements.push(format!(
            "Develop the idea further; aim for at least {} lines",
            MIN_LINES_FOR_BONUS
        ));
    }

    if mood == NEUTRAL_MOOD {
        improvements.push("Commit to a clearer emotional tone".to_string());
    } else {
        strengths.push(format!("The {} mood comes through clearly", mood));
    }

    let score = score.clamp(MIN_SCORE, MAX_SCORE) as u8;

    LyricAnalysis {
        score,
        structure: if sections.is_empty() {
            FREE_FORM.to_string()
        } else {
            sections.join(", ")
        },
        sections,
        mood,
        genre,
        rhyme_scheme,
        vocabulary_ratio: ratio,
        line_count: lines.len(),
        word_count: tokens.len(),
        strengths,
        improvements,
        category: FeedbackCategory::from_score(score),
    }
}
