//! Keyword bags for mood and genre classification

pub const NEUTRAL_MOOD: &str = "neutral";
pub const UNIVERSAL_GENRE: &str = "universal";

pub const MOODS: &[(&str, &[&str])] = &[
    (
        "happy",
        &[
            "happy", "joy", "smile", "sunshine", "laugh", "bright", "celebrate", "glad", "fun",
            "shine", "sunny", "good",
        ],
    ),
    (
        "sad",
        &[
            "sad", "cry", "tears", "alone", "lonely", "broken", "pain", "lost", "goodbye",
            "miss", "rain", "empty", "hurt",
        ],
    ),
    (
        "angry",
        &[
            "angry", "rage", "hate", "fight", "mad", "burn", "scream", "enemy", "fury",
            "war", "revenge",
        ],
    ),
    (
        "romantic",
        &[
            "love", "heart", "kiss", "darling", "baby", "forever", "together", "hold",
            "touch", "beautiful", "romance",
        ],
    ),
    (
        "energetic",
        &[
            "dance", "jump", "run", "fire", "wild", "energy", "move", "party", "loud", "fast",
            "alive", "tonight",
        ],
    ),
];

pub const GENRES: &[(&str, &[&str])] = &[
    (
        "pop",
        &["radio", "chart", "catchy", "dancefloor", "crush", "summer", "popstar", "hit"],
    ),
    (
        "rock",
        &["guitar", "rock", "roll", "amp", "stage", "rebel", "thunder", "riot", "loud"],
    ),
    (
        "hip-hop",
        &[
            "rap", "flow", "beat", "rhyme", "hood", "street", "mic", "hustle", "bars", "crew",
        ],
    ),
    (
        "country",
        &[
            "truck", "whiskey", "road", "dirt", "boots", "farm", "river", "town", "porch",
            "cowboy",
        ],
    ),
    (
        "electronic",
        &[
            "bass", "drop", "synth", "club", "neon", "pulse", "laser", "rave", "digital", "techno",
        ],
    ),
    (
        "r&b",
        &[
            "smooth", "soul", "groove", "slow", "velvet", "honey", "silk", "vibe", "babe",
            "late",
        ],
    ),
];

/// Section markers recognized by the structure detector
pub const SECTION_MARKERS: &[&str] = &["verse", "chorus", "bridge", "outro"];
