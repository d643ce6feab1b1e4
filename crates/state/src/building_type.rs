//! Building-type inference from user text.
//!
//! The type is set once at first strong evidence and persists; only an
//! explicit user change ("actually it's a library now") replaces it.

/// Curated lexicon of building programs, longest phrases first so that
/// "community center" wins over "center".
const BUILDING_TYPES: &[(&str, &str)] = &[
    ("community center", "community_center"),
    ("community centre", "community_center"),
    ("cultural center", "cultural_center"),
    ("student housing", "student_housing"),
    ("primary school", "school"),
    ("high school", "school"),
    ("gymnasium", "gymnasium"),
    ("kindergarten", "kindergarten"),
    ("library", "library"),
    ("museum", "museum"),
    ("theater", "theater"),
    ("theatre", "theater"),
    ("hospital", "hospital"),
    ("clinic", "clinic"),
    ("school", "school"),
    ("housing", "housing"),
    ("apartment", "housing"),
    ("pavilion", "pavilion"),
    ("office", "office"),
    ("church", "church"),
    ("mosque", "mosque"),
    ("market hall", "market_hall"),
    ("market", "market_hall"),
    ("stadium", "stadium"),
    ("hotel", "hotel"),
];

const CHANGE_MARKERS: &[&str] = &[
    "actually it's",
    "actually it is",
    "it's now a",
    "it is now a",
    "changed it to",
    "change it to",
    "switching to a",
    "instead of a",
    "no longer a",
    "now designing a",
];

/// Scan `text` for the first building-type mention.  Returns the normalized
/// label used across exports.
pub fn detect_building_type(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    BUILDING_TYPES
        .iter()
        .find(|(phrase, _)| lower.contains(phrase))
        .map(|(_, label)| (*label).to_string())
}

/// Whether the user is explicitly changing the established building type
/// (as opposed to merely mentioning another program in passing).
pub fn is_explicit_type_change(text: &str) -> bool {
    let lower = text.to_lowercase();
    CHANGE_MARKERS.iter().any(|marker| lower.contains(marker))
}
