//! Cognitive-offloading risk: how hard is the student trying to delegate
//! the thinking?
//!
//! Weighted sum, clipped to `[0, 1]`:
//! ```text
//! risk = imperative_tone(0.6) + low_question_rate(0.2) + request_ratio(0.2)
//! ```

const IMPERATIVE_PHRASES: &[&str] = &[
    "just tell me",
    "just give me",
    "give me the answer",
    "tell me the answer",
    "tell me exactly",
    "do it for me",
    "solve it for me",
    "write it for me",
    "i need the answer",
];

const REQUEST_VERBS: &[&str] = &["give me", "tell me", "show me", "provide", "list", "write me"];

const REFLECTION_PHRASES: &[&str] = &[
    "i think",
    "i believe",
    "i wonder",
    "i tried",
    "i realized",
    "my reasoning",
    "it seems to me",
    "i'm considering",
];

const W_IMPERATIVE: f32 = 0.6;
const W_QUESTION_RATE: f32 = 0.2;
const W_REQUEST_RATIO: f32 = 0.2;

/// Score the current user text against the prior user turns.
pub fn offloading_risk(user_text: &str, prior_user_turns: &[&str]) -> f32 {
    let lower = user_text.to_lowercase();

    let imperative = if IMPERATIVE_PHRASES.iter().any(|p| lower.contains(p)) {
        1.0
    } else {
        0.0
    };

    // Few questions over the recent history reads as passive consumption.
    let question_component = if prior_user_turns.is_empty() {
        0.5
    } else {
        let asking = prior_user_turns.iter().filter(|t| t.contains('?')).count() as f32;
        1.0 - (asking / prior_user_turns.len() as f32)
    };

    // Requests vs. reflections, across the prior turns plus the current one.
    let mut requests = count_hits(&lower, REQUEST_VERBS);
    let mut reflections = count_hits(&lower, REFLECTION_PHRASES);
    for turn in prior_user_turns {
        let turn_lower = turn.to_lowercase();
        requests += count_hits(&turn_lower, REQUEST_VERBS);
        reflections += count_hits(&turn_lower, REFLECTION_PHRASES);
    }
    let request_ratio = if requests + reflections == 0 {
        0.0
    } else {
        requests as f32 / (requests + reflections) as f32
    };

    (W_IMPERATIVE * imperative + W_QUESTION_RATE * question_component + W_REQUEST_RATIO * request_ratio)
        .clamp(0.0, 1.0)
}

fn count_hits(lower: &str, phrases: &[&str]) -> usize {
    phrases.iter().filter(|p| lower.contains(*p)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blunt_demands_clear_the_intervention_threshold() {
        let risk = offloading_risk("Just give me the answer to the room sizes", &[]);
        assert!(risk >= 0.7, "risk was {risk}");
    }

    #[test]
    fn honest_questions_stay_low() {
        let prior = ["What drives the massing here?", "Is the courtyard too deep?"];
        let risk = offloading_risk(
            "What are standard room sizes for community center gymnasiums?",
            &prior,
        );
        assert!(risk < 0.7, "risk was {risk}");
    }

    #[test]
    fn reflective_history_offsets_requests() {
        let prior = vec![
            "I think the entry sequence should compress then release?",
            "I tried splitting the program into two bars?",
        ];
        let with_history = offloading_risk("show me a plan", &prior);
        let without_history = offloading_risk("show me a plan", &[]);
        assert!(with_history <= without_history);
    }

    #[test]
    fn risk_is_always_in_range() {
        let prior = vec!["give me", "tell me", "show me"];
        let risk = offloading_risk("just tell me and give me the answer, provide a list", &prior);
        assert!((0.0..=1.0).contains(&risk));
    }
}
