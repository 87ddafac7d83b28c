/// Phrases that mean "please ask that again" rather than an answer.
const REPEAT_PHRASES: &[&str] = &[
    "repeat the question",
    "can you repeat",
    "could you repeat",
    "please repeat",
    "say that again",
    "say it again",
    "come again",
    "pardon",
    "répéter",
    "repeter",
    "répète",
    "redire",
    "vous pouvez répéter",
];

/// Whether a transcript is a request to hear the current question again.
///
/// Only short utterances count: a long answer that happens to contain
/// "pardon" is still an answer.
pub fn is_repeat_request(transcript: &str) -> bool {
    let text = transcript.trim().to_lowercase();
    if text.is_empty() || text.split_whitespace().count() > 8 {
        return false;
    }
    if text.trim_end_matches(['.', '!', '?']) == "repeat" {
        return true;
    }
    REPEAT_PHRASES.iter().any(|phrase| text.contains(phrase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_repeat_requests() {
        assert!(is_repeat_request("Repeat."));
        assert!(is_repeat_request("Sorry, could you repeat the question?"));
        assert!(is_repeat_request("Pardon ?"));
        assert!(is_repeat_request("Vous pouvez répéter la question"));
    }

    #[test]
    fn test_ignores_answers() {
        assert!(!is_repeat_request(""));
        assert!(!is_repeat_request("I led a team of five engineers on a payments migration."));
        assert!(!is_repeat_request(
            "I would never repeat that mistake again because I learned to test earlier and more often"
        ));
    }
}
