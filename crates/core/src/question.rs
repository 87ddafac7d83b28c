use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// How questions are put to the candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Audio,
    Video,
}

impl Mode {
    /// English sessions run on recorded video, every other language is spoken.
    pub fn for_language(language: &str) -> Self {
        if language.eq_ignore_ascii_case("en") {
            Mode::Video
        } else {
            Mode::Audio
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Audio => f.write_str("audio"),
            Mode::Video => f.write_str("video"),
        }
    }
}

/// One interview run. Built once from the bootstrap reply and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub language: String,
    pub mode: Mode,
    pub firstname: Option<String>,
    pub duration_target: Duration,
}

/// A unit of interview content as served by the question bank.
///
/// The backend sends a flat object (`question_en`, `video_url_fr`, ...); the
/// language-suffixed keys are folded into `prompts` and `media_urls`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawQuestion")]
pub struct Question {
    pub id: String,
    pub prompts: BTreeMap<String, String>,
    pub media_urls: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct RawQuestion {
    id: Value,
    #[serde(flatten)]
    fields: serde_json::Map<String, Value>,
}

// Lower rank wins when several prompt keys exist for one language.
const PROMPT_PREFIXES: [(&str, u8); 3] = [("audio_prompt_", 0), ("text_", 1), ("question_", 2)];
const MEDIA_PREFIX: &str = "video_url_";

impl TryFrom<RawQuestion> for Question {
    type Error = String;

    fn try_from(raw: RawQuestion) -> Result<Self, Self::Error> {
        let id = match raw.id {
            Value::String(s) if !s.trim().is_empty() => s,
            Value::Number(n) => n.to_string(),
            other => return Err(format!("unsupported question id: {other}")),
        };

        let mut ranked: BTreeMap<String, (u8, String)> = BTreeMap::new();
        let mut media_urls = BTreeMap::new();

        for (key, value) in raw.fields {
            let Some(text) = value.as_str().filter(|t| !t.trim().is_empty()) else {
                continue;
            };
            if let Some(lang) = key.strip_prefix(MEDIA_PREFIX) {
                media_urls.insert(lang.to_string(), text.to_string());
                continue;
            }
            for (prefix, rank) in PROMPT_PREFIXES {
                if let Some(lang) = key.strip_prefix(prefix) {
                    let keep = ranked.get(lang).is_none_or(|(existing, _)| rank < *existing);
                    if keep {
                        ranked.insert(lang.to_string(), (rank, text.to_string()));
                    }
                    break;
                }
            }
        }

        Ok(Self {
            id,
            prompts: ranked.into_iter().map(|(lang, (_, text))| (lang, text)).collect(),
            media_urls,
        })
    }
}

impl Question {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompts: BTreeMap::new(),
            media_urls: BTreeMap::new(),
        }
    }

    pub fn with_prompt(mut self, language: &str, text: &str) -> Self {
        self.prompts.insert(language.to_string(), text.to_string());
        self
    }

    pub fn with_media(mut self, language: &str, url: &str) -> Self {
        self.media_urls.insert(language.to_string(), url.to_string());
        self
    }

    /// Prompt text in `language`, else English, else whatever exists.
    pub fn prompt(&self, language: &str) -> &str {
        self.prompts
            .get(language)
            .or_else(|| self.prompts.get("en"))
            .or_else(|| self.prompts.values().next())
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn media_url(&self, language: &str) -> Option<&str> {
        [language, "en", "fr"]
            .into_iter()
            .find_map(|lang| self.media_urls.get(lang))
            .map(String::as_str)
    }
}

/// What the flow decided to show for a question.
#[derive(Debug, Clone, PartialEq)]
pub enum Presentation {
    Audio { question: Question },
    Video { url: String, question: Question },
}

impl Presentation {
    pub fn question(&self) -> &Question {
        match self {
            Presentation::Audio { question } | Presentation::Video { question, .. } => question,
        }
    }
}

/// The question set handed to the flow controller at bootstrap.
#[derive(Debug, Clone, PartialEq)]
pub enum QuestionPlan {
    /// Exactly one question, already chosen by the backend.
    Injected(Question),
    Sequence(Vec<Question>),
}

/// Reply of the question-source collaborator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrchestrateReply {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default, deserialize_with = "lenient_question")]
    pub question: Option<Question>,
    #[serde(default, deserialize_with = "lenient_questions")]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub simulation_mode: Option<Mode>,
    #[serde(default)]
    pub firstname: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub duration_target: Option<u64>,
}

// A malformed question is dropped with a warning; it never fails the reply.
fn parse_question(value: Value) -> Option<Question> {
    match Question::deserialize(&value) {
        Ok(question) => Some(question),
        Err(e) => {
            tracing::warn!("Dropping malformed question ({}): {}", e, value);
            None
        }
    }
}

fn lenient_question<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Question>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?
        .filter(|value| !value.is_null())
        .and_then(parse_question))
}

fn lenient_questions<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Question>, D::Error> {
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?
        .unwrap_or_default()
        .into_iter()
        .filter_map(parse_question)
        .collect())
}

impl OrchestrateReply {
    pub fn is_init(&self) -> bool {
        self.action
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case("init") || a.eq_ignore_ascii_case("init_q1"))
    }

    /// True once the backend has produced something the flow can start from.
    pub fn is_usable(&self) -> bool {
        !self.questions.is_empty() || (self.is_init() && self.question.is_some())
    }

    /// The first question this reply offers, explicit `question` first.
    pub fn first_question(&self) -> Option<&Question> {
        self.question.as_ref().or_else(|| self.questions.first())
    }

    pub fn session(&self, session_id: &str, default_duration: Duration) -> Session {
        let language = self.lang.clone().unwrap_or_else(|| "en".to_string());
        let mode = self
            .simulation_mode
            .unwrap_or_else(|| Mode::for_language(&language));
        Session {
            session_id: session_id.to_string(),
            mode,
            firstname: self.firstname.clone(),
            duration_target: self
                .duration_target
                .map(Duration::from_secs)
                .unwrap_or(default_duration),
            language,
        }
    }

    pub fn into_plan(self) -> QuestionPlan {
        match (self.is_init(), self.question) {
            (true, Some(question)) => QuestionPlan::Injected(question),
            _ => QuestionPlan::Sequence(self.questions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_folds_language_keys() {
        let q: Question = serde_json::from_value(serde_json::json!({
            "id": 42,
            "question_en": "Tell me about yourself.",
            "audio_prompt_en": "So, tell me about yourself.",
            "question_fr": "Parlez-moi de vous.",
            "video_url_fr": "https://cdn/q42_fr.mp4",
            "video_url_en": "",
            "category": "intro"
        }))
        .unwrap();

        assert_eq!(q.id, "42");
        assert_eq!(q.prompt("en"), "So, tell me about yourself.");
        assert_eq!(q.prompt("fr"), "Parlez-moi de vous.");
        assert_eq!(q.prompt("de"), "So, tell me about yourself.");
        // Empty strings are not media.
        assert_eq!(q.media_url("en"), Some("https://cdn/q42_fr.mp4"));
    }

    #[test]
    fn test_question_rejects_missing_id() {
        let result: Result<Question, _> =
            serde_json::from_value(serde_json::json!({ "id": null, "question_en": "?" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_reply_usability() {
        let empty: OrchestrateReply = serde_json::from_str(r#"{"questions": null}"#).unwrap();
        assert!(!empty.is_usable());

        let bare_init: OrchestrateReply = serde_json::from_str(r#"{"action": "INIT_Q1"}"#).unwrap();
        assert!(!bare_init.is_usable(), "init without a question is still pending");

        let init: OrchestrateReply =
            serde_json::from_str(r#"{"action": "init", "question": {"id": "qx"}}"#).unwrap();
        assert!(init.is_usable());
        assert_eq!(init.into_plan(), QuestionPlan::Injected(Question::new("qx")));

        let seq: OrchestrateReply =
            serde_json::from_str(r#"{"questions": [{"id": "a"}, {"id": "b"}]}"#).unwrap();
        assert!(seq.is_usable());
        assert_eq!(seq.first_question().map(|q| q.id.as_str()), Some("a"));
    }

    #[test]
    fn test_reply_drops_malformed_questions() {
        let reply: OrchestrateReply = serde_json::from_str(
            r#"{"questions": [{"id": "q1"}, {"id": null}, {"id": true}, {"id": ""}, {"id": "q3"}]}"#,
        )
        .unwrap();
        let ids: Vec<&str> = reply.questions.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "q3"]);
        assert!(reply.is_usable());

        let init: OrchestrateReply =
            serde_json::from_str(r#"{"action": "init", "question": {"id": null}}"#).unwrap();
        assert!(init.question.is_none());
        assert!(!init.is_usable());
    }

    #[test]
    fn test_reply_session_defaults() {
        let reply: OrchestrateReply =
            serde_json::from_str(r#"{"lang": "fr", "firstname": "Camille"}"#).unwrap();
        let session = reply.session("s-1", Duration::from_secs(600));

        assert_eq!(session.language, "fr");
        assert_eq!(session.mode, Mode::Audio);
        assert_eq!(session.firstname.as_deref(), Some("Camille"));
        assert_eq!(session.duration_target, Duration::from_secs(600));

        let reply: OrchestrateReply =
            serde_json::from_str(r#"{"simulation_mode": "audio", "duration_target": 90}"#).unwrap();
        let session = reply.session("s-2", Duration::from_secs(600));
        assert_eq!(session.language, "en");
        assert_eq!(session.mode, Mode::Audio);
        assert_eq!(session.duration_target, Duration::from_secs(90));
    }
}
