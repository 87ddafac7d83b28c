use chrono::{DateTime, Utc};

/// Live telemetry for the question currently being answered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseMetrics {
    pub question_id: Option<String>,
    pub transcript: String,
    pub pauses: Vec<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub first_speech_at: Option<DateTime<Utc>>,
    pub last_speech_at: Option<DateTime<Utc>>,
}

impl ResponseMetrics {
    pub fn begin_question(&mut self, question_id: &str) {
        *self = Self {
            question_id: Some(question_id.to_string()),
            started_at: Some(Utc::now()),
            ..Self::default()
        };
    }

    pub fn record_speech(&mut self, at: DateTime<Utc>) {
        self.first_speech_at.get_or_insert(at);
        self.last_speech_at = Some(at);
    }

    pub fn record_pause(&mut self, at: DateTime<Utc>) {
        self.pauses.push(at);
    }

    /// Speech-to-text sends the whole transcript so far, not deltas.
    pub fn update_transcript(&mut self, transcript: &str) {
        self.transcript = transcript.trim().to_string();
    }

    pub fn has_answer(&self) -> bool {
        !self.transcript.is_empty()
    }

    pub fn has_spoken(&self) -> bool {
        self.first_speech_at.is_some()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
