use crate::SessionEvent;
use crate::collaborators::{Collaborators, QuestionSource};
use crate::error::SessionError;
use crate::flow::{FlowController, FlowState, MISSING_QUESTION_MEDIA};
use crate::metrics::ResponseMetrics;
use crate::playback::{PlaybackQueue, Subscriber};
use crate::question::{Mode, OrchestrateReply, Presentation, Question, QuestionPlan, Session};
use crate::repeat_intent::is_repeat_request;
use crate::silence::{AmplitudeSource, SilenceConfig, SilenceDetector, VoiceActivity};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const BOOTSTRAP_ATTEMPTS: u32 = 6;
pub const BOOTSTRAP_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_SESSION_DURATION: Duration = Duration::from_secs(20 * 60);
pub const SPEAK_COOLDOWN: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrchestratorConfig {
    pub bootstrap_attempts: u32,
    pub bootstrap_delay: Duration,
    /// Used when the backend does not send a duration target.
    pub default_duration: Duration,
    /// The same question is not spoken twice within this window.
    pub speak_cooldown: Duration,
    pub silence: SilenceConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            bootstrap_attempts: BOOTSTRAP_ATTEMPTS,
            bootstrap_delay: BOOTSTRAP_DELAY,
            default_duration: DEFAULT_SESSION_DURATION,
            speak_cooldown: SPEAK_COOLDOWN,
            silence: SilenceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every question was asked and the closing clips played.
    Completed,
    TimedOut,
    /// Ended from outside, or the event source went away.
    Ended,
}

/// Flags the user-facing layer shows instead of raising errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStatus {
    pub microphone_available: bool,
    /// Advancement stopped because no first question could be obtained.
    pub halted: bool,
}

#[derive(Debug)]
struct SpokenQuestion {
    question_id: String,
    at: Instant,
}

/// Asks the question source until it returns something usable.
///
/// Gives up after `attempts` calls, sleeping `delay` between them.
pub async fn acquire_questions(
    source: &dyn QuestionSource,
    session_id: &str,
    attempts: u32,
    delay: Duration,
) -> Result<OrchestrateReply, SessionError> {
    for attempt in 1..=attempts {
        match source.fetch_questions(session_id).await {
            Ok(reply) if reply.is_usable() => {
                tracing::info!(
                    "Question set ready on attempt {}/{} ({} question(s))",
                    attempt,
                    attempts,
                    reply.questions.len().max(1)
                );
                return Ok(reply);
            }
            Ok(_) => tracing::warn!("Attempt {}/{}: question set not ready yet", attempt, attempts),
            Err(e) => tracing::warn!("Attempt {}/{}: question source failed: {:?}", attempt, attempts, e),
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }
    Err(SessionError::BootstrapExhausted { attempts })
}

/// Runs one interview session.
///
/// Playback-end notifications, transcripts and voice activity all end up
/// in `&mut self` methods, so only one of them is ever being handled.
pub struct Orchestrator {
    flow: FlowController,
    playback: PlaybackQueue,
    detector: SilenceDetector,
    metrics: ResponseMetrics,
    collaborators: Collaborators,
    config: OrchestratorConfig,
    status: SessionStatus,
    repeat_requested: bool,
    closing: bool,
    finished: Option<SessionOutcome>,
    last_spoken: Option<SpokenQuestion>,
    voice_tx: mpsc::UnboundedSender<VoiceActivity>,
    voice_rx: mpsc::UnboundedReceiver<VoiceActivity>,
}

impl Orchestrator {
    pub fn new(
        session: Session,
        plan: QuestionPlan,
        collaborators: Collaborators,
        config: OrchestratorConfig,
    ) -> Self {
        tracing::info!(
            "Session {} ({}, {} mode, {}s)",
            session.session_id,
            session.language,
            session.mode,
            session.duration_target.as_secs()
        );
        let mut flow = FlowController::new(session, collaborators.clone());
        flow.inject(plan);
        let (voice_tx, voice_rx) = mpsc::unbounded_channel();

        Self {
            flow,
            playback: PlaybackQueue::new(),
            detector: SilenceDetector::new(config.silence),
            metrics: ResponseMetrics::default(),
            collaborators,
            config,
            status: SessionStatus::default(),
            repeat_requested: false,
            closing: false,
            finished: None,
            last_spoken: None,
            voice_tx,
            voice_rx,
        }
    }

    /// Obtains the initial question set and builds the session from it.
    ///
    /// On `Err` the caller is expected to route the user out of the session.
    pub async fn bootstrap(
        session_id: &str,
        collaborators: Collaborators,
        config: OrchestratorConfig,
    ) -> Result<Self, SessionError> {
        let reply = acquire_questions(
            collaborators.questions.as_ref(),
            session_id,
            config.bootstrap_attempts,
            config.bootstrap_delay,
        )
        .await?;
        let session = reply.session(session_id, config.default_duration);
        Ok(Self::new(session, reply.into_plan(), collaborators, config))
    }

    pub fn session(&self) -> &Session {
        self.flow.session()
    }

    pub fn state(&self) -> FlowState {
        self.flow.state()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn playback(&self) -> &PlaybackQueue {
        &self.playback
    }

    pub fn metrics(&self) -> &ResponseMetrics {
        &self.metrics
    }

    pub fn subscribe_playback(&mut self, subscriber: Subscriber) {
        self.playback.subscribe(subscriber);
    }

    /// Starts the microphone (if any) and queues the first intro.
    pub async fn start(&mut self, microphone: Option<Box<dyn AmplitudeSource>>) {
        self.playback.reset();

        self.status.microphone_available = match microphone {
            Some(source) => match self.detector.start_recording(source, self.voice_tx.clone()) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Could not start recording: {}", e);
                    false
                }
            },
            None => {
                tracing::warn!("No microphone, silence detection disabled");
                false
            }
        };

        match self.flow.get_intro1().await {
            Ok(url) => {
                self.playback.add([url]);
            }
            Err(e) => {
                tracing::warn!("Intro 1 unavailable, skipping: {:?}", e);
                self.finished = self.dispatch().await;
            }
        }
    }

    /// Drives the session until it completes, times out or is ended.
    pub async fn run(&mut self, mut events: mpsc::Receiver<SessionEvent>) -> SessionOutcome {
        let deadline = Instant::now() + self.flow.session().duration_target;
        let timer = tokio::time::sleep_until(deadline);
        tokio::pin!(timer);

        let outcome = loop {
            if let Some(outcome) = self.finished.take() {
                break outcome;
            }
            tokio::select! {
                _ = &mut timer => {
                    tracing::info!("Session duration reached");
                    break SessionOutcome::TimedOut;
                }
                event = events.recv() => match event {
                    Some(event) => self.finished = self.handle_event(event).await,
                    None => {
                        tracing::info!("Event source closed");
                        break SessionOutcome::Ended;
                    }
                },
                Some(activity) = self.voice_rx.recv() => self.on_voice(activity).await,
            }
        };

        self.shutdown(outcome).await
    }

    pub async fn handle_event(&mut self, event: SessionEvent) -> Option<SessionOutcome> {
        match event {
            SessionEvent::PlaybackEnded => self.on_playback_ended().await,
            SessionEvent::Transcript(text) => {
                self.on_transcript(&text);
                None
            }
            SessionEvent::RepeatRequested => {
                tracing::info!("Repeat requested");
                self.repeat_requested = true;
                None
            }
            SessionEvent::EndRequested => Some(SessionOutcome::Ended),
        }
    }

    fn on_transcript(&mut self, text: &str) {
        if is_repeat_request(text) {
            tracing::info!("Repeat intent detected: {:?}", text);
            self.repeat_requested = true;
            return;
        }
        self.metrics.update_transcript(text);
        self.collaborators.stall.on_user_speaking();
    }

    /// Handles the render surface finishing the current clip.
    pub async fn on_playback_ended(&mut self) -> Option<SessionOutcome> {
        if self.flow.state() == FlowState::Ending {
            return None;
        }
        // Queued content always plays before the flow moves on.
        if self.playback.next().is_some() {
            return None;
        }
        if self.closing {
            return Some(SessionOutcome::Completed);
        }
        if self.repeat_requested {
            self.repeat_requested = false;
            let question = self
                .flow
                .current_question()
                .filter(|_| self.flow.state().is_asking())
                .cloned();
            match question {
                Some(question) => {
                    self.replay(question).await;
                    return None;
                }
                None => tracing::debug!(
                    "Repeat requested in {} with no question asked, ignoring",
                    self.flow.state()
                ),
            }
        }
        self.dispatch().await
    }

    async fn dispatch(&mut self) -> Option<SessionOutcome> {
        match self.flow.state() {
            FlowState::Init | FlowState::Ending => None,
            FlowState::Intro1 => match self.flow.get_intro2().await {
                Ok(url) => {
                    self.playback.add([url]);
                    None
                }
                Err(e) => {
                    tracing::warn!("Intro 2 unavailable, skipping: {:?}", e);
                    self.begin_questions().await;
                    None
                }
            },
            FlowState::Intro2 => {
                self.begin_questions().await;
                None
            }
            state if state.is_asking() => {
                if self.metrics.has_answer() {
                    self.submit_answer().await
                } else if self.metrics.has_spoken() {
                    // Still answering, keep listening.
                    self.queue_idle(true).await;
                    None
                } else {
                    self.advance().await
                }
            }
            _ => self.advance().await,
        }
    }

    async fn begin_questions(&mut self) {
        match self.flow.fetch_q1().await {
            Ok(Some(presentation)) => {
                self.status.halted = false;
                self.present(presentation).await;
            }
            Ok(None) => {
                tracing::error!("No first question, halting the flow");
                self.status.halted = true;
            }
            Err(e) => {
                tracing::error!("Could not fetch the first question, halting the flow: {:?}", e);
                self.status.halted = true;
            }
        }
    }

    async fn advance(&mut self) -> Option<SessionOutcome> {
        match self.flow.fetch_next_question() {
            Some(presentation) => {
                self.present(presentation).await;
                None
            }
            None => self.close().await,
        }
    }

    async fn close(&mut self) -> Option<SessionOutcome> {
        tracing::info!("Out of questions, playing closing clips");
        self.closing = true;
        let clips = self.flow.get_closing_clips().await;
        if self.playback.add(clips) == 0 {
            return Some(SessionOutcome::Completed);
        }
        None
    }

    async fn present(&mut self, presentation: Presentation) {
        self.metrics.begin_question(&presentation.question().id);
        match presentation {
            Presentation::Video { url, .. } => {
                self.playback.add([url]);
            }
            Presentation::Audio { question } => {
                self.speak_question(&question).await;
                self.queue_idle(false).await;
            }
        }
    }

    async fn replay(&mut self, question: Question) {
        tracing::info!("Replaying question {}", question.id);
        self.metrics.update_transcript("");
        match self.flow.session().mode {
            Mode::Video => {
                let url = question
                    .media_url(&self.flow.session().language)
                    .unwrap_or(MISSING_QUESTION_MEDIA)
                    .to_string();
                self.playback.add([url]);
            }
            Mode::Audio => {
                self.speak_question(&question).await;
                self.queue_idle(false).await;
            }
        }
    }

    async fn speak_question(&mut self, question: &Question) {
        if let Some(last) = &self.last_spoken {
            if last.question_id == question.id && last.at.elapsed() < self.config.speak_cooldown {
                tracing::debug!("Question {} spoken moments ago, not repeating", question.id);
                return;
            }
        }
        self.last_spoken = Some(SpokenQuestion {
            question_id: question.id.clone(),
            at: Instant::now(),
        });

        let language = &self.flow.session().language;
        let text = question.prompt(language);
        if text.is_empty() {
            tracing::warn!("Question {} has no prompt text", question.id);
            return;
        }
        if let Err(e) = self.collaborators.speaker.speak(text, language).await {
            tracing::warn!("Speaking question {} failed: {:?}", question.id, e);
        }
    }

    async fn queue_idle(&mut self, alternate: bool) {
        let idle = if alternate {
            self.flow.get_idle_alt().await
        } else {
            self.flow.get_idle_listen().await
        };
        match idle {
            Ok(url) => {
                self.playback.add([url]);
            }
            Err(e) => tracing::warn!("No idle filler available, waiting for the candidate: {:?}", e),
        }
    }

    async fn submit_answer(&mut self) -> Option<SessionOutcome> {
        let transcript = self.metrics.transcript.clone();
        let result = self.flow.send_feedback(&transcript).await;
        self.metrics.reset();

        match result {
            Ok(Some(outcome)) => {
                if let Some(feedback) = &outcome.feedback {
                    tracing::debug!("Feedback: {}", feedback);
                }
                self.flow.clear_current_question();
                self.playback.add([outcome.idle_url]);
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("No idle filler after feedback, moving on: {:?}", e);
                self.flow.clear_current_question();
                self.advance().await
            }
        }
    }

    async fn on_voice(&mut self, activity: VoiceActivity) {
        match activity {
            VoiceActivity::Speaking => {
                self.metrics.record_speech(Utc::now());
                self.collaborators.stall.on_user_speaking();
            }
            VoiceActivity::Silence(event) => {
                self.collaborators.stall.on_silence(&event);
                self.metrics.record_pause(event.timestamp);
                if self.flow.state().is_asking() && self.metrics.has_answer() {
                    tracing::info!("Candidate went quiet, submitting the answer");
                    if let Some(outcome) = self.submit_answer().await {
                        self.finished = Some(outcome);
                    }
                }
            }
        }
    }

    async fn shutdown(&mut self, outcome: SessionOutcome) -> SessionOutcome {
        tracing::info!("Session finished: {:?}", outcome);
        self.detector.stop_recording().await;
        if outcome != SessionOutcome::Completed {
            self.playback.clear();
        }
        if self.flow.state() != FlowState::Ending {
            self.flow.end_session().await;
        }
        outcome
    }
}
