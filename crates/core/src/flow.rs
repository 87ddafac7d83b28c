use crate::collaborators::{Collaborators, FeedbackRequest};
use crate::question::{Mode, Presentation, Question, QuestionPlan, Session};
use anyhow::Result;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::fmt;

/// Played when a question has no media in any usable language.
pub const MISSING_QUESTION_MEDIA: &str =
    "https://qpnalviccuopdwfscoli.supabase.co/storage/v1/object/public/system/question_missing.mp4";

pub const IDLE_LISTEN: &str = "idle_listen";
pub const IDLE_SMILE: &str = "idle_smile";
pub const IDLE_ALT: &str = "listen_idle_01";
pub const CLOSING_CLIPS: [&str; 2] = ["nova_end_interview", "nova_feedback_final"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlowState {
    #[default]
    Init,
    Intro1,
    Intro2,
    Q1Audio,
    Q1Video,
    RunAudio,
    RunVideo,
    Ending,
    FeedbackIdle,
}

impl FlowState {
    /// Whether `next` is a forward edge of the session graph.
    pub fn can_advance_to(self, next: FlowState) -> bool {
        use FlowState::*;
        match (self, next) {
            (Ending, _) => false,
            (_, Ending) => true,
            (Init, Intro1) | (Intro1, Intro2) => true,
            (Intro2, Q1Audio | Q1Video) => true,
            (Q1Audio | Q1Video | RunAudio | RunVideo | FeedbackIdle, RunAudio | RunVideo) => true,
            (Q1Audio | Q1Video | RunAudio | RunVideo, FeedbackIdle) => true,
            _ => false,
        }
    }

    /// A question is on screen (or was just spoken) and an answer is expected.
    pub fn is_asking(self) -> bool {
        matches!(
            self,
            FlowState::Q1Audio | FlowState::Q1Video | FlowState::RunAudio | FlowState::RunVideo
        )
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowState::Init => "INIT",
            FlowState::Intro1 => "INTRO_1",
            FlowState::Intro2 => "INTRO_2",
            FlowState::Q1Audio => "Q1_AUDIO",
            FlowState::Q1Video => "Q1_VIDEO",
            FlowState::RunAudio => "RUN_AUDIO",
            FlowState::RunVideo => "RUN_VIDEO",
            FlowState::Ending => "ENDING",
            FlowState::FeedbackIdle => "FEEDBACK_IDLE",
        };
        f.write_str(name)
    }
}

/// The state machine's mutable record.
#[derive(Debug, Default)]
pub struct FlowContext {
    pub state: FlowState,
    pub current_question: Option<Question>,
    pub pending_questions: VecDeque<Question>,
    /// Q1 handed over by bootstrap. Only `fetch_q1` takes it.
    injected: Option<Question>,
    /// Ids of every question presented so far. Never shrinks.
    delivered: HashSet<String>,
}

/// Sources of the first question, tried in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Q1Tier {
    /// Bootstrap handed over exactly one question.
    PreInjected,
    PendingHead,
    BackendFetch,
}

pub const Q1_TIERS: [Q1Tier; 3] = [Q1Tier::PreInjected, Q1Tier::PendingHead, Q1Tier::BackendFetch];

#[derive(Debug, Clone, PartialEq)]
pub enum TierOutcome {
    Handled(Question),
    Pass,
}

/// Result of [`FlowController::send_feedback`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackOutcome {
    pub idle_url: String,
    /// `None` when scoring failed. The failure is logged, never raised.
    pub feedback: Option<Value>,
}

/// Decides what to present at every transition point of one session.
///
/// It never observes playback: the orchestrator calls it when a clip ends
/// or the candidate falls silent, and queues whatever comes back.
pub struct FlowController {
    session: Session,
    ctx: FlowContext,
    collaborators: Collaborators,
}

impl FlowController {
    pub fn new(session: Session, collaborators: Collaborators) -> Self {
        Self {
            session,
            ctx: FlowContext::default(),
            collaborators,
        }
    }

    /// Loads the bootstrap question set.
    pub fn inject(&mut self, plan: QuestionPlan) {
        match plan {
            QuestionPlan::Injected(question) => {
                tracing::info!("Q1 pre-injected: {}", question.id);
                self.ctx.injected = Some(question);
                self.ctx.pending_questions.clear();
            }
            QuestionPlan::Sequence(questions) => {
                tracing::info!("Loaded {} pending question(s)", questions.len());
                self.ctx.pending_questions = questions.into();
            }
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> FlowState {
        self.ctx.state
    }

    pub fn context(&self) -> &FlowContext {
        &self.ctx
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.ctx.current_question.as_ref()
    }

    /// Called once the answer to the current question has been handled.
    pub fn clear_current_question(&mut self) {
        self.ctx.current_question = None;
    }

    fn transition(&mut self, next: FlowState) {
        let current = self.ctx.state;
        if current == next {
            return;
        }
        if !current.can_advance_to(next) {
            tracing::warn!("Unexpected flow transition {} -> {}", current, next);
        }
        tracing::info!("Flow state {} -> {}", current, next);
        self.ctx.state = next;
    }

    async fn resolve(&self, name: &str) -> Result<String> {
        self.collaborators
            .media
            .resolve(name, &self.session.language)
            .await
    }

    pub async fn get_intro1(&mut self) -> Result<String> {
        self.transition(FlowState::Intro1);
        let name = format!("intro_{}_1", self.session.language);
        self.resolve(&name).await
    }

    pub async fn get_intro2(&mut self) -> Result<String> {
        self.transition(FlowState::Intro2);
        let name = format!("intro_{}_2", self.session.language);
        self.resolve(&name).await
    }

    /// Resolves the first question.
    ///
    /// `Ok(None)` means the question source had nothing, `Err` that it could
    /// not be reached. Either way the caller must stop advancing.
    pub async fn fetch_q1(&mut self) -> Result<Option<Presentation>> {
        for tier in Q1_TIERS {
            if let TierOutcome::Handled(question) = self.try_tier(tier).await? {
                tracing::info!("Q1 {} resolved via {:?}", question.id, tier);
                let presentation = self.present(question, true);
                self.drop_delivered_heads();
                return Ok(Some(presentation));
            }
        }
        tracing::error!("Question source yielded no first question");
        Ok(None)
    }

    async fn try_tier(&mut self, tier: Q1Tier) -> Result<TierOutcome> {
        match tier {
            Q1Tier::PreInjected => {
                if !self.ctx.pending_questions.is_empty() {
                    return Ok(TierOutcome::Pass);
                }
                Ok(match self.ctx.injected.take() {
                    Some(question) if !self.ctx.delivered.contains(&question.id) => {
                        TierOutcome::Handled(question)
                    }
                    _ => TierOutcome::Pass,
                })
            }
            Q1Tier::PendingHead => Ok(self
                .ctx
                .pending_questions
                .pop_front()
                .map_or(TierOutcome::Pass, TierOutcome::Handled)),
            Q1Tier::BackendFetch => {
                let reply = self
                    .collaborators
                    .questions
                    .fetch_questions(&self.session.session_id)
                    .await?;
                let first = reply.first_question().cloned();
                self.ctx.pending_questions = reply.questions.into();
                Ok(first.map_or(TierOutcome::Pass, TierOutcome::Handled))
            }
        }
    }

    fn drop_delivered_heads(&mut self) {
        while let Some(head) = self.ctx.pending_questions.front() {
            if !self.ctx.delivered.contains(&head.id) {
                break;
            }
            tracing::debug!("Dropping duplicate question {}", head.id);
            self.ctx.pending_questions.pop_front();
        }
    }

    /// Pops the next question not yet delivered. `None` means the interview
    /// has run out of questions, which is not an error.
    pub fn fetch_next_question(&mut self) -> Option<Presentation> {
        while let Some(next) = self.ctx.pending_questions.pop_front() {
            if self.ctx.delivered.contains(&next.id) {
                tracing::warn!("Skipping already delivered question {}", next.id);
                continue;
            }
            return Some(self.present(next, false));
        }
        tracing::info!("No more questions");
        None
    }

    fn present(&mut self, question: Question, first: bool) -> Presentation {
        let state = match (first, self.session.mode) {
            (true, Mode::Audio) => FlowState::Q1Audio,
            (true, Mode::Video) => FlowState::Q1Video,
            (false, Mode::Audio) => FlowState::RunAudio,
            (false, Mode::Video) => FlowState::RunVideo,
        };
        self.transition(state);
        self.ctx.delivered.insert(question.id.clone());
        self.ctx.current_question = Some(question.clone());

        match self.session.mode {
            Mode::Audio => Presentation::Audio { question },
            Mode::Video => {
                let url = question
                    .media_url(&self.session.language)
                    .unwrap_or_else(|| {
                        tracing::warn!("Question {} has no media, using placeholder", question.id);
                        MISSING_QUESTION_MEDIA
                    })
                    .to_string();
                Presentation::Video { url, question }
            }
        }
    }

    /// Submits the answer to the current question for scoring.
    ///
    /// Returns `Ok(None)` without side effects when no question is current.
    /// A scoring failure is swallowed; only a missing idle filler is an error.
    pub async fn send_feedback(&mut self, transcript: &str) -> Result<Option<FeedbackOutcome>> {
        let Some(question) = self.ctx.current_question.as_ref() else {
            tracing::debug!("send_feedback called without a current question");
            return Ok(None);
        };

        let request = FeedbackRequest {
            session_id: self.session.session_id.clone(),
            question_id: question.id.clone(),
            question_text: question.prompt(&self.session.language).to_string(),
            answer_text: transcript.to_string(),
            language: self.session.language.clone(),
        };
        let feedback = match self.collaborators.feedback.submit(&request).await {
            Ok(scoring) => Some(scoring),
            Err(e) => {
                tracing::warn!("Feedback submission for {} failed: {:?}", request.question_id, e);
                None
            }
        };

        self.transition(FlowState::FeedbackIdle);
        let idle_url = self.get_idle_listen().await?;
        Ok(Some(FeedbackOutcome { idle_url, feedback }))
    }

    pub async fn get_idle_listen(&self) -> Result<String> {
        self.resolve(IDLE_LISTEN).await
    }

    pub async fn get_idle_smile(&self) -> Result<String> {
        self.idle_or_listen(IDLE_SMILE).await
    }

    pub async fn get_idle_alt(&self) -> Result<String> {
        self.idle_or_listen(IDLE_ALT).await
    }

    async fn idle_or_listen(&self, name: &str) -> Result<String> {
        match self.resolve(name).await {
            Ok(url) => Ok(url),
            Err(e) => {
                tracing::debug!("Idle clip {} unavailable ({:?}), using {}", name, e, IDLE_LISTEN);
                self.get_idle_listen().await
            }
        }
    }

    /// Closing clips that exist for this language, in play order.
    pub async fn get_closing_clips(&self) -> Vec<String> {
        let mut clips = Vec::with_capacity(CLOSING_CLIPS.len());
        for name in CLOSING_CLIPS {
            match self.resolve(name).await {
                Ok(url) => clips.push(url),
                Err(e) => tracing::warn!("Closing clip {} unavailable: {:?}", name, e),
            }
        }
        clips
    }

    /// Moves to ENDING and notifies the backend. Never fails.
    pub async fn end_session(&mut self) -> bool {
        self.transition(FlowState::Ending);
        let session_id = &self.session.session_id;
        if let Err(e) = self.collaborators.lifecycle.end(session_id).await {
            tracing::warn!("Session end notification failed: {:?}", e);
        }
        if let Err(e) = self.collaborators.lifecycle.complete(session_id).await {
            tracing::warn!("Session completion notification failed: {:?}", e);
        }
        true
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::collaborators::{
        MockFeedbackService, MockMediaLookup, MockQuestionSource, MockQuestionSpeaker,
        MockSessionLifecycle, NoopStallMonitor,
    };
    use crate::question::OrchestrateReply;
    use anyhow::anyhow;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    pub(crate) fn session(mode: Mode, language: &str) -> Session {
        Session {
            session_id: "s-1".to_string(),
            language: language.to_string(),
            mode,
            firstname: None,
            duration_target: Duration::from_secs(1200),
        }
    }

    pub(crate) fn question(id: &str) -> Question {
        Question::new(id)
            .with_prompt("en", &format!("Question {id}?"))
            .with_media("en", &format!("https://cdn/{id}.mp4"))
    }

    pub(crate) fn cdn_media() -> MockMediaLookup {
        let mut media = MockMediaLookup::new();
        media
            .expect_resolve()
            .returning(|name, lang| Ok(format!("https://cdn/{lang}/{name}.mp4")));
        media
    }

    pub(crate) struct Mocks {
        pub questions: MockQuestionSource,
        pub media: MockMediaLookup,
        pub feedback: MockFeedbackService,
        pub lifecycle: MockSessionLifecycle,
        pub speaker: MockQuestionSpeaker,
    }

    impl Default for Mocks {
        fn default() -> Self {
            Self {
                questions: MockQuestionSource::new(),
                media: cdn_media(),
                feedback: MockFeedbackService::new(),
                lifecycle: MockSessionLifecycle::new(),
                speaker: MockQuestionSpeaker::new(),
            }
        }
    }

    impl Mocks {
        pub(crate) fn into_collaborators(self) -> Collaborators {
            Collaborators {
                questions: Arc::new(self.questions),
                media: Arc::new(self.media),
                feedback: Arc::new(self.feedback),
                lifecycle: Arc::new(self.lifecycle),
                speaker: Arc::new(self.speaker),
                stall: Arc::new(NoopStallMonitor),
            }
        }
    }

    fn controller(mode: Mode, mocks: Mocks) -> FlowController {
        FlowController::new(session(mode, "en"), mocks.into_collaborators())
    }

    #[test]
    fn test_transition_graph() {
        use FlowState::*;
        assert!(Init.can_advance_to(Intro1));
        assert!(Intro2.can_advance_to(Q1Video));
        assert!(RunAudio.can_advance_to(FeedbackIdle));
        assert!(FeedbackIdle.can_advance_to(RunVideo));
        assert!(Q1Video.can_advance_to(Ending));
        assert!(!Ending.can_advance_to(Intro1));
        assert!(!Init.can_advance_to(Q1Audio));
        assert!(!FeedbackIdle.can_advance_to(Q1Audio));
        assert_eq!(FeedbackIdle.to_string(), "FEEDBACK_IDLE");
    }

    #[tokio::test]
    async fn test_intros_resolve_language_specific_clips() {
        let mut flow = FlowController::new(session(Mode::Audio, "fr"), Mocks::default().into_collaborators());

        let intro1 = flow.get_intro1().await.unwrap();
        assert_eq!(intro1, "https://cdn/fr/intro_fr_1.mp4");
        assert_eq!(flow.state(), FlowState::Intro1);

        let intro2 = flow.get_intro2().await.unwrap();
        assert_eq!(intro2, "https://cdn/fr/intro_fr_2.mp4");
        assert_eq!(flow.state(), FlowState::Intro2);
    }

    #[tokio::test]
    async fn test_fetch_q1_uses_pre_injected_question() {
        // The source must not be called: no expectation is set.
        let mut flow = controller(Mode::Audio, Mocks::default());
        flow.inject(QuestionPlan::Injected(question("qx")));
        // Not current until it is presented.
        assert!(flow.current_question().is_none());

        let presentation = flow.fetch_q1().await.unwrap().unwrap();

        assert_eq!(presentation, Presentation::Audio { question: question("qx") });
        assert_eq!(flow.state(), FlowState::Q1Audio);
        assert_eq!(flow.current_question().map(|q| q.id.as_str()), Some("qx"));
    }

    #[tokio::test]
    async fn test_fetch_q1_pops_pending_head() {
        let mut flow = controller(Mode::Video, Mocks::default());
        flow.inject(QuestionPlan::Sequence(vec![question("q1"), question("q2")]));

        let presentation = flow.fetch_q1().await.unwrap().unwrap();

        assert_eq!(
            presentation,
            Presentation::Video {
                url: "https://cdn/q1.mp4".to_string(),
                question: question("q1"),
            }
        );
        assert_eq!(flow.state(), FlowState::Q1Video);
        assert_eq!(flow.context().pending_questions.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_q1_backend_fetch_drops_duplicate_head() {
        let mut mocks = Mocks::default();
        mocks.questions.expect_fetch_questions().times(1).returning(|_| {
            Ok(OrchestrateReply {
                question: Some(question("q1")),
                questions: vec![question("q1"), question("q1"), question("q2")],
                ..Default::default()
            })
        });
        let mut flow = controller(Mode::Video, mocks);

        let presentation = flow.fetch_q1().await.unwrap().unwrap();

        assert_eq!(presentation.question().id, "q1");
        let head = flow.context().pending_questions.front().map(|q| q.id.as_str());
        assert_eq!(head, Some("q2"));
    }

    #[tokio::test]
    async fn test_fetch_q1_reports_empty_and_failing_source() {
        let mut mocks = Mocks::default();
        mocks
            .questions
            .expect_fetch_questions()
            .times(1)
            .returning(|_| Ok(OrchestrateReply::default()));
        let mut flow = controller(Mode::Video, mocks);
        assert!(flow.fetch_q1().await.unwrap().is_none());
        assert!(flow.current_question().is_none());

        let mut mocks = Mocks::default();
        mocks
            .questions
            .expect_fetch_questions()
            .times(1)
            .returning(|_| Err(anyhow!("connection refused")));
        let mut flow = controller(Mode::Video, mocks);
        assert!(flow.fetch_q1().await.is_err());
    }

    #[tokio::test]
    async fn test_video_url_falls_back_to_sentinel() {
        let mut flow = controller(Mode::Video, Mocks::default());
        flow.inject(QuestionPlan::Sequence(vec![Question::new("bare")]));

        let presentation = flow.fetch_q1().await.unwrap().unwrap();
        match presentation {
            Presentation::Video { url, .. } => assert_eq!(url, MISSING_QUESTION_MEDIA),
            other => panic!("expected video, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_next_question_skips_anything_already_delivered() {
        let mut flow = controller(Mode::Video, Mocks::default());
        flow.inject(QuestionPlan::Sequence(vec![
            question("q1"),
            question("q2"),
            question("q1"),
            question("q3"),
        ]));
        flow.fetch_q1().await.unwrap();

        let ids: Vec<String> = std::iter::from_fn(|| flow.fetch_next_question())
            .map(|p| p.question().id.clone())
            .collect();

        assert_eq!(ids, vec!["q2", "q3"]);
        assert_eq!(flow.state(), FlowState::RunVideo);
        assert!(flow.fetch_next_question().is_none());
    }

    #[tokio::test]
    async fn test_send_feedback_without_question_is_noop() {
        let mut flow = controller(Mode::Video, Mocks::default());
        assert_eq!(flow.send_feedback("anything").await.unwrap(), None);
        assert_eq!(flow.state(), FlowState::Init);
    }

    #[tokio::test]
    async fn test_send_feedback_submits_and_keeps_current() {
        let mut mocks = Mocks::default();
        mocks
            .feedback
            .expect_submit()
            .withf(|req| {
                req.question_id == "q1"
                    && req.question_text == "Question q1?"
                    && req.answer_text == "Rust, mostly."
                    && req.language == "en"
            })
            .times(1)
            .returning(|_| Ok(json!({ "score": 4 })));
        let mut flow = controller(Mode::Video, mocks);
        flow.inject(QuestionPlan::Sequence(vec![question("q1")]));
        flow.fetch_q1().await.unwrap();

        let outcome = flow.send_feedback("Rust, mostly.").await.unwrap().unwrap();

        assert_eq!(outcome.idle_url, "https://cdn/en/idle_listen.mp4");
        assert_eq!(outcome.feedback, Some(json!({ "score": 4 })));
        assert_eq!(flow.state(), FlowState::FeedbackIdle);
        assert!(flow.current_question().is_some());
    }

    #[tokio::test]
    async fn test_send_feedback_swallows_scoring_failure() {
        let mut mocks = Mocks::default();
        mocks
            .feedback
            .expect_submit()
            .returning(|_| Err(anyhow!("scoring service down")));
        let mut flow = controller(Mode::Video, mocks);
        flow.inject(QuestionPlan::Sequence(vec![question("q1")]));
        flow.fetch_q1().await.unwrap();

        let outcome = flow.send_feedback("answer").await.unwrap().unwrap();
        assert_eq!(outcome.feedback, None);
        assert_eq!(flow.state(), FlowState::FeedbackIdle);
    }

    #[tokio::test]
    async fn test_idle_variants_fall_back_to_listen() {
        let mut mocks = Mocks::default();
        mocks.media = MockMediaLookup::new();
        mocks.media.expect_resolve().returning(|name, _| match name {
            IDLE_LISTEN => Ok("listen.mp4".to_string()),
            _ => Err(anyhow!("not found")),
        });
        let flow = controller(Mode::Video, mocks);

        assert_eq!(flow.get_idle_smile().await.unwrap(), "listen.mp4");
        assert_eq!(flow.get_idle_alt().await.unwrap(), "listen.mp4");
    }

    #[tokio::test]
    async fn test_end_session_swallows_notification_failures() {
        let mut mocks = Mocks::default();
        mocks
            .lifecycle
            .expect_end()
            .times(1)
            .returning(|_| Err(anyhow!("timeout")));
        mocks.lifecycle.expect_complete().times(1).returning(|_| Ok(()));
        let mut flow = controller(Mode::Video, mocks);

        assert!(flow.end_session().await);
        assert_eq!(flow.state(), FlowState::Ending);
    }
}
