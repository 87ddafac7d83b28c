pub mod collaborators;
pub mod error;
pub mod flow;
pub mod metrics;
pub mod orchestrator;
pub mod playback;
pub mod question;
pub mod repeat_intent;
pub mod silence;

pub use error::SessionError;
pub use flow::{FlowController, FlowState};
pub use orchestrator::{Orchestrator, OrchestratorConfig, SessionOutcome, SessionStatus};
pub use playback::{MediaItem, PlaybackQueue};
pub use silence::{AmplitudeSource, SilenceConfig, SilenceDetector, SilenceEvent, VoiceActivity};

/// Represents events that the runtime feeds into a running session.
///
/// The orchestrator is the only consumer. Everything the outside world can
/// tell a session (the render surface finishing a clip, the candidate's
/// speech-to-text output, explicit user commands) arrives through this enum
/// so the session loop stays single-threaded.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The render surface finished the current clip.
    PlaybackEnded,
    /// Transcript-so-far of the candidate's answer.
    Transcript(String),
    /// The candidate asked to hear the current question again.
    RepeatRequested,
    /// Leave the session now.
    EndRequested,
}
