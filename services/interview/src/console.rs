use anyhow::Result;
use async_trait::async_trait;
use interview_core::collaborators::{QuestionSpeaker, StallMonitor};
use interview_core::{SessionEvent, SilenceEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const REPEAT_COMMAND: &str = "/repeat";
const QUIT_COMMAND: &str = "/quit";

/// Maps one console line to a session event.
///
/// Anything that is not a command is the running transcript of the answer.
pub fn parse_line(line: &str) -> Option<SessionEvent> {
    match line.trim() {
        "" => None,
        REPEAT_COMMAND => Some(SessionEvent::RepeatRequested),
        QUIT_COMMAND => Some(SessionEvent::EndRequested),
        text => Some(SessionEvent::Transcript(text.to_string())),
    }
}

/// Feeds stdin lines into the session until stdin closes or the session ends.
pub fn spawn_stdin_feed(events: mpsc::Sender<SessionEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let Some(event) = parse_line(&line) else {
                        continue;
                    };
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    tracing::debug!("Stdin closed");
                    break;
                }
                Err(e) => {
                    tracing::error!("Failed to read stdin: {:?}", e);
                    break;
                }
            }
        }
    })
}

/// Prints audio-mode questions instead of synthesizing them.
pub struct ConsoleSpeaker;

#[async_trait]
impl QuestionSpeaker for ConsoleSpeaker {
    async fn speak(&self, text: &str, language: &str) -> Result<()> {
        tracing::info!("[{}] Interviewer: {}", language, text);
        Ok(())
    }
}

/// Logs voice activity, once per change from silence to speech.
#[derive(Default)]
pub struct LoggingStallMonitor {
    speaking: AtomicBool,
}

impl StallMonitor for LoggingStallMonitor {
    fn on_silence(&self, event: &SilenceEvent) {
        self.speaking.store(false, Ordering::Relaxed);
        tracing::info!("Candidate paused for {}ms", event.duration_ms);
    }

    fn on_user_speaking(&self) {
        if !self.speaking.swap(true, Ordering::Relaxed) {
            tracing::info!("Candidate is speaking");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_line("/repeat"), Some(SessionEvent::RepeatRequested));
        assert_eq!(parse_line("  /quit \n"), Some(SessionEvent::EndRequested));
    }

    #[test]
    fn test_parse_transcript() {
        assert_eq!(
            parse_line(" I led the migration to Postgres. "),
            Some(SessionEvent::Transcript("I led the migration to Postgres.".to_string()))
        );
        assert_eq!(parse_line("   "), None);
    }

    #[test]
    fn test_stall_monitor_tracks_speaking_edge() {
        let monitor = LoggingStallMonitor::default();
        monitor.on_user_speaking();
        monitor.on_user_speaking();
        assert!(monitor.speaking.load(Ordering::Relaxed));

        monitor.on_silence(&SilenceEvent {
            duration_ms: 1200,
            timestamp: chrono::Utc::now(),
        });
        assert!(!monitor.speaking.load(Ordering::Relaxed));
    }
}
