use interview_core::SessionEvent;
use interview_core::playback::{MediaItem, Subscriber};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Stand-in render surface: "plays" each clip for a fixed time, then reports
/// that it ended.
pub struct ClipPlayer {
    clip_duration: Duration,
    events: mpsc::Sender<SessionEvent>,
}

impl ClipPlayer {
    pub fn new(clip_duration: Duration, events: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            clip_duration,
            events,
        }
    }

    /// Turns the player into a playback-queue subscriber.
    ///
    /// A new clip (or `None`) replaces the one on screen, so a clip that is
    /// cut short never reports its end.
    pub fn into_subscriber(self) -> Subscriber {
        let mut on_screen: Option<JoinHandle<()>> = None;
        Box::new(move |item: Option<&MediaItem>| {
            if let Some(previous) = on_screen.take() {
                previous.abort();
            }
            let Some(item) = item else {
                tracing::info!("Render surface idle");
                return Ok(());
            };

            tracing::info!("Now playing: {}", item);
            let clip = item.to_string();
            let events = self.events.clone();
            let duration = self.clip_duration;
            on_screen = Some(tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                tracing::debug!("Clip ended: {}", clip);
                if events.send(SessionEvent::PlaybackEnded).await.is_err() {
                    tracing::debug!("Session closed before clip end was delivered");
                }
            }));
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_clip_end_is_signalled_once() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut subscriber = ClipPlayer::new(Duration::from_millis(500), tx).into_subscriber();
        let clip = MediaItem::parse("https://cdn/intro.mp4").unwrap();

        subscriber(Some(&clip)).unwrap();
        assert_eq!(rx.recv().await, Some(SessionEvent::PlaybackEnded));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_clip_in_flight() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut subscriber = ClipPlayer::new(Duration::from_millis(500), tx).into_subscriber();
        let clip = MediaItem::parse("https://cdn/q1.mp4").unwrap();

        subscriber(Some(&clip)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        subscriber(None).unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }
}
