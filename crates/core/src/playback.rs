use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;

/// A single playable reference. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaItem(String);

impl MediaItem {
    pub fn parse(reference: &str) -> Option<Self> {
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A wrapper object carrying its reference in a `url` field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaWrapper {
    pub url: Option<String>,
}

/// Anything a caller may hand to [`PlaybackQueue::add`].
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSource {
    Reference(String),
    Wrapped(MediaWrapper),
    Other(Value),
}

impl MediaSource {
    fn normalize(self) -> Option<MediaItem> {
        let item = match &self {
            MediaSource::Reference(reference) => MediaItem::parse(reference),
            MediaSource::Wrapped(wrapper) => wrapper.url.as_deref().and_then(MediaItem::parse),
            MediaSource::Other(Value::String(reference)) => MediaItem::parse(reference),
            MediaSource::Other(Value::Object(map)) => map
                .get("url")
                .and_then(Value::as_str)
                .and_then(MediaItem::parse),
            MediaSource::Other(_) => None,
        };
        if item.is_none() {
            tracing::warn!("Dropping unplayable media item: {:?}", self);
        }
        item
    }
}

impl From<&str> for MediaSource {
    fn from(reference: &str) -> Self {
        MediaSource::Reference(reference.to_string())
    }
}

impl From<String> for MediaSource {
    fn from(reference: String) -> Self {
        MediaSource::Reference(reference)
    }
}

impl From<MediaItem> for MediaSource {
    fn from(item: MediaItem) -> Self {
        MediaSource::Reference(item.0)
    }
}

impl From<MediaWrapper> for MediaSource {
    fn from(wrapper: MediaWrapper) -> Self {
        MediaSource::Wrapped(wrapper)
    }
}

impl From<Value> for MediaSource {
    fn from(value: Value) -> Self {
        MediaSource::Other(value)
    }
}

/// Called with the clip that should now be rendered, or `None` to stop.
pub type Subscriber = Box<dyn FnMut(Option<&MediaItem>) -> anyhow::Result<()> + Send>;

/// Ordered media delivery to the render surface.
///
/// `add` on an idle queue starts delivery synchronously. Since every method
/// takes `&mut self`, an `add` and the `next` it triggers can never be split
/// by another caller.
#[derive(Default)]
pub struct PlaybackQueue {
    items: VecDeque<MediaItem>,
    current: Option<MediaItem>,
    playing: bool,
    subscribers: Vec<Subscriber>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues every valid item and returns how many were accepted.
    pub fn add<I, S>(&mut self, sources: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<MediaSource>,
    {
        let normalized: Vec<MediaItem> = sources
            .into_iter()
            .filter_map(|source| source.into().normalize())
            .collect();

        if normalized.is_empty() {
            tracing::warn!("No valid media in batch, queue unchanged");
            return 0;
        }

        let accepted = normalized.len();
        tracing::debug!("Queued {} clip(s): {:?}", accepted, normalized);
        self.items.extend(normalized);

        if !self.playing {
            self.next();
        }
        accepted
    }

    /// Advances to the next clip and tells every subscriber about it.
    pub fn next(&mut self) -> Option<MediaItem> {
        match self.items.pop_front() {
            Some(item) => {
                tracing::info!("Playing next clip: {}", item);
                self.playing = true;
                self.current = Some(item.clone());
                Self::notify(&mut self.subscribers, Some(&item));
                Some(item)
            }
            None => {
                tracing::debug!("Queue drained, waiting for new clips");
                self.playing = false;
                self.current = None;
                Self::notify(&mut self.subscribers, None);
                None
            }
        }
    }

    /// Registers a subscriber. A clip already in flight is delivered to it at once.
    pub fn subscribe(&mut self, mut subscriber: Subscriber) {
        if let Some(current) = &self.current {
            tracing::debug!("Late subscriber, replaying current clip {}", current);
            if let Err(e) = subscriber(Some(current)) {
                tracing::warn!("Playback subscriber failed: {:?}", e);
            }
        }
        self.subscribers.push(subscriber);
    }

    /// Empties the queue without telling anyone.
    pub fn reset(&mut self) {
        tracing::debug!("Playback queue reset");
        self.items.clear();
        self.current = None;
        self.playing = false;
    }

    /// Empties the queue and tells subscribers that nothing is playing.
    pub fn clear(&mut self) {
        tracing::info!("Playback queue cleared");
        self.reset();
        Self::notify(&mut self.subscribers, None);
    }

    /// Clips not yet delivered. The current clip is not counted.
    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn current(&self) -> Option<&MediaItem> {
        self.current.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn pending(&self) -> impl Iterator<Item = &MediaItem> {
        self.items.iter()
    }

    fn notify(subscribers: &mut [Subscriber], item: Option<&MediaItem>) {
        for subscriber in subscribers.iter_mut() {
            if let Err(e) = subscriber(item) {
                tracing::warn!("Playback subscriber failed: {:?}", e);
            }
        }
    }
}
