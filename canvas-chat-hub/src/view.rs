use crate::{
    client::ClientEvent,
    message::{ControlEvent, DrawAction, is_announcement},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub from: Point,
    pub to: Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Own,
    Remote,
    /// Join, leave and shutdown notices from the hub itself.
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub origin: Origin,
    pub text: String,
}

/// What changed after applying an event, for whoever renders the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewUpdate {
    Line(TranscriptEntry),
    Segment(Segment),
    Cleared,
    Disconnected,
}

/// Follows one pen through start/move/end.
#[derive(Debug, Default)]
struct StrokeTracker {
    last: Option<Point>,
}

impl StrokeTracker {
    fn apply(&mut self, action: DrawAction, point: Point) -> Option<Segment> {
        match action {
            DrawAction::Start => {
                self.last = Some(point);
                None
            }
            DrawAction::Move => {
                let segment = self.last.map(|from| Segment { from, to: point });
                self.last = Some(point);
                segment
            }
            // Forget the pen position so the next start does not connect to it.
            DrawAction::End => {
                self.last = None;
                None
            }
        }
    }

    fn reset(&mut self) {
        self.last = None;
    }
}

/// Client-side chat transcript and drawing surface.
///
/// Only ever changed by [`LocalView::apply`] with events from the client's
/// queue and by [`LocalView::draw_local`] for the user's own pen.
#[derive(Debug, Default)]
pub struct LocalView {
    transcript: Vec<TranscriptEntry>,
    segments: Vec<Segment>,
    remote_pen: StrokeTracker,
    local_pen: StrokeTracker,
    connected: bool,
}

impl LocalView {
    pub fn new() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }

    pub fn apply(&mut self, event: ClientEvent) -> Option<ViewUpdate> {
        match event {
            ClientEvent::Chat(text) => {
                let origin = if is_announcement(&text) {
                    Origin::System
                } else {
                    Origin::Remote
                };
                Some(self.push_line(origin, text))
            }
            ClientEvent::Sent(text) => Some(self.push_line(Origin::Own, text)),
            ClientEvent::Control(ControlEvent::Draw { action, x, y }) => {
                let segment = self.remote_pen.apply(action, Point::new(x, y))?;
                self.segments.push(segment);
                Some(ViewUpdate::Segment(segment))
            }
            ClientEvent::Control(ControlEvent::Clear) => {
                self.clear();
                Some(ViewUpdate::Cleared)
            }
            ClientEvent::Disconnected => {
                self.connected = false;
                Some(ViewUpdate::Disconnected)
            }
        }
    }

    /// Draws the user's own stroke immediately, before the server echoes it.
    pub fn draw_local(&mut self, action: DrawAction, x: i32, y: i32) -> Option<Segment> {
        let segment = self.local_pen.apply(action, Point::new(x, y))?;
        self.segments.push(segment);
        Some(segment)
    }

    pub fn clear(&mut self) {
        self.segments.clear();
        self.remote_pen.reset();
        self.local_pen.reset();
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn push_line(&mut self, origin: Origin, text: String) -> ViewUpdate {
        let entry = TranscriptEntry { origin, text };
        self.transcript.push(entry.clone());
        ViewUpdate::Line(entry)
    }
}
