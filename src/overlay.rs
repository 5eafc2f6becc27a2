use crate::cache::CacheEntry;
use crate::frame::Frame;
use crate::inference::{InferenceResult, InferenceStatus};

pub const LINE_X: i32 = 10;
pub const FIRST_OBJECT_Y: i32 = 30;
pub const LINE_SPACING: i32 = 30;
pub const SCENARIO_BOTTOM_MARGIN: i32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Object,
    Scenario,
}

impl LineKind {
    /// Text colour as (blue, green, red).
    pub fn color_bgr(&self) -> (u8, u8, u8) {
        match self {
            LineKind::Object => (0, 255, 0),
            LineKind::Scenario => (0, 0, 0),
        }
    }
}

/// A line of overlay text anchored at its baseline origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayLine {
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub kind: LineKind,
}

#[derive(Debug, Clone)]
pub struct PresentedFrame {
    pub frame: Frame,
    pub lines: Vec<OverlayLine>,
}

impl PresentedFrame {
    pub fn texts(&self) -> Vec<&str> {
        self.lines.iter().map(|line| line.text.as_str()).collect()
    }
}

/// Caption shown at the bottom of the frame. Failures are surfaced here.
pub fn scenario_text(result: &InferenceResult) -> Option<String> {
    match &result.status {
        InferenceStatus::Ok if result.scenario.is_empty() => None,
        InferenceStatus::Ok => Some(result.scenario.clone()),
        InferenceStatus::ParseError => Some("ParseError".to_string()),
        InferenceStatus::CallError(message) => Some(format!("Error: {}", message)),
    }
}

/// Lays out the cached result over `frame`: one line per object from the top,
/// then the caption near the bottom edge. Pure; works on whatever entry it is
/// given, however stale.
pub fn render(frame: Frame, entry: &CacheEntry) -> PresentedFrame {
    let result = &entry.result;
    let mut lines: Vec<OverlayLine> = result
        .objects
        .iter()
        .zip(0..)
        .map(|(name, row)| OverlayLine {
            text: format!("Object: {}", name),
            x: LINE_X,
            y: FIRST_OBJECT_Y + row * LINE_SPACING,
            kind: LineKind::Object,
        })
        .collect();

    if let Some(scenario) = scenario_text(result) {
        lines.push(OverlayLine {
            text: format!("Scenario: {}", scenario),
            x: LINE_X,
            y: frame.height() as i32 - SCENARIO_BOTTOM_MARGIN,
            kind: LineKind::Scenario,
        });
    }

    PresentedFrame { frame, lines }
}
