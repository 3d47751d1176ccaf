//! The interactive session loop.
//!
//! The running/terminated machine is independent of any camera, window, or
//! key-polling mechanism, so a scripted sequence of events can drive it in
//! tests; `run_interactive` wires it to the real devices.

use std::sync::atomic::{AtomicBool, Ordering};

use opencv::core::{self, Point, Scalar};
use opencv::prelude::*;
use opencv::{highgui, imgproc};
use tracing::{info, warn};

use crate::analyzer::{self, EmotionClassifier};
use crate::camera::{self, CameraSource};
use crate::session::SessionState;

pub const WINDOW_NAME: &str = "Emotion Tracker (q quits, r resets)";

/// What a raw `wait_key` code means to the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    Quit,
    Reset,
    Other,
}

/// Decode a `wait_key` return value; the low byte carries the character and
/// a negative code means no key was pressed.
pub fn key_command(code: i32) -> KeyCommand {
    if code < 0 {
        return KeyCommand::Other;
    }
    match (code & 0xff) as u8 {
        b'q' => KeyCommand::Quit,
        b'r' => KeyCommand::Reset,
        _ => KeyCommand::Other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Terminated,
}

/// Everything that can happen to the loop in one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    /// A frame was read and analyzed.
    FrameRead,
    /// A read failed; `recovered` reports whether re-acquisition succeeded.
    ReadFailed { recovered: bool },
    Key(KeyCommand),
    Interrupt,
}

/// The session loop state machine around the session statistics.
#[derive(Debug)]
pub struct EmotionSession {
    state: LoopState,
    session: SessionState,
}

impl EmotionSession {
    pub fn new() -> Self {
        Self {
            state: LoopState::Running,
            session: SessionState::new(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionState {
        &mut self.session
    }

    /// Apply one event and return the resulting state.
    pub fn handle_event(&mut self, event: LoopEvent) -> LoopState {
        match event {
            LoopEvent::Key(KeyCommand::Quit) | LoopEvent::Interrupt => {
                self.state = LoopState::Terminated;
            }
            LoopEvent::Key(KeyCommand::Reset) => {
                self.session.reset();
                info!("session statistics reset");
            }
            LoopEvent::ReadFailed { recovered: false } => {
                self.state = LoopState::Terminated;
            }
            LoopEvent::FrameRead
            | LoopEvent::Key(KeyCommand::Other)
            | LoopEvent::ReadFailed { recovered: true } => {}
        }
        self.state
    }
}

impl Default for EmotionSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive the capture loop until the machine terminates.
///
/// The camera is released on every exit path; the caller keeps the session
/// for reporting even if the loop errors out.
pub fn run_interactive(
    app: &mut EmotionSession,
    mut camera: CameraSource,
    classifier: &mut EmotionClassifier,
    interrupted: &AtomicBool,
) -> anyhow::Result<()> {
    highgui::named_window_def(WINDOW_NAME)?;

    while app.state() == LoopState::Running {
        if interrupted.load(Ordering::Relaxed) {
            info!("interrupt received");
            app.handle_event(LoopEvent::Interrupt);
            continue;
        }

        let frame = match camera.read_frame() {
            Ok(frame) => frame,
            Err(err) => {
                warn!("frame read failed ({err}), re-acquiring camera");
                let _ = camera.release();
                match camera::acquire() {
                    Ok(reacquired) => {
                        camera = reacquired;
                        app.handle_event(LoopEvent::ReadFailed { recovered: true });
                    }
                    Err(err) => {
                        warn!("re-acquisition failed: {err}");
                        app.handle_event(LoopEvent::ReadFailed { recovered: false });
                    }
                }
                continue;
            }
        };

        let mut frame = mirrored(&frame)?;

        match classifier.classify(&frame) {
            Ok(detections) => {
                if let Some(primary) = analyzer::primary_detection(&detections) {
                    app.session_mut()
                        .record(primary.dominant, primary.scores.clone());
                }
                if let Err(err) = analyzer::annotate(&mut frame, &detections) {
                    warn!("skipping frame annotation: {err}");
                }
            }
            Err(err) => warn!("frame analysis failed: {err}"),
        }
        app.handle_event(LoopEvent::FrameRead);

        if app.session().frame_count() > 0 {
            draw_frame_counter(&mut frame, app.session().frame_count())?;
        }

        highgui::imshow(WINDOW_NAME, &frame)?;
        let key = highgui::wait_key(1)?;
        app.handle_event(LoopEvent::Key(key_command(key)));
    }

    let _ = camera.release();
    Ok(())
}

/// Mirror horizontally so the preview behaves like a mirror.
fn mirrored(frame: &Mat) -> opencv::Result<Mat> {
    let mut flipped = Mat::default();
    core::flip(frame, &mut flipped, 1)?;
    Ok(flipped)
}

fn draw_frame_counter(frame: &mut Mat, count: u64) -> opencv::Result<()> {
    let white = Scalar::new(255.0, 255.0, 255.0, 0.0);
    imgproc::put_text(
        frame,
        &format!("Frames: {count}"),
        Point::new(10, 30),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.7,
        white,
        2,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Emotion;

    fn full_scores(dominant: Emotion) -> Vec<(Emotion, f32)> {
        Emotion::ALL
            .into_iter()
            .map(|emotion| (emotion, if emotion == dominant { 94.0 } else { 1.0 }))
            .collect()
    }

    #[test]
    fn decodes_keys() {
        assert_eq!(key_command(i32::from(b'q')), KeyCommand::Quit);
        assert_eq!(key_command(i32::from(b'r')), KeyCommand::Reset);
        assert_eq!(key_command(i32::from(b'x')), KeyCommand::Other);
        assert_eq!(key_command(-1), KeyCommand::Other);
        // high bits set by some platforms are masked off
        assert_eq!(key_command(0x100000 | i32::from(b'q')), KeyCommand::Quit);
    }

    #[test]
    fn quit_and_interrupt_terminate() {
        let mut app = EmotionSession::new();
        assert_eq!(
            app.handle_event(LoopEvent::Key(KeyCommand::Quit)),
            LoopState::Terminated
        );

        let mut app = EmotionSession::new();
        assert_eq!(app.handle_event(LoopEvent::Interrupt), LoopState::Terminated);
    }

    #[test]
    fn reset_clears_session_and_keeps_running() {
        let mut app = EmotionSession::new();
        app.session_mut()
            .record(Emotion::Happy, full_scores(Emotion::Happy));

        assert_eq!(
            app.handle_event(LoopEvent::Key(KeyCommand::Reset)),
            LoopState::Running
        );
        assert_eq!(app.session().frame_count(), 0);
        assert!(app.session().counts().is_empty());
    }

    #[test]
    fn recovered_read_failure_keeps_aggregates() {
        let mut app = EmotionSession::new();
        app.session_mut()
            .record(Emotion::Sad, full_scores(Emotion::Sad));

        assert_eq!(
            app.handle_event(LoopEvent::ReadFailed { recovered: true }),
            LoopState::Running
        );
        assert_eq!(app.session().frame_count(), 1);
        assert_eq!(app.session().counts()[&Emotion::Sad], 1);
    }

    #[test]
    fn unrecovered_read_failure_terminates() {
        let mut app = EmotionSession::new();
        assert_eq!(
            app.handle_event(LoopEvent::ReadFailed { recovered: false }),
            LoopState::Terminated
        );
    }

    #[test]
    fn other_events_keep_running() {
        let mut app = EmotionSession::new();
        assert_eq!(app.handle_event(LoopEvent::FrameRead), LoopState::Running);
        assert_eq!(
            app.handle_event(LoopEvent::Key(KeyCommand::Other)),
            LoopState::Running
        );
    }
}
