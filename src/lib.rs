//! Live webcam emotion tracking: capture frames, classify the faces in them,
//! accumulate per-frame statistics, and summarize the session as a text
//! report plus a pie chart.

pub mod analyzer;
pub mod app;
pub mod camera;
pub mod report;
pub mod session;

pub use analyzer::{annotate, primary_detection, Detection, Emotion, EmotionClassifier};
pub use app::{key_command, EmotionSession, KeyCommand, LoopEvent, LoopState};
pub use camera::CameraSource;
pub use report::{generate, save_chart, Report};
pub use session::{FrameRecord, SessionState};
