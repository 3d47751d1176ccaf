//! Face detection and per-face emotion scoring.
//!
//! Detection uses the frontal-face Haar cascade; scoring runs an ONNX
//! emotion network through OpenCV's DNN module. A frame with no detectable
//! face is not an error and simply yields no detections.

use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

use anyhow::Context;
use opencv::core::{self, Point, Rect, Scalar, Size};
use opencv::prelude::*;
use opencv::{dnn, imgproc, objdetect, types};
use thiserror::Error;

const FACE_CASCADE: &str = "haarcascades/haarcascade_frontalface_alt.xml";
const EMOTION_MODEL: &str = "assets/models/emotion.onnx";

/// Network input edge length in pixels.
const NET_INPUT: i32 = 64;

/// The label set produced by the emotion network, in output-tensor order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Emotion {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Angry,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Surprise,
        Emotion::Neutral,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Emotion::Angry => "angry",
            Emotion::Disgust => "disgust",
            Emotion::Fear => "fear",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One face: its region, its dominant label, and the full label-to-score
/// mapping (percentages summing to 100 per face).
#[derive(Debug, Clone)]
pub struct Detection {
    pub region: Rect,
    pub dominant: Emotion,
    pub scores: Vec<(Emotion, f32)>,
}

impl Detection {
    /// Confidence of the dominant label.
    pub fn top_score(&self) -> f32 {
        self.scores
            .iter()
            .map(|(_, score)| *score)
            .fold(0.0, f32::max)
    }
}

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("face detection failed: {0}")]
    Detection(#[source] opencv::Error),
    #[error("emotion inference failed: {0}")]
    Inference(#[source] opencv::Error),
    #[error("annotation failed: {0}")]
    Annotate(#[source] opencv::Error),
}

pub struct EmotionClassifier {
    detector: objdetect::CascadeClassifier,
    net: dnn::Net,
}

impl EmotionClassifier {
    pub fn new() -> anyhow::Result<Self> {
        let xml = core::find_file_def(FACE_CASCADE)?;
        let detector = objdetect::CascadeClassifier::new(&xml)?;
        anyhow::ensure!(
            Path::new(EMOTION_MODEL).exists(),
            "emotion model not found at {EMOTION_MODEL}"
        );
        let net = dnn::read_net_from_onnx(EMOTION_MODEL)
            .with_context(|| format!("loading {EMOTION_MODEL}"))?;
        Ok(Self { detector, net })
    }

    /// Detect faces in `frame` and score each one.
    pub fn classify(&mut self, frame: &Mat) -> Result<Vec<Detection>, AnalyzeError> {
        let gray = convert_to_grayscale(frame).map_err(AnalyzeError::Detection)?;
        let faces = self.detect_faces(&gray).map_err(AnalyzeError::Detection)?;

        let mut detections = Vec::with_capacity(faces.len());
        for region in &faces {
            let scores = self
                .score_region(&gray, region)
                .map_err(AnalyzeError::Inference)?;
            let dominant = dominant_of(&scores);
            detections.push(Detection {
                region,
                dominant,
                scores,
            });
        }
        Ok(detections)
    }

    fn detect_faces(&mut self, gray: &Mat) -> opencv::Result<types::VectorOfRect> {
        let mut faces = types::VectorOfRect::new();
        self.detector.detect_multi_scale(
            gray,
            &mut faces,
            1.1,
            2,
            objdetect::CASCADE_SCALE_IMAGE,
            core::Size {
                width: 30,
                height: 30,
            },
            core::Size {
                width: 0,
                height: 0,
            },
        )?;
        Ok(faces)
    }

    fn score_region(&mut self, gray: &Mat, region: Rect) -> opencv::Result<Vec<(Emotion, f32)>> {
        let face = Mat::roi(gray, region)?;
        let blob = dnn::blob_from_image(
            &face,
            1.0 / 255.0,
            Size::new(NET_INPUT, NET_INPUT),
            Scalar::default(),
            false,
            false,
            core::CV_32F,
        )?;
        self.net.set_input(&blob, "", 1.0, Scalar::default())?;
        let output = self.net.forward_single("")?;

        let mut raw = Vec::with_capacity(Emotion::ALL.len());
        for (i, emotion) in Emotion::ALL.into_iter().enumerate() {
            raw.push((emotion, *output.at::<f32>(i as i32)?));
        }
        Ok(softmax_percent(raw))
    }
}

/// The detection statistics follow: the largest face by area.
pub fn primary_detection(detections: &[Detection]) -> Option<&Detection> {
    detections
        .iter()
        .max_by_key(|detection| detection.region.width * detection.region.height)
}

/// Draw a box and a `label (score)` text for every detection.
pub fn annotate(frame: &mut Mat, detections: &[Detection]) -> Result<(), AnalyzeError> {
    for detection in detections {
        draw_detection(frame, detection).map_err(AnalyzeError::Annotate)?;
    }
    Ok(())
}

fn draw_detection(frame: &mut Mat, detection: &Detection) -> opencv::Result<()> {
    let green = Scalar::new(0.0, 255.0, 0.0, 0.0);
    imgproc::rectangle(frame, detection.region, green, 2, imgproc::LINE_8, 0)?;
    let label = format!("{} ({:.2})", detection.dominant, detection.top_score());
    imgproc::put_text(
        frame,
        &label,
        Point::new(detection.region.x, detection.region.y - 10),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.7,
        green,
        2,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}

pub fn convert_to_grayscale(image: &Mat) -> opencv::Result<Mat> {
    let mut gray = Mat::default();
    imgproc::cvt_color_def(image, &mut gray, imgproc::COLOR_BGR2GRAY)?;
    Ok(gray)
}

fn dominant_of(scores: &[(Emotion, f32)]) -> Emotion {
    scores
        .iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
        .map(|(emotion, _)| *emotion)
        .unwrap_or(Emotion::Neutral)
}

/// Softmax over the raw network outputs, scaled to percentages.
fn softmax_percent(raw: Vec<(Emotion, f32)>) -> Vec<(Emotion, f32)> {
    let max = raw.iter().map(|(_, v)| *v).fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = raw.iter().map(|(_, v)| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    raw.iter()
        .zip(exps)
        .map(|((emotion, _), exp)| (*emotion, 100.0 * exp / total))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(width: i32, height: i32, dominant: Emotion) -> Detection {
        Detection {
            region: Rect::new(0, 0, width, height),
            dominant,
            scores: vec![(dominant, 90.0), (Emotion::Neutral, 10.0)],
        }
    }

    #[test]
    fn label_set_is_distinct() {
        let labels: std::collections::HashSet<_> =
            Emotion::ALL.iter().map(|e| e.label()).collect();
        assert_eq!(labels.len(), Emotion::ALL.len());
    }

    #[test]
    fn softmax_scores_sum_to_one_hundred() {
        let raw = vec![
            (Emotion::Angry, 2.5),
            (Emotion::Happy, 0.1),
            (Emotion::Neutral, -1.0),
        ];
        let scores = softmax_percent(raw);
        let total: f32 = scores.iter().map(|(_, s)| s).sum();
        assert!((total - 100.0).abs() < 1e-3);
    }

    #[test]
    fn softmax_preserves_ranking() {
        let scores = softmax_percent(vec![(Emotion::Sad, 4.0), (Emotion::Fear, 1.0)]);
        assert_eq!(dominant_of(&scores), Emotion::Sad);
        assert!(scores[0].1 > scores[1].1);
    }

    #[test]
    fn dominant_is_highest_score() {
        let scores = vec![
            (Emotion::Angry, 12.0),
            (Emotion::Happy, 70.0),
            (Emotion::Neutral, 18.0),
        ];
        assert_eq!(dominant_of(&scores), Emotion::Happy);
    }

    #[test]
    fn primary_detection_prefers_largest_area() {
        let detections = vec![
            detection(40, 40, Emotion::Sad),
            detection(120, 110, Emotion::Happy),
            detection(60, 60, Emotion::Angry),
        ];
        let primary = primary_detection(&detections).unwrap();
        assert_eq!(primary.dominant, Emotion::Happy);
    }

    #[test]
    fn no_detections_has_no_primary() {
        assert!(primary_detection(&[]).is_none());
    }

    #[test]
    fn detection_reports_its_top_score() {
        assert!((detection(10, 10, Emotion::Fear).top_score() - 90.0).abs() < f32::EPSILON);
    }
}
