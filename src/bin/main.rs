use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use emotion_tracker::analyzer::EmotionClassifier;
use emotion_tracker::{app, camera, report};
use opencv::highgui;
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ctrl-c behaves like the quit key so the report still gets written
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))?;

    let mut classifier = EmotionClassifier::new()?;

    let camera = match camera::acquire() {
        Ok(camera) => camera,
        Err(err) => {
            println!("error: {err}");
            println!("check that:");
            println!("  1. a camera is connected");
            println!("  2. no other application is using it");
            println!("  3. camera permissions are granted");
            return Ok(());
        }
    };

    println!("press 'q' to quit and generate the report");
    println!("press 'r' to reset the statistics");

    let mut session = app::EmotionSession::new();
    let loop_result = app::run_interactive(&mut session, camera, &mut classifier, &interrupted);
    let _ = highgui::destroy_all_windows();
    if let Err(err) = loop_result {
        warn!("capture loop aborted: {err:#}");
    }

    let report = report::generate(session.session());
    println!("\n{}", "=".repeat(50));
    print!("{}", report.text);
    println!("{}", "=".repeat(50));

    if report::save_chart(&report, Path::new(report::CHART_FILE))? {
        println!("chart saved to {}", report::CHART_FILE);
    }

    Ok(())
}
