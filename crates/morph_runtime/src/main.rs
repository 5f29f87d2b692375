//! Morph Runtime
//!
//! Boots logging, loads settings and runs the object lifecycle demo.

use anyhow::Result;
use morph_runtime::demo;
use morph_runtime::settings::Settings;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    tracing::info!("Morph v{}", morph_core::VERSION);
    let settings = match std::env::args().nth(1) {
        Some(path) => {
            tracing::info!("Loading settings from {path}");
            Settings::load(&path)?
        }
        None => Settings::default(),
    };

    let report = demo::run(&settings.demo)?;
    tracing::info!(
        objects = report.objects,
        mobile = report.mobile,
        failed_copies = report.failed_copies,
        "Demo finished"
    );

    if settings.report.print_counters {
        for component in &report.components {
            tracing::info!(
                component = %component.name,
                live = component.live_instances,
                "Component counters"
            );
        }
        tracing::info!("Report: {}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}
