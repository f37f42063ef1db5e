// src/report.rs
//
// Result sink. Writes the finished TrafficResult to the result directory:
//   result.txt   human-readable summary + one line per tracked vehicle
//   result.json  the same record and the tracked list, machine-readable

use crate::analysis::vehicle_tracker::TrackedVehicle;
use crate::pipeline::result::TrafficResult;
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

pub const TEXT_REPORT: &str = "result.txt";
pub const JSON_REPORT: &str = "result.json";

#[derive(Debug, Clone)]
pub struct SavedReport {
    pub text: PathBuf,
    pub json: PathBuf,
}

pub fn save(dir: &Path, result: &TrafficResult, tracked: &[TrackedVehicle]) -> Result<SavedReport> {
    fs::create_dir_all(dir)
        .with_context(|| format!("creating result directory {}", dir.display()))?;
    let stamp = chrono::Local::now();

    let text_path = dir.join(TEXT_REPORT);
    let mut file = fs::File::create(&text_path)
        .with_context(|| format!("creating {}", text_path.display()))?;
    writeln!(file, "Generated: {}", stamp.format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(file)?;
    file.write_all(console_summary(result).as_bytes())?;
    writeln!(file)?;
    writeln!(file, "Tracked vehicles:")?;
    if tracked.is_empty() {
        writeln!(file, "  (none)")?;
    }
    for v in tracked {
        writeln!(
            file,
            "  V{:<3} lane {:<2} ({:.1}, {:.1}) -> ({:.1}, {:.1})  {:.1} px",
            v.id, v.lane, v.first.x, v.first.y, v.second.x, v.second.y, v.axial_displacement_px
        )?;
    }
    file.flush()?;

    let json_path = dir.join(JSON_REPORT);
    let json_value = serde_json::json!({
        "generated_at": stamp.to_rfc3339(),
        "result": result,
        "tracked_vehicles": tracked,
    });
    fs::write(&json_path, serde_json::to_string_pretty(&json_value)?)
        .with_context(|| format!("writing {}", json_path.display()))?;

    info!("💾 Result saved to {}", dir.display());
    Ok(SavedReport {
        text: text_path,
        json: json_path,
    })
}

/// Summary block printed with --show and written at the top of result.txt
pub fn console_summary(result: &TrafficResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "═══════════════ TRAFFIC ESTIMATE ═══════════════");
    let _ = writeln!(out, "Prediction:         {}", result.prediction);
    let _ = writeln!(out, "Density:            {:.1} %", result.density);
    let _ = writeln!(out, "Average flow speed: {:.1} km/h", result.average_flow_speed);
    let _ = writeln!(out, "Highest lane flow:  {}", result.highest_lane_label());
    let _ = writeln!(
        out,
        "Vehicles:           {} detected, {} tracked",
        result.total_detected_vehicles, result.total_tracked_vehicles
    );
    for flow in &result.lane_flows {
        let _ = writeln!(
            out,
            "  lane {:<2} {:>3} vehicle(s)  {:>6.1} km/h",
            flow.lane, flow.vehicle_count, flow.mean_speed_kmh
        );
    }
    let _ = writeln!(out, "Timing (s):");
    let _ = writeln!(
        out,
        "  load {:.3} | capture {:.3} | detection {:.3} | tracking {:.3} | estimation {:.3} | saving {:.3}",
        result.loading_time,
        result.capturing_time,
        result.detection_time,
        result.tracking_time,
        result.estimation_time,
        result.saving_time
    );
    let _ = writeln!(out, "  total   {:.3}", result.total_time);
    out
}
