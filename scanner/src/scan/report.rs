use reducecore::prelude::FrameSummary;

use super::config::FailedRowPolicy;
use super::runner::FrameOutcome;

/// Render the scan report: one line per retained frame, ascending by index,
/// as `index, spots_total, spots_good, resol_one, resol_two, mosaic,
/// saturation, volume`.
pub fn render(outcomes: &[FrameOutcome], policy: FailedRowPolicy, omit_empty: bool) -> String {
    let mut rows: Vec<(usize, FrameSummary)> = Vec::new();
    for outcome in outcomes {
        match &outcome.result {
            Ok(summary) => rows.push((outcome.index, summary.clone())),
            Err(_) => match policy {
                FailedRowPolicy::SentinelFill => {
                    rows.push((outcome.index, FrameSummary::default()))
                }
                FailedRowPolicy::Drop => {}
            },
        }
    }
    rows.sort_by_key(|(index, _)| *index);

    let mut report = String::new();
    for (index, summary) in rows {
        if omit_empty && summary.unit_cell_volume == 0.0 {
            continue;
        }
        report.push_str(&format!(
            "{:3} {:6} {:6} {:6.2} {:6.2} {:6.2} {:6.2} {:9.0}\n",
            index,
            summary.spots_total,
            summary.spots_good,
            summary.resolution_one,
            summary.resolution_two,
            summary.mosaicity,
            summary.saturation,
            summary.unit_cell_volume,
        ));
    }
    report
}
