//! Dashboard rendering.
//!
//! Turns a [`TelemetryState`] and the static route panel into either text
//! lines for the terminal or a JSON document.

use serde::Serialize;

use crate::config::RouteConfig;
use crate::error::Result;
use crate::telemetry::{Coordinates, TelemetryState};

/// A JSON view of one render pass.
#[derive(Debug, Serialize)]
pub struct DashboardView<'a> {
    /// Clock in `HH時MM分SS秒` form.
    pub clock: String,
    /// Speed in km/h with one decimal, or `"0"`.
    pub speed_kmh: &'a str,
    /// Current position, if held.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    /// Resolved place, empty without coordinates.
    pub place_name: &'a str,
    /// The static route panel.
    pub route: &'a RouteConfig,
}

impl<'a> DashboardView<'a> {
    /// Build a view.
    #[must_use]
    pub fn new(state: &'a TelemetryState, route: &'a RouteConfig) -> Self {
        Self {
            clock: state.clock.to_cab_string(),
            speed_kmh: state.speed.as_str(),
            coordinates: state.coordinates,
            place_name: state.place_name.as_str(),
            route,
        }
    }
}

/// Render the dashboard as text lines.
///
/// The position line only appears while coordinates are held.
#[must_use]
pub fn render_lines(state: &TelemetryState, route: &RouteConfig) -> Vec<String> {
    let mut lines = Vec::with_capacity(9);
    lines.push(format!("{} 運転情報", route.line_code));
    lines.push(format!("時刻      {}", state.clock.to_cab_string()));
    lines.push(format!("速度      {} km/h", state.speed));
    lines.push(format!("キロ程    {}", route.distance_marker));
    if let Some(coordinates) = state.coordinates {
        if state.place_name.is_empty() {
            lines.push(format!("現在地    {coordinates}"));
        } else {
            lines.push(format!("現在地    {coordinates}  {}", state.place_name));
        }
    }
    lines.push(format!("運行パターン {} {}", route.service_type, route.pattern));
    lines.push(format!("運行番号  {} {}", route.run_number, route.run_suffix));
    lines.push(format!("{} → {}", route.origin, route.next_stop));
    lines.push(format!("{} {} 行", route.service_type, route.terminal));
    lines
}

/// Render the dashboard as one block of text.
#[must_use]
pub fn render_text(state: &TelemetryState, route: &RouteConfig) -> String {
    render_lines(state, route).join("\n")
}

/// Render the dashboard as a single-line JSON document.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn render_json(state: &TelemetryState, route: &RouteConfig) -> Result<String> {
    Ok(serde_json::to_string(&DashboardView::new(state, route))?)
}
