/// Shared chart utilities for the dashboard plots.

use chrono::NaiveDate;
use eframe::egui;

/// Line colors cycled across selected symbols
const PALETTE: &[egui::Color32] = &[
    egui::Color32::from_rgb(100, 150, 255),
    egui::Color32::from_rgb(255, 100, 100),
    egui::Color32::from_rgb(100, 220, 100),
    egui::Color32::from_rgb(255, 180, 50),
    egui::Color32::from_rgb(190, 120, 255),
    egui::Color32::from_rgb(80, 210, 210),
];

pub fn series_color(idx: usize) -> egui::Color32 {
    PALETTE[idx % PALETTE.len()]
}

/// Washed-out variant used for forecast segments.
pub fn faint(color: egui::Color32) -> egui::Color32 {
    color.gamma_multiply(0.35)
}

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

/// Plot x coordinate of a date: days since 1970-01-01.
pub fn date_to_x(date: NaiveDate) -> f64 {
    (date - epoch()).num_days() as f64
}

pub fn x_to_date(x: f64) -> Option<NaiveDate> {
    if !x.is_finite() {
        return None;
    }
    epoch().checked_add_signed(chrono::Duration::try_days(x.round() as i64)?)
}

/// Axis tick label for an x coordinate.
pub fn date_label(x: f64) -> String {
    x_to_date(x)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// Inline height-adjustment drag control placed immediately above a chart.
pub fn height_control(ui: &mut egui::Ui, height: &mut f32, label: &str) {
    egui::Frame::none()
        .fill(egui::Color32::from_rgba_unmultiplied(80, 120, 200, 18))
        .inner_margin(egui::Margin::symmetric(8.0, 3.0))
        .rounding(egui::Rounding::same(4.0))
        .show(ui, |ui| {
            ui.horizontal(|ui| {
                ui.colored_label(egui::Color32::from_rgb(100, 160, 255), "⇕");
                ui.colored_label(egui::Color32::from_gray(170), label);
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.add(
                        egui::DragValue::new(height)
                            .speed(2.0)
                            .range(80.0..=800.0)
                            .suffix(" px"),
                    );
                    ui.colored_label(egui::Color32::from_gray(130), "drag to resize ·");
                });
            });
        });
    ui.add_space(2.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_axis_round_trip() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(x_to_date(date_to_x(d)), Some(d));
        assert_eq!(date_to_x(epoch()), 0.0);
        assert_eq!(date_label(date_to_x(d) + 0.2), "2024-02-29");
        assert_eq!(date_label(f64::NAN), "");
    }

    #[test]
    fn test_palette_cycles() {
        assert_eq!(series_color(0), series_color(PALETTE.len()));
        assert_ne!(faint(series_color(1)), series_color(1));
    }
}
