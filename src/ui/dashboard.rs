use eframe::egui;
use egui_plot::{Line, Plot, PlotPoints};

use crate::app::{DashboardState, Snapshot};
use crate::config;
use crate::data::models::PriceTable;
use crate::ui::chart_utils::{date_label, date_to_x, faint, height_control, series_color};

pub fn render(ui: &mut egui::Ui, state: &mut DashboardState, snapshot: &Snapshot) {
    ui.heading("ETF Price Forecasts");
    ui.add_space(8.0);

    let Some(table) = snapshot.table.as_deref() else {
        match &snapshot.error {
            Some(e) => ui.colored_label(egui::Color32::from_rgb(220, 50, 50), e),
            None => ui.label("Waiting for the prediction file..."),
        };
        return;
    };

    state.ensure_selection(table);

    // Key metrics row
    ui.horizontal(|ui| {
        metric_card(ui, "Symbols", &table.symbols.len().to_string());
        if let Some(last) = table.last_observed_date() {
            metric_card(ui, "Last Observed", &last.to_string());
        }
        let n_predicted = table.is_predicted.iter().filter(|p| **p).count();
        metric_card(ui, "Forecast Days", &n_predicted.to_string());
        if let Some(end) = table.dates.last() {
            metric_card(ui, "Forecast Through", &end.to_string());
        }
    });

    ui.add_space(12.0);
    ui.strong("Symbols");
    ui.horizontal_wrapped(|ui| {
        for symbol in &table.symbols {
            let mut checked = state.selected.contains(symbol);
            if ui.checkbox(&mut checked, symbol.as_str()).changed() {
                if checked {
                    state.selected.push(symbol.clone());
                } else {
                    state.selected.retain(|s| s != symbol);
                }
            }
        }
    });

    ui.add_space(12.0);
    ui.separator();
    ui.add_space(8.0);

    render_price_chart(ui, state, table);

    ui.add_space(16.0);
    ui.separator();
    ui.add_space(8.0);

    render_recent_table(ui, state, table);
}

/// Observed prices as solid lines, forecasts as faint continuations from
/// the last observed point.
fn render_price_chart(ui: &mut egui::Ui, state: &mut DashboardState, table: &PriceTable) {
    ui.heading("Price History & Forecast");
    ui.add_space(4.0);

    if state.selected.is_empty() {
        ui.label("Select at least one symbol.");
        return;
    }

    let last_observed = table.is_predicted.iter().rposition(|p| !*p);

    height_control(ui, &mut state.chart_height, "Price Chart Height");
    Plot::new("forecast_price_plot")
        .height(state.chart_height)
        .allow_drag(true)
        .allow_scroll(false)
        .allow_zoom(false)
        .x_axis_label("Date")
        .y_axis_label("Price ($)")
        .x_axis_formatter(|mark, _range| date_label(mark.value))
        .label_formatter(|name, value| {
            format!("{}\n{}\n${:.2}", name, date_label(value.x), value.y)
        })
        .legend(egui_plot::Legend::default())
        .show(ui, |plot_ui| {
            for (i, symbol) in state.selected.iter().enumerate() {
                let Some(s) = table.symbol_index(symbol) else {
                    continue;
                };
                let color = series_color(i);
                let point = |row: usize| [date_to_x(table.dates[row]), table.prices[[row, s]]];

                let observed: PlotPoints = (0..table.n_rows())
                    .filter(|&row| !table.is_predicted[row])
                    .map(point)
                    .collect();
                plot_ui.line(Line::new(observed).name(symbol).color(color).width(1.5));

                let forecast: PlotPoints = last_observed
                    .into_iter()
                    .chain((0..table.n_rows()).filter(|&row| table.is_predicted[row]))
                    .map(point)
                    .collect();
                plot_ui.line(
                    Line::new(forecast)
                        .name(format!("{} forecast", symbol))
                        .color(faint(color))
                        .width(2.0),
                );
            }
        });
}

/// Last rows of the artifact, one line per selected symbol.
fn render_recent_table(ui: &mut egui::Ui, state: &DashboardState, table: &PriceTable) {
    ui.heading("Recent Values");
    ui.add_space(4.0);

    let rows = table.tail_rows(config::DASHBOARD_TABLE_ROWS);
    egui::Grid::new("recent_values")
        .striped(true)
        .min_col_width(90.0)
        .show(ui, |ui| {
            ui.strong("Symbol");
            for row in rows.clone() {
                let date = table.dates[row].to_string();
                if table.is_predicted[row] {
                    ui.strong(format!("{} (f)", date)).on_hover_text("Forecast");
                } else {
                    ui.strong(date);
                }
            }
            ui.end_row();

            for symbol in &state.selected {
                let Some(s) = table.symbol_index(symbol) else {
                    continue;
                };
                ui.label(symbol);
                for row in rows.clone() {
                    ui.label(format!("{:.2}", table.prices[[row, s]]));
                }
                ui.end_row();
            }
        });
}

fn metric_card(ui: &mut egui::Ui, label: &str, value: &str) {
    egui::Frame::group(ui.style())
        .inner_margin(egui::Margin::same(8.0))
        .show(ui, |ui| {
            ui.vertical(|ui| {
                ui.small(label);
                ui.strong(value);
            });
        });
}
