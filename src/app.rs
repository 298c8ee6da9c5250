use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use eframe::egui;
use tokio::sync::{watch, Notify};

use crate::config::{self, ForecastConfig};
use crate::data::artifact;
use crate::data::models::PriceTable;
use crate::ui;

/// Immutable view of the prediction artifact published to the UI.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub table: Option<Arc<PriceTable>>,
    pub loaded_at: Option<String>,
    /// Last refresh failure; the previous table is kept alongside it
    pub error: Option<String>,
}

/// UI-owned state, independent of the data snapshot
pub struct DashboardState {
    pub selected: Vec<String>,
    pub chart_height: f32,
    pub status_message: String,
    selection_initialized: bool,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            selected: Vec::new(),
            chart_height: 360.0,
            status_message: "Loading predictions...".to_string(),
            selection_initialized: false,
        }
    }
}

impl DashboardState {
    /// Pick the default symbols the first time a table arrives, and drop
    /// selections the table no longer carries.
    pub fn ensure_selection(&mut self, table: &PriceTable) {
        if !self.selection_initialized {
            self.selected = config::DASHBOARD_DEFAULT_SYMBOLS
                .iter()
                .filter(|s| table.symbol_index(s).is_some())
                .map(|s| s.to_string())
                .collect();
            if self.selected.is_empty() {
                self.selected.extend(table.symbols.first().cloned());
            }
            self.selection_initialized = true;
        } else {
            self.selected.retain(|s| table.symbol_index(s).is_some());
        }
    }
}

/// Reload the artifact once and publish the result. A failed load keeps the
/// previous table and records the error.
pub async fn refresh_once(tx: &watch::Sender<Arc<Snapshot>>, path: &Path) {
    let previous = tx.borrow().clone();
    let owned = path.to_path_buf();
    let loaded = tokio::task::spawn_blocking(move || artifact::read_predictions(&owned)).await;

    let next = match loaded {
        Ok(Ok(table)) => {
            tracing::debug!("Reloaded {} rows from {}", table.n_rows(), path.display());
            Snapshot {
                table: Some(Arc::new(table)),
                loaded_at: Some(chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
                error: None,
            }
        }
        Ok(Err(e)) => {
            tracing::warn!("Failed to reload predictions: {:#}", e);
            Snapshot {
                error: Some(format!("{:#}", e)),
                ..(*previous).clone()
            }
        }
        Err(e) => {
            tracing::warn!("Prediction reload task failed: {}", e);
            Snapshot {
                error: Some(e.to_string()),
                ..(*previous).clone()
            }
        }
    };
    tx.send_replace(Arc::new(next));
}

/// Refresh on a fixed period, or early when `wake` is notified. Stops once
/// every receiver is gone.
pub async fn refresh_loop<F>(
    tx: watch::Sender<Arc<Snapshot>>,
    path: PathBuf,
    period: Duration,
    wake: Arc<Notify>,
    on_update: F,
) where
    F: Fn() + Send + 'static,
{
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = wake.notified() => ticker.reset(),
        }
        if tx.is_closed() {
            break;
        }
        refresh_once(&tx, &path).await;
        on_update();
    }
}

/// Main application struct for eframe
pub struct ForecastDashboardApp {
    pub state: DashboardState,
    snapshot: watch::Receiver<Arc<Snapshot>>,
    wake: Arc<Notify>,
    predictions_path: PathBuf,
    pub tokio_rt: tokio::runtime::Runtime,
}

impl ForecastDashboardApp {
    pub fn new(cc: &eframe::CreationContext<'_>, cfg: &ForecastConfig, tokio_rt: tokio::runtime::Runtime) -> Self {
        let (tx, rx) = watch::channel(Arc::new(Snapshot::default()));
        let wake = Arc::new(Notify::new());
        let predictions_path = cfg.predictions_path();
        let period = Duration::from_secs(cfg.refresh_secs.max(1));

        let ctx = cc.egui_ctx.clone();
        tokio_rt.spawn(refresh_loop(
            tx,
            predictions_path.clone(),
            period,
            wake.clone(),
            move || ctx.request_repaint(),
        ));
        tracing::info!(
            "Dashboard watching {} every {}s",
            predictions_path.display(),
            period.as_secs()
        );

        Self {
            state: DashboardState::default(),
            snapshot: rx,
            wake,
            predictions_path,
            tokio_rt,
        }
    }

    fn update_status(&mut self, snapshot: &Snapshot) {
        self.state.status_message = match (&snapshot.loaded_at, &snapshot.error) {
            (_, Some(e)) => format!("Refresh failed: {}", e),
            (Some(at), None) => format!("{} loaded at {}", self.predictions_path.display(), at),
            (None, None) => "Loading predictions...".to_string(),
        };
    }
}

impl eframe::App for ForecastDashboardApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let snapshot = self.snapshot.borrow().clone();
        self.update_status(&snapshot);

        egui::TopBottomPanel::top("title_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.strong("ETF Forecaster");
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui.button("Reload Now").clicked() {
                        self.wake.notify_one();
                    }
                });
            });
        });

        // Bottom status bar
        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(&self.state.status_message);
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical()
                .auto_shrink(false)
                .show(ui, |ui| ui::dashboard::render(ui, &mut self.state, &snapshot));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ndarray::array;
    use tempfile::tempdir;

    fn table(symbols: &[&str]) -> PriceTable {
        let d = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        PriceTable::new(
            vec![d],
            symbols.iter().map(|s| s.to_string()).collect(),
            ndarray::Array2::ones((1, symbols.len())),
            vec![false],
        )
        .unwrap()
    }

    #[test]
    fn test_default_selection_prefers_spy_and_qqq() {
        let mut state = DashboardState::default();
        state.ensure_selection(&table(&["IWM", "QQQ", "SPY"]));
        assert_eq!(state.selected, vec!["SPY", "QQQ"]);

        let mut state = DashboardState::default();
        state.ensure_selection(&table(&["IWM", "DIA"]));
        assert_eq!(state.selected, vec!["IWM"]);

        // later tables only prune
        state.selected.push("DIA".into());
        state.ensure_selection(&table(&["DIA"]));
        assert_eq!(state.selected, vec!["DIA"]);
    }

    #[tokio::test]
    async fn test_refresh_keeps_previous_table_on_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("forecast.parquet");
        let (tx, rx) = watch::channel(Arc::new(Snapshot::default()));

        refresh_once(&tx, &path).await;
        assert!(rx.borrow().table.is_none());
        assert!(rx.borrow().error.is_some());

        let written = PriceTable::new(
            vec![NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()],
            vec!["SPY".into()],
            array![[470.0]],
            vec![false],
        )
        .unwrap();
        artifact::write_predictions(&path, &written).unwrap();
        refresh_once(&tx, &path).await;
        let loaded = rx.borrow().clone();
        assert_eq!(loaded.table.as_deref(), Some(&written));
        assert!(loaded.error.is_none());

        std::fs::write(&path, b"not parquet").unwrap();
        refresh_once(&tx, &path).await;
        let after = rx.borrow().clone();
        assert!(Arc::ptr_eq(
            after.table.as_ref().unwrap(),
            loaded.table.as_ref().unwrap()
        ));
        assert!(after.error.is_some());
    }
}
