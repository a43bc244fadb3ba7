use super::ui;
use crate::core::currency::{RateSnapshot, RateSource};
use crate::core::reference::ReferenceTable;
use crate::core::resolver::parse_request;
use crate::service::RateService;
use anyhow::Result;
use comfy_table::Cell;

impl RateSnapshot {
    /// Renders the snapshot as a table of code, name and rate.
    pub fn display_as_table(&self, reference: &ReferenceTable) -> String {
        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("Currency"),
            ui::header_cell("Name"),
            ui::header_cell(&format!("Rate (1 {})", self.base)),
        ]);

        for (code, rate) in &self.rates {
            table.add_row(vec![
                Cell::new(code),
                ui::optional_text_cell(reference.name(code)),
                ui::rate_cell(*rate, self.estimated.contains(code)),
            ]);
        }
        table.to_string()
    }

    /// One line describing where the rates came from.
    pub fn provenance(&self) -> String {
        let origin = match (&self.source, &self.provider) {
            (RateSource::Mock, _) | (_, None) => "reference table".to_string(),
            (_, Some(provider)) => format!("provider '{provider}'"),
        };
        let mut line = format!(
            "Source: {} from {}, fetched {}",
            self.source,
            origin,
            self.fetched_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        if self.source == RateSource::Partial {
            let estimated: Vec<&str> = self.estimated.iter().map(|c| c.as_str()).collect();
            line.push_str(&format!(" (estimated: {})", estimated.join(", ")));
        }
        line
    }
}

pub async fn run(service: &RateService, base: Option<&str>, targets: &[String]) -> Result<()> {
    let base = base.unwrap_or(service.default_base().as_str());
    let (base, targets) = parse_request(base, targets)?;
    let reference = service.resolver().reference();

    let snapshot = if targets.is_empty() {
        RateSnapshot {
            rates: reference.rates_for(&base),
            estimated: reference.supported().into_iter().filter(|c| *c != base).collect(),
            base,
            fetched_at: chrono::Utc::now(),
            source: RateSource::Mock,
            provider: None,
        }
    } else {
        let spinner = ui::new_spinner(&format!("Fetching rates for {base}"));
        let snapshot = service.rates_for(&base, &targets).await;
        spinner.finish_and_clear();
        snapshot?
    };

    println!(
        "\nExchange rates: {}",
        ui::style_text(snapshot.base.as_str(), ui::StyleType::Title)
    );
    println!("{}", snapshot.display_as_table(reference));
    println!(
        "{}",
        ui::style_text(&snapshot.provenance(), ui::StyleType::Subtle)
    );
    if snapshot.source == RateSource::Mock && !targets.is_empty() {
        println!(
            "{}",
            ui::style_text(
                "Live rates are unavailable; showing approximate reference rates",
                ui::StyleType::Warning
            )
        );
    }
    Ok(())
}
