use super::ui;
use crate::core::currency::{CurrencyCode, RateSource};
use crate::core::reference::ReferenceTable;
use crate::service::RatesView;
use crate::subscription::RateFeed;
use anyhow::Result;
use tracing::info;

fn print_view(view: &RatesView, reference: &ReferenceTable) {
    if let Some(error) = &view.error {
        println!(
            "{}",
            ui::style_text(&format!("Refresh failed: {error}"), ui::StyleType::Error)
        );
    }
    match &view.rates {
        Some(snapshot) if !view.is_loading => {
            println!("{}", snapshot.display_as_table(reference));
            println!(
                "{}",
                ui::style_text(&snapshot.provenance(), ui::StyleType::Subtle)
            );
            if snapshot.source == RateSource::Mock {
                println!(
                    "{}",
                    ui::style_text(
                        "Live rates are unavailable; showing approximate reference rates",
                        ui::StyleType::Warning
                    )
                );
            }
        }
        Some(_) => println!("{}", ui::style_text("Refreshing...", ui::StyleType::Subtle)),
        None => println!("{}", ui::style_text("Loading...", ui::StyleType::Subtle)),
    }
}

/// Prints every update for `base` until Ctrl-C.
pub async fn run(feed: &RateFeed, base: &CurrencyCode) -> Result<()> {
    let reference = feed.service().resolver().reference();
    let mut subscription = feed.subscribe(base);
    println!(
        "\nWatching {} (refresh every {}s, Ctrl-C to stop)",
        ui::style_text(base.as_str(), ui::StyleType::Title),
        feed.scheduler().period().as_secs()
    );
    print_view(&subscription.current(), reference);

    loop {
        tokio::select! {
            changed = subscription.changed() => {
                if !changed {
                    break;
                }
                print_view(&subscription.current(), reference);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping watch");
                break;
            }
        }
    }
    Ok(())
}
