use super::ui;
use crate::core::reference::ReferenceTable;
use comfy_table::Cell;

/// Renders the supported currencies with their reference rate against the pivot.
pub fn display_table(reference: &ReferenceTable) -> String {
    let pivot = reference.pivot();
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Currency"),
        ui::header_cell("Name"),
        ui::header_cell(&format!("Reference (1 {pivot})")),
    ]);
    for (code, name) in reference.names() {
        table.add_row(vec![
            Cell::new(code),
            Cell::new(name),
            ui::rate_cell(reference.rate_or_default(pivot, code), true),
        ]);
    }
    table.to_string()
}

pub fn run(reference: &ReferenceTable) {
    println!(
        "\n{}",
        ui::style_text("Supported currencies", ui::StyleType::Title)
    );
    println!("{}", display_table(reference));
}
