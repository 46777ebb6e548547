//! Evaluate a delivery window.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use geocast_core::DeliveryTimeWindow;

/// Run the window command.
pub fn run(days: Option<&str>, interval: Option<&str>, at: NaiveDateTime) -> Result<()> {
    let window = DeliveryTimeWindow::parse(days, interval).context("Invalid delivery window")?;
    if window.is_appropriate_at(at) {
        println!("appropriate");
    } else {
        println!("not appropriate");
    }
    Ok(())
}
