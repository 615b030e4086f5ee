// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `missive sweep` command implementation.

use std::sync::Arc;

use missive_bus::EventBus;
use missive_config::MissiveConfig;
use missive_core::{MissiveError, Storage};
use missive_expiry::ExpirationScheduler;

/// Run one expiration sweep and report what it removed.
pub async fn run_sweep(config: &MissiveConfig) -> Result<(), MissiveError> {
    let storage: Arc<dyn Storage> = Arc::new(crate::open_storage(config).await?);
    let scheduler = ExpirationScheduler::new(storage, EventBus::default(), &config.expiry);

    let removed = scheduler.sweep().await?;
    if removed.is_empty() {
        println!("nothing to expire");
        return Ok(());
    }
    for message in &removed {
        println!(
            "expired {} in {} (due {})",
            message.id,
            message.conversation_id,
            message.expires_at().unwrap_or_default()
        );
    }
    println!("{} message(s) removed", removed.len());
    Ok(())
}
