//! `seed-sources` — insert the default source rows.

use std::process::ExitCode;

use anyhow::Result;

use crate::cli::settings::Settings;
use crate::cli::{open_store, EXIT_OK};

pub async fn seed_sources(settings: &Settings) -> Result<ExitCode> {
    let store = open_store(settings).await?;
    let seeded = store.seed_sources().await?;
    let sources = store.list_sources().await?;
    println!("Seeded {seeded} new source(s); {} total:", sources.len());
    for source in sources {
        println!(
            "  {:<6} {} (stagger {}s)",
            source.code, source.label, source.stagger_offset_seconds
        );
    }
    Ok(ExitCode::from(EXIT_OK))
}
