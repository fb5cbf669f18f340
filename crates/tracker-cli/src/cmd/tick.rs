use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};

use crate::output::print_json;

/// Run one auto-progress cycle and exit.
///
/// `at` evaluates the cycle as of a fixed instant instead of the system clock.
pub fn run(root: &Path, at: Option<&str>, json: bool) -> anyhow::Result<()> {
    let (_, engine) = super::open_engine(root)?;
    let now = match at {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("invalid --at timestamp '{raw}' (expected RFC 3339)"))?
            .with_timezone(&Utc),
        None => engine.now(),
    };

    let report = engine.run_cycle_at(now)?;

    if json {
        print_json(&report)?;
    } else {
        println!(
            "scanned {}, advanced {}, unchanged {}, conflicts {}, failed {}",
            report.scanned, report.advanced, report.unchanged, report.conflicts, report.failed
        );
    }
    Ok(())
}
