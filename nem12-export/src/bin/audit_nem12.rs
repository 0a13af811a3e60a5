use anyhow::{bail, Context, Result};
use nem12_export::{audit::audit_records, config::AppConfig, nem12::read_records, observability};
use std::{env, fs, path::PathBuf};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: audit_nem12 <nem12_dir>");
    }
    let dir = PathBuf::from(&args[1]);

    // The alert threshold is optional; audit without it when no config is present.
    let alert = AppConfig::load()
        .ok()
        .and_then(|cfg| cfg.export.daily_total_alert);

    let mut paths: Vec<PathBuf> = fs::read_dir(&dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")))
        .collect();
    paths.sort();

    let mut findings = 0usize;
    let mut unreadable = 0usize;
    for path in &paths {
        let records = match fs::File::open(path)
            .map_err(anyhow::Error::from)
            .and_then(|f| read_records(f).map_err(anyhow::Error::from))
        {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(file = %path.display(), error = %format!("{e:#}"), "unreadable NEM12 file");
                unreadable += 1;
                continue;
            }
        };

        for finding in audit_records(&records, alert) {
            println!("{}: {finding}", path.display());
            findings += 1;
        }
    }

    println!(
        "scanned {} file(s): {findings} finding(s), {unreadable} unreadable",
        paths.len()
    );
    Ok(())
}
