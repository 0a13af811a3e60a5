use std::{fmt::Write as _, fs, time::Duration};

use meter_client::domain::{IntervalLength, NmiConfig, Site};
use nem12_export::{
    aggregate::MalformedKind,
    nem12::{read_records, Nem12Record},
    pipeline::{ExportJob, ExportSettings},
    sinks::DirectorySink,
    store::CsvIntervalStore,
};
use rust_decimal::Decimal;
use time::{
    macros::{date, datetime, offset, time},
    Date, OffsetDateTime, PrimitiveDateTime,
};
use tokio_util::sync::CancellationToken;

const SITE: &str = "233-255 Botany Road, Waterloo";
const NMIS: [&str; 2] = ["NCCC000001", "NCCC000002"];
const NOW: OffsetDateTime = datetime!(2025-08-27 09:00:00 +10);

fn settings() -> ExportSettings {
    ExportSettings {
        sites: vec![Site {
            name: SITE.to_string(),
            interval_length: IntervalLength::try_from(30).unwrap(),
            nmis: NMIS.iter().map(|n| NmiConfig::new(*n)).collect(),
        }],
        day_range: 3,
        end_offset: 0,
        offset: offset!(+10),
        from_participant: "X4MDP".to_string(),
        to_participant: "EVERGY".to_string(),
        provider: "Evergy".to_string(),
        daily_total_alert: None,
        max_retries: 0,
        retry_backoff: Duration::ZERO,
    }
}

/// Three complete days before the 27th plus the 27th up to 09:00, for every NMI,
/// minus anything `skip` matches.
fn meter_events(skip: impl Fn(&str, PrimitiveDateTime) -> bool) -> String {
    let mut csv = String::from("site,nmi,timestamp,reading,quality_flag\n");
    let start = date!(2025-08-24).midnight();
    let end = NOW.date().with_time(time!(09:00));
    for nmi in NMIS {
        let mut ts = start;
        let mut i = 0u32;
        while ts < end {
            if !skip(nmi, ts) {
                let value = Decimal::new(125 * i64::from(i % 7), 3);
                writeln!(
                    csv,
                    "\"{SITE}\",{nmi},{}-{:02}-{:02}T{:02}:{:02}:00,{value},A",
                    ts.year(),
                    u8::from(ts.month()),
                    ts.day(),
                    ts.hour(),
                    ts.minute()
                )
                .unwrap();
            }
            ts += time::Duration::minutes(30);
            i += 1;
        }
    }
    csv
}

async fn export(csv: String) -> (tempfile::TempDir, nem12_export::RunReport) {
    let dir = tempfile::tempdir().unwrap();
    let dump = dir.path().join("meter_events.csv");
    fs::write(&dump, csv).unwrap();

    let job = ExportJob::new(
        CsvIntervalStore::new(&dump, offset!(+10)),
        DirectorySink::new(dir.path().join("NEM12")),
        settings(),
    );
    let report = job.run(NOW, &CancellationToken::new()).await.unwrap();
    (dir, report)
}

fn interval_days(records: &[Nem12Record], nmi: &str) -> Vec<(Date, usize)> {
    let mut current = "";
    let mut out = Vec::new();
    for record in records {
        match record {
            Nem12Record::NmiDetails(d) => current = d.nmi.as_str(),
            Nem12Record::IntervalData(d) if current == nmi => out.push((d.date, d.values.len())),
            _ => {}
        }
    }
    out
}

#[tokio::test]
async fn botany_road_window_with_partial_today() {
    let (_dir, report) = export(meter_events(|_, _| false)).await;

    assert!(report.rejected_days.is_empty());
    assert!(report.failed_sites.is_empty());
    assert_eq!(report.files.len(), 1);

    let file = &report.files[0];
    assert_eq!(file.file_name, "NEM12#2025082700001#X4MDP#Evergy.csv");
    assert_eq!(file.nmis, 2);

    let bytes = fs::read(&file.location).unwrap();
    assert_eq!(blake3::hash(&bytes).to_hex().to_string(), file.digest);
    let records = read_records(bytes.as_slice()).unwrap();

    let indicators: Vec<_> = records.iter().map(Nem12Record::indicator).collect();
    assert_eq!(
        indicators,
        ["100", "200", "300", "300", "300", "300", "200", "300", "300", "300", "300", "900"]
    );

    for nmi in NMIS {
        assert_eq!(
            interval_days(&records, nmi),
            [
                (date!(2025-08-24), 48),
                (date!(2025-08-25), 48),
                (date!(2025-08-26), 48),
                (date!(2025-08-27), 18),
            ]
        );
    }
}

#[tokio::test]
async fn missing_interval_drops_only_that_day() {
    let missing = date!(2025-08-25).with_time(time!(10:30));
    let (_dir, report) = export(meter_events(|nmi, ts| nmi == NMIS[0] && ts == missing)).await;

    assert_eq!(report.rejected_days.len(), 1);
    let rejected = &report.rejected_days[0];
    assert_eq!(rejected.nmi, NMIS[0]);
    assert_eq!(rejected.date, date!(2025-08-25));
    assert_eq!(
        rejected.kind,
        MalformedKind::Gap {
            expected: time!(10:30)
        }
    );

    let records = read_records(fs::read(&report.files[0].location).unwrap().as_slice()).unwrap();
    assert_eq!(
        interval_days(&records, NMIS[0]),
        [
            (date!(2025-08-24), 48),
            (date!(2025-08-26), 48),
            (date!(2025-08-27), 18),
        ]
    );
    assert_eq!(interval_days(&records, NMIS[1]).len(), 4);
}

#[tokio::test]
async fn reruns_overwrite_with_identical_bytes() {
    let csv = meter_events(|_, _| false);
    let (dir, first) = export(csv.clone()).await;
    let first_bytes = fs::read(&first.files[0].location).unwrap();

    let job = ExportJob::new(
        CsvIntervalStore::new(dir.path().join("meter_events.csv"), offset!(+10)),
        DirectorySink::new(dir.path().join("NEM12")),
        settings(),
    );
    let second = job.run(NOW, &CancellationToken::new()).await.unwrap();

    assert_eq!(first.files[0].digest, second.files[0].digest);
    assert_eq!(fs::read(&second.files[0].location).unwrap(), first_bytes);
    assert_eq!(fs::read_dir(dir.path().join("NEM12")).unwrap().count(), 1);
}
