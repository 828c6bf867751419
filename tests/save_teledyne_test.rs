use air_quality_lambdas::app::handlers::save_teledyne::MARKER_KEY;
use air_quality_lambdas::app::handlers::SaveTeledyneHandler;
use air_quality_lambdas::domain::model::Table;
use air_quality_lambdas::domain::ports::{DriveItem, DriveSource};
use air_quality_lambdas::utils::retry::RetryPolicy;
use air_quality_lambdas::{AppError, LocalStorage, Result};
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// In-memory Drive folder with one export per subfolder.
struct FakeDrive {
    folders: Vec<DriveItem>,
    export: Vec<u8>,
    fail_downloads: bool,
    downloads: AtomicUsize,
}

impl FakeDrive {
    fn new(export: Vec<u8>) -> Self {
        Self {
            folders: vec![
                item("f-old", "T640_PUCP_022825_080000"),
                item("f-new", "T640_PUCP_030225_080000"),
                item("f-misc", "calibration notes"),
            ],
            export,
            fail_downloads: false,
            downloads: AtomicUsize::new(0),
        }
    }
}

fn item(id: &str, name: &str) -> DriveItem {
    DriveItem {
        id: id.to_string(),
        name: name.to_string(),
    }
}

impl DriveSource for FakeDrive {
    async fn list_subfolders(&self, parent_id: &str) -> Result<Vec<DriveItem>> {
        assert_eq!(parent_id, "root-folder");
        Ok(self.folders.clone())
    }

    async fn latest_file(&self, folder_id: &str, name_contains: &str) -> Result<Option<DriveItem>> {
        assert_eq!(name_contains, "PUCP");
        Ok(Some(item(
            &format!("{}-file", folder_id),
            "T640_PUCP_export.txt",
        )))
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        assert_eq!(file_id, "f-new-file");
        if self.fail_downloads {
            return Err(AppError::processing("connection reset"));
        }
        Ok(self.export.clone())
    }
}

/// Minute readings from 2025-03-01 23:50 to 2025-03-02 00:14, local time.
fn export() -> Vec<u8> {
    let start = NaiveDateTime::parse_from_str("2025-03-01 23:50:00", "%Y-%m-%d %H:%M:%S").unwrap();
    let mut text = String::from("Date & Time (Local), PM2.5 Conc, Flow\n");
    for m in 0..25 {
        let ts = start + ChronoDuration::minutes(m);
        text.push_str(&format!("{}, {}.0, 1\n", ts.format("%m/%d/%Y %I:%M:%S %p"), 10 + m));
    }
    text.into_bytes()
}

fn handler(drive: FakeDrive, dir: &TempDir) -> SaveTeledyneHandler<LocalStorage, FakeDrive> {
    SaveTeledyneHandler::new(drive, "root-folder", LocalStorage::new(dir.path()))
        .with_retry(RetryPolicy::fixed(2, Duration::ZERO))
}

#[tokio::test]
async fn test_ingest_writes_marker_and_daily_files() {
    let dir = TempDir::new().unwrap();
    let handler = handler(FakeDrive::new(export()), &dir);

    let written = handler.run().await.unwrap().unwrap();
    assert_eq!(
        written,
        vec!["2025_03_01_5min_prediction.csv", "2025_03_02_5min_prediction.csv"]
    );
    assert_eq!(
        fs::read_to_string(dir.path().join(MARKER_KEY)).unwrap(),
        "T640_PUCP_030225_080000\n"
    );

    let first_day = Table::from_csv(&fs::read(dir.path().join(&written[0])).unwrap()).unwrap();
    assert_eq!(first_day.columns, vec!["PM2.5 Conc"]);
    let stamps: Vec<String> = first_day.rows.iter().map(|(ts, _)| ts.to_string()).collect();
    assert_eq!(
        stamps,
        vec!["2025-03-01 23:45:00", "2025-03-01 23:50:00", "2025-03-01 23:55:00"]
    );
    // 23:50..23:54 averages to 12.0, labelled five minutes earlier
    assert_eq!(first_day.rows[0].1[0].as_f64(), Some(12.0));

    let second_day = Table::from_csv(&fs::read(dir.path().join(&written[1])).unwrap()).unwrap();
    assert_eq!(second_day.len(), 2);
}

#[tokio::test]
async fn test_same_folder_is_not_ingested_twice() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(MARKER_KEY), "T640_PUCP_030225_080000\n").unwrap();

    let drive = FakeDrive::new(export());
    let handler = handler(drive, &dir);
    assert_eq!(handler.run().await.unwrap(), None);
    assert!(!dir.path().join("2025_03_01_5min_prediction.csv").exists());
}

#[tokio::test]
async fn test_existing_days_are_kept_except_the_last() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("2025_03_01_5min_prediction.csv"), "kept").unwrap();
    fs::write(dir.path().join("2025_03_02_5min_prediction.csv"), "stale").unwrap();

    let handler = handler(FakeDrive::new(export()), &dir);
    let written = handler.run().await.unwrap().unwrap();

    assert_eq!(written, vec!["2025_03_02_5min_prediction.csv"]);
    assert_eq!(
        fs::read_to_string(dir.path().join("2025_03_01_5min_prediction.csv")).unwrap(),
        "kept"
    );
    assert_ne!(
        fs::read_to_string(dir.path().join("2025_03_02_5min_prediction.csv")).unwrap(),
        "stale"
    );
}

#[tokio::test]
async fn test_failed_download_is_retried_then_abandoned() {
    let dir = TempDir::new().unwrap();
    let mut drive = FakeDrive::new(export());
    drive.fail_downloads = true;

    let handler = handler(drive, &dir);
    assert_eq!(handler.run().await.unwrap(), None);
    // the marker is written before the download
    assert!(dir.path().join(MARKER_KEY).exists());
    assert!(!dir.path().join("2025_03_02_5min_prediction.csv").exists());
}
