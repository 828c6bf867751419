use super::daily_key;
use crate::adapters::drive::GoogleDrive;
use crate::config::LambdaConfig;
use crate::core::series::TimeSeries;
use crate::domain::ports::{DriveItem, DriveSource, Storage};
use crate::runtime::{Handler, InvocationContext};
use crate::utils::error::{AppError, Result};
use crate::utils::retry::RetryPolicy;
use crate::utils::validation::validate_required_field;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::LazyLock;

pub const MARKER_KEY: &str = "latest_folder.txt";
pub const FILE_PATTERN: &str = "PUCP";
pub const DATE_COLUMN: &str = "Date & Time (Local)";
pub const VALUE_COLUMN: &str = "PM2.5 Conc";
const EXPORT_DATE_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

/// Gaps this long (in minutes) are dropped instead of interpolated.
pub const MAX_GAP_MINUTES: usize = 61;

// 子資料夾名稱結尾為 MMDDYY_HHMMSS
static FOLDER_STAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{2})(\d{2})(\d{2})_(\d{2})(\d{2})(\d{2})$").expect("static pattern")
});

/// Creation time encoded in an export folder name, if it carries one.
pub fn folder_timestamp(name: &str) -> Option<NaiveDateTime> {
    let caps = FOLDER_STAMP.captures(name)?;
    let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let (month, day, year) = (part(1)?, part(2)?, part(3)?);
    let (hour, minute, second) = (part(4)?, part(5)?, part(6)?);
    NaiveDate::from_ymd_opt(2000 + year as i32, month, day)?.and_hms_opt(hour, minute, second)
}

/// The export folder with the newest name stamp; unstamped folders are ignored.
pub fn latest_export_folder(folders: &[DriveItem]) -> Option<&DriveItem> {
    folders
        .iter()
        .filter_map(|f| folder_timestamp(&f.name).map(|ts| (ts, f)))
        .max_by_key(|(ts, _)| *ts)
        .map(|(_, f)| f)
}

/// Reads the monitor export: `, `-separated with padded headers. Rows with a
/// repeated date (first wins), an unparseable date or a non-numeric value are
/// dropped.
pub fn parse_export(data: &[u8]) -> Result<TimeSeries> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data);

    let headers = reader.headers()?.clone();
    let find = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| AppError::processing(format!("Column '{}' not found in export", name)))
    };
    let date_idx = find(DATE_COLUMN)?;
    let value_idx = find(VALUE_COLUMN)?;

    let mut series = TimeSeries::new(vec![VALUE_COLUMN.to_string()]);
    let mut seen_dates = HashSet::new();
    let mut skipped = 0usize;

    for record in reader.records() {
        let record = record?;
        let Some(raw_date) = record.get(date_idx) else {
            skipped += 1;
            continue;
        };
        if !seen_dates.insert(raw_date.to_string()) {
            continue;
        }

        let ts = NaiveDateTime::parse_from_str(raw_date, EXPORT_DATE_FORMAT).ok();
        let value = record
            .get(value_idx)
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite());
        match (ts, value) {
            (Some(ts), Some(value)) => series.push(ts, vec![Some(value)]),
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::debug!("Skipped {} incomplete export rows", skipped);
    }
    Ok(series)
}

/// 1-minute means, long gaps removed, short gaps interpolated, then 5-minute
/// means on a complete grid labelled by the start of the previous bin.
pub fn clean_reference_series(raw: &TimeSeries) -> TimeSeries {
    let minute = Duration::minutes(1);
    let five_minutes = Duration::minutes(5);

    let per_minute = raw.resample_mean(minute);
    tracing::info!("Before removing nulls there are {} rows", per_minute.len());
    let trimmed = per_minute.remove_null_runs(MAX_GAP_MINUTES, minute);
    tracing::info!("After removing nulls there are {} rows", trimmed.len());

    let nulls = trimmed.total_nulls();
    let filled = if nulls > 0 {
        tracing::info!("Interpolating {} missing values", nulls);
        trimmed.interpolate_linear()
    } else {
        trimmed
    };

    filled
        .resample_mean(five_minutes)
        .reindex_complete(five_minutes)
        .shift(-five_minutes)
}

/// Daily job: copy the newest reference-monitor export from Drive into the
/// reference bucket as per-day CSVs.
pub struct SaveTeledyneHandler<S: Storage, D: DriveSource> {
    drive: D,
    folder_id: String,
    reference: S,
    retry: RetryPolicy,
}

impl<S: Storage, D: DriveSource> SaveTeledyneHandler<S, D> {
    pub fn new(drive: D, folder_id: impl Into<String>, reference: S) -> Self {
        Self {
            drive,
            folder_id: folder_id.into(),
            reference,
            retry: RetryPolicy::drive_default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Runs one ingest. Returns the keys written, or `None` when there was
    /// nothing new to ingest.
    pub async fn run(&self) -> Result<Option<Vec<String>>> {
        let folders = self.drive.list_subfolders(&self.folder_id).await?;
        let Some(folder) = latest_export_folder(&folders) else {
            tracing::info!("No export subfolders matching the date pattern found");
            return Ok(None);
        };

        let Some(file) = self.drive.latest_file(&folder.id, FILE_PATTERN).await? else {
            tracing::info!("No file matching '{}' found in {}", FILE_PATTERN, folder.name);
            return Ok(None);
        };

        if self.last_ingested_folder().await.as_deref() == Some(folder.name.as_str()) {
            tracing::info!("The latest subfolder is still {}", folder.name);
            return Ok(None);
        }
        self.reference
            .write_file(MARKER_KEY, format!("{}\n", folder.name).as_bytes())
            .await?;

        tracing::info!(
            "Downloading latest matching file {} from subfolder {}",
            file.name,
            folder.name
        );
        let data = match self
            .retry
            .run("Drive download", |_| self.drive.download(&file.id))
            .await
        {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("The export file was not downloaded: {}", e);
                return Ok(None);
            }
        };

        let series = clean_reference_series(&parse_export(&data)?);
        let days = series.split_by_day();
        let last = days.len().saturating_sub(1);
        let mut written = Vec::new();

        for (i, (day, rows)) in days.into_iter().enumerate() {
            let key = daily_key(day);
            // 只有最後一天可能是部分資料，永遠覆寫
            if i != last && self.already_stored(&key).await {
                tracing::info!("{} already exists in {}", key, self.reference.location());
                continue;
            }
            self.reference.write_file(&key, &rows.to_table().to_csv()?).await?;
            tracing::info!("Teledyne data saved to {}/{}", self.reference.location(), key);
            written.push(key);
        }

        Ok(Some(written))
    }

    async fn last_ingested_folder(&self) -> Option<String> {
        match self.reference.read_file(MARKER_KEY).await {
            Ok(data) => Some(String::from_utf8_lossy(&data).trim().to_string()),
            Err(AppError::ObjectNotFound { .. }) => None,
            Err(e) => {
                tracing::warn!("Could not read {}: {}", MARKER_KEY, e);
                None
            }
        }
    }

    /// Existence check; treated as absent once retries run out.
    async fn already_stored(&self, key: &str) -> bool {
        self.retry
            .run("Existence check", |_| self.reference.exists(key))
            .await
            .unwrap_or(false)
    }
}

impl<S: Storage> SaveTeledyneHandler<S, GoogleDrive> {
    pub fn from_config(config: &LambdaConfig, reference: S) -> Result<Self> {
        let credentials = validate_required_field("GOOGLE_APPLICATION_CREDENTIALS", &config.google_credentials)?;
        let folder_id = validate_required_field("FOLDER_ID", &config.folder_id)?;
        let drive = GoogleDrive::from_service_account_file(credentials)?;
        Ok(Self::new(drive, folder_id.clone(), reference))
    }
}

#[async_trait]
impl<S, D> Handler for SaveTeledyneHandler<S, D>
where
    S: Storage + 'static,
    D: DriveSource + 'static,
{
    async fn call(&self, _event: Value, ctx: InvocationContext) -> Result<Value> {
        tracing::info!("Scheduled reference ingest {}", ctx.request_id);
        let stored = self.run().await?;
        Ok(json!({ "stored": stored }))
    }
}
