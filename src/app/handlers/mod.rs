pub mod login;
pub mod make_predictions;
pub mod on_demand;
pub mod return_predictions;
pub mod save_teledyne;

pub use login::LoginHandler;
pub use make_predictions::MakePredictionsHandler;
pub use on_demand::OnDemandPredictionHandler;
pub use return_predictions::ReturnPredictionsHandler;
pub use save_teledyne::SaveTeledyneHandler;

use chrono::NaiveDate;

/// Object key of one day of 5-minute data, shared by both buckets.
pub fn daily_key(date: NaiveDate) -> String {
    format!("{}_5min_prediction.csv", date.format("%Y_%m_%d"))
}

/// Date encoded in a daily key; `None` for any other object.
pub fn key_date(key: &str) -> Option<NaiveDate> {
    if !key.ends_with(".csv") {
        return None;
    }
    let parts: Vec<&str> = key.splitn(4, '_').take(3).collect();
    if parts.len() < 3 {
        return None;
    }
    NaiveDate::parse_from_str(&parts.join("-"), "%Y-%m-%d").ok()
}
