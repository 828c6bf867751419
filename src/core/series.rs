//! Numeric, timestamp-indexed series used to clean reference-monitor exports.

use crate::domain::model::{Cell, Table};
use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    columns: Vec<String>,
    index: Vec<NaiveDateTime>,
    values: Vec<Vec<Option<f64>>>,
}

impl TimeSeries {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            index: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn push(&mut self, ts: NaiveDateTime, mut row: Vec<Option<f64>>) {
        row.resize(self.columns.len(), None);
        self.index.push(ts);
        self.values.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    pub fn rows(&self) -> impl Iterator<Item = (&NaiveDateTime, &Vec<Option<f64>>)> {
        self.index.iter().zip(self.values.iter())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn column(&self, idx: usize) -> Vec<Option<f64>> {
        self.values.iter().map(|row| row[idx]).collect()
    }

    pub fn null_counts(&self) -> Vec<usize> {
        (0..self.columns.len())
            .map(|c| self.values.iter().filter(|row| row[c].is_none()).count())
            .collect()
    }

    pub fn total_nulls(&self) -> usize {
        self.null_counts().iter().sum()
    }

    /// Mean per bin of width `step`, bins aligned to midnight. Empty bins
    /// between the first and last observation are kept with missing values.
    pub fn resample_mean(&self, step: Duration) -> TimeSeries {
        let mut out = TimeSeries::new(self.columns.clone());
        if self.is_empty() || step <= Duration::zero() {
            return out;
        }

        let width = self.columns.len();
        let mut bins: BTreeMap<NaiveDateTime, Vec<(f64, usize)>> = BTreeMap::new();
        for (ts, row) in self.rows() {
            let acc = bins
                .entry(floor_to(*ts, step))
                .or_insert_with(|| vec![(0.0, 0); width]);
            for (slot, value) in acc.iter_mut().zip(row) {
                if let Some(v) = value {
                    slot.0 += v;
                    slot.1 += 1;
                }
            }
        }

        let (Some(first), Some(last)) = (bins.keys().next().copied(), bins.keys().last().copied())
        else {
            return out;
        };

        let mut cursor = first;
        while cursor <= last {
            let row = match bins.get(&cursor) {
                Some(acc) => acc
                    .iter()
                    .map(|(sum, n)| if *n > 0 { Some(sum / *n as f64) } else { None })
                    .collect(),
                None => vec![None; width],
            };
            out.push(cursor, row);
            cursor += step;
        }
        out
    }

    /// Regular grid of `step` from the first to the last timestamp. Only
    /// rows sitting exactly on the grid survive; the first duplicate wins.
    pub fn reindex_complete(&self, step: Duration) -> TimeSeries {
        let mut out = TimeSeries::new(self.columns.clone());
        let (Some(start), Some(end)) = (self.index.iter().min(), self.index.iter().max()) else {
            return out;
        };

        let mut lookup: BTreeMap<NaiveDateTime, &Vec<Option<f64>>> = BTreeMap::new();
        for (ts, row) in self.rows() {
            lookup.entry(*ts).or_insert(row);
        }

        let mut cursor = *start;
        while cursor <= *end {
            let row = lookup
                .get(&cursor)
                .map(|r| (*r).clone())
                .unwrap_or_else(|| vec![None; self.columns.len()]);
            out.push(cursor, row);
            cursor += step;
        }
        out
    }

    pub fn shift(&self, delta: Duration) -> TimeSeries {
        TimeSeries {
            columns: self.columns.clone(),
            index: self.index.iter().map(|ts| *ts + delta).collect(),
            values: self.values.clone(),
        }
    }

    /// Drops runs of at least `min_run` consecutive missing values (consecutive
    /// meaning `step` apart). Columns are visited from most to fewest nulls and
    /// only columns with `min_run` or more nulls are considered.
    pub fn remove_null_runs(&self, min_run: usize, step: Duration) -> TimeSeries {
        let mut current = self.clone();
        let mut processed: HashSet<usize> = HashSet::new();

        for _ in 0..self.columns.len() {
            let counts = current.null_counts();
            let candidate = counts
                .iter()
                .enumerate()
                .filter(|(c, n)| !processed.contains(c) && **n >= min_run)
                .fold(None, |best: Option<(usize, usize)>, (c, n)| match best {
                    Some((_, best_n)) if best_n >= *n => best,
                    _ => Some((c, *n)),
                });

            let Some((column, nulls)) = candidate else {
                break;
            };

            let null_ts: Vec<NaiveDateTime> = current
                .rows()
                .filter(|(_, row)| row[column].is_none())
                .map(|(ts, _)| *ts)
                .collect();
            let to_remove: HashSet<NaiveDateTime> = consecutive_runs(&null_ts, step, min_run)
                .into_iter()
                .collect();
            current = current.filter_rows(|ts| !to_remove.contains(ts));
            processed.insert(column);

            tracing::debug!(
                "'{}' had {} nulls, removed {} rows in long gaps",
                self.columns[column],
                nulls,
                to_remove.len()
            );
        }

        current
    }

    /// Linear interpolation by position. Leading gaps stay empty, trailing
    /// gaps take the last observed value.
    pub fn interpolate_linear(&self) -> TimeSeries {
        let mut out = self.clone();
        for c in 0..self.columns.len() {
            let filled = interpolate_column(&self.column(c));
            for (row, value) in out.values.iter_mut().zip(filled) {
                row[c] = value;
            }
        }
        out
    }

    /// Splits the series by calendar day, in chronological order.
    pub fn split_by_day(&self) -> Vec<(NaiveDate, TimeSeries)> {
        let mut days: BTreeMap<NaiveDate, TimeSeries> = BTreeMap::new();
        for (ts, row) in self.rows() {
            days.entry(ts.date())
                .or_insert_with(|| TimeSeries::new(self.columns.clone()))
                .push(*ts, row.clone());
        }
        days.into_iter().collect()
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new(self.columns.clone());
        for (ts, row) in self.rows() {
            table.rows.push((
                *ts,
                row.iter()
                    .map(|v| v.map(Cell::Number).unwrap_or(Cell::Empty))
                    .collect(),
            ));
        }
        table
    }

    fn filter_rows<F: Fn(&NaiveDateTime) -> bool>(&self, keep: F) -> TimeSeries {
        let mut out = TimeSeries::new(self.columns.clone());
        for (ts, row) in self.rows() {
            if keep(ts) {
                out.push(*ts, row.clone());
            }
        }
        out
    }
}

fn floor_to(ts: NaiveDateTime, step: Duration) -> NaiveDateTime {
    let step_secs = step.num_seconds().max(1);
    let since_midnight = ts.num_seconds_from_midnight() as i64;
    ts.with_nanosecond(0).unwrap_or(ts) - Duration::seconds(since_midnight % step_secs)
}

/// Timestamps belonging to runs (successive entries exactly `step` apart) of
/// length `min_run` or more.
pub fn consecutive_runs(
    timestamps: &[NaiveDateTime],
    step: Duration,
    min_run: usize,
) -> Vec<NaiveDateTime> {
    let mut selected = Vec::new();
    let Some(first) = timestamps.first() else {
        return selected;
    };

    let mut run = vec![*first];
    for pair in timestamps.windows(2) {
        if pair[1] - pair[0] == step {
            run.push(pair[1]);
        } else {
            if run.len() >= min_run {
                selected.extend(run.iter().copied());
            }
            run = vec![pair[1]];
        }
    }
    if run.len() >= min_run {
        selected.extend(run);
    }
    selected
}

fn interpolate_column(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = values.to_vec();
    let mut last_valid: Option<usize> = None;

    for i in 0..values.len() {
        let Some(current) = values[i] else {
            continue;
        };
        if let Some(prev) = last_valid {
            let gap = i - prev;
            if gap > 1 {
                let start = values[prev].unwrap_or(current);
                for (offset, slot) in out[prev + 1..i].iter_mut().enumerate() {
                    let fraction = (offset + 1) as f64 / gap as f64;
                    *slot = Some(start + (current - start) * fraction);
                }
            }
        }
        last_valid = Some(i);
    }

    if let Some(last) = last_valid {
        let fill = values[last];
        for slot in out.iter_mut().skip(last + 1) {
            *slot = fill;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn series(points: &[(NaiveDateTime, Option<f64>)]) -> TimeSeries {
        let mut ts = TimeSeries::new(vec!["PM2.5 Conc".to_string()]);
        for (t, v) in points {
            ts.push(*t, vec![*v]);
        }
        ts
    }

    #[test]
    fn test_resample_mean_fills_empty_bins() {
        let ts = series(&[
            (at(0, 0, 10), Some(10.0)),
            (at(0, 0, 40), Some(20.0)),
            (at(0, 3, 5), Some(30.0)),
        ]);

        let resampled = ts.resample_mean(Duration::minutes(1));
        assert_eq!(resampled.index(), &[at(0, 0, 0), at(0, 1, 0), at(0, 2, 0), at(0, 3, 0)]);
        assert_eq!(resampled.column(0), vec![Some(15.0), None, None, Some(30.0)]);
    }

    #[test]
    fn test_resample_five_minutes_aligns_to_midnight() {
        let ts = series(&[(at(0, 7, 0), Some(1.0)), (at(0, 12, 0), Some(3.0))]);
        let resampled = ts.resample_mean(Duration::minutes(5));
        assert_eq!(resampled.index(), &[at(0, 5, 0), at(0, 10, 0)]);
    }

    #[test]
    fn test_consecutive_runs_keeps_only_long_runs() {
        let stamps = vec![at(0, 0, 0), at(0, 1, 0), at(0, 2, 0), at(0, 5, 0), at(0, 6, 0)];
        let runs = consecutive_runs(&stamps, Duration::minutes(1), 3);
        assert_eq!(runs, vec![at(0, 0, 0), at(0, 1, 0), at(0, 2, 0)]);
    }

    #[test]
    fn test_remove_null_runs_drops_long_gaps_only() {
        let mut points = vec![(at(0, 0, 0), Some(1.0))];
        for m in 1..=4 {
            points.push((at(0, m, 0), None));
        }
        points.push((at(0, 5, 0), Some(2.0)));
        points.push((at(0, 6, 0), None));
        points.push((at(0, 7, 0), Some(3.0)));

        let cleaned = series(&points).remove_null_runs(3, Duration::minutes(1));
        assert_eq!(cleaned.len(), 4);
        assert_eq!(cleaned.column(0), vec![Some(1.0), Some(2.0), None, Some(3.0)]);
    }

    #[test]
    fn test_interpolate_linear_by_position() {
        let ts = series(&[
            (at(0, 0, 0), None),
            (at(0, 1, 0), Some(1.0)),
            (at(0, 2, 0), None),
            (at(0, 3, 0), None),
            (at(0, 4, 0), Some(4.0)),
            (at(0, 5, 0), None),
        ]);

        let filled = ts.interpolate_linear();
        assert_eq!(
            filled.column(0),
            vec![None, Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(4.0)]
        );
    }

    #[test]
    fn test_reindex_complete_drops_off_grid_rows() {
        let ts = series(&[
            (at(0, 0, 0), Some(1.0)),
            (at(0, 7, 0), Some(9.0)),
            (at(0, 10, 0), Some(2.0)),
        ]);
        let grid = ts.reindex_complete(Duration::minutes(5));
        assert_eq!(grid.index(), &[at(0, 0, 0), at(0, 5, 0), at(0, 10, 0)]);
        assert_eq!(grid.column(0), vec![Some(1.0), None, Some(2.0)]);
    }

    #[test]
    fn test_split_by_day_is_chronological() {
        let next_day = NaiveDate::from_ymd_opt(2025, 3, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let ts = series(&[(next_day, Some(2.0)), (at(23, 55, 0), Some(1.0))]);
        let days = ts.split_by_day();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].0, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(days[1].1.column(0), vec![Some(2.0)]);
    }
}
