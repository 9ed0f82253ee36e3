use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Width of the realtime DPS/HPS sliding window.
pub const REALTIME_WINDOW_MS: i64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatKind {
    Damage,
    Healing,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValueBuckets {
    pub normal: u64,
    pub critical: u64,
    pub lucky: u64,
    pub crit_lucky: u64,
    pub hp_lessen: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountBuckets {
    pub normal: u64,
    pub critical: u64,
    pub lucky: u64,
    pub total: u64,
}

/// One aggregate per (owner, kind), and one per skill under each owner.
///
/// The realtime window holds `(timestamp_ms, value)` pairs in arrival order;
/// entries older than [`REALTIME_WINDOW_MS`] are evicted on every
/// `update_realtime_at` pass. Skill sub-aggregates drop their window on every
/// add and therefore only ever report lifetime totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticData {
    pub kind: StatKind,
    pub element: String,
    pub name: String,
    pub totals: ValueBuckets,
    pub counts: CountBuckets,
    #[serde(skip)]
    window: VecDeque<(i64, u64)>,
    pub realtime_value: u64,
    pub realtime_max: u64,
    /// (first_record_ms, last_record_ms)
    pub time_range: Option<(i64, i64)>,
}

impl StatisticData {
    pub fn new(kind: StatKind) -> Self {
        Self {
            kind,
            element: String::new(),
            name: String::new(),
            totals: ValueBuckets::default(),
            counts: CountBuckets::default(),
            window: VecDeque::new(),
            realtime_value: 0,
            realtime_max: 0,
            time_range: None,
        }
    }

    /// Record one event. Exactly one value bucket receives `value`; the
    /// count buckets mirror the crit/lucky flags (an event that is both
    /// raises both counters but still counts once in `total`).
    pub fn add_record_at(
        &mut self,
        now: i64,
        value: u64,
        is_crit: bool,
        is_lucky: bool,
        hp_lessen: u64,
    ) {
        match (is_crit, is_lucky) {
            (true, true) => self.totals.crit_lucky += value,
            (true, false) => self.totals.critical += value,
            (false, true) => self.totals.lucky += value,
            (false, false) => self.totals.normal += value,
        }
        self.totals.total += value;
        self.totals.hp_lessen += hp_lessen;

        if is_crit {
            self.counts.critical += 1;
        }
        if is_lucky {
            self.counts.lucky += 1;
        }
        if !is_crit && !is_lucky {
            self.counts.normal += 1;
        }
        self.counts.total += 1;

        self.window.push_back((now, value));

        self.time_range = match self.time_range {
            Some((first, _)) => Some((first, now)),
            None => Some((now, now)),
        };
    }

    /// Evict expired window entries and recompute the realtime rate.
    pub fn update_realtime_at(&mut self, now: i64) {
        while let Some(&(ts, _)) = self.window.front() {
            if now - ts > REALTIME_WINDOW_MS {
                self.window.pop_front();
            } else {
                break;
            }
        }
        self.realtime_value = self.window.iter().map(|&(_, v)| v).sum();
        if self.realtime_value > self.realtime_max {
            self.realtime_max = self.realtime_value;
        }
    }

    /// Lifetime average rate in units per second. Zero until two distinct
    /// record timestamps exist; non-finite intermediate results coerce to 0.
    pub fn total_per_second(&self) -> f64 {
        match self.time_range {
            Some((first, last)) if last > first => {
                let rate = self.totals.total as f64 * 1000.0 / (last - first) as f64;
                if rate.is_finite() {
                    rate
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    /// Skill sub-aggregates never accumulate a realtime window.
    pub fn clear_window(&mut self) {
        self.window.clear();
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn crit_rate(&self) -> f64 {
        if self.counts.total == 0 {
            return 0.0;
        }
        self.counts.critical as f64 / self.counts.total as f64
    }

    pub fn lucky_rate(&self) -> f64 {
        if self.counts.total == 0 {
            return 0.0;
        }
        self.counts.lucky as f64 / self.counts.total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_are_partitioned_by_flags() {
        let mut stat = StatisticData::new(StatKind::Damage);
        stat.add_record_at(0, 100, false, false, 100);
        stat.add_record_at(1, 200, true, false, 0);
        stat.add_record_at(2, 300, false, true, 0);
        stat.add_record_at(3, 400, true, true, 50);

        assert_eq!(stat.totals.normal, 100);
        assert_eq!(stat.totals.critical, 200);
        assert_eq!(stat.totals.lucky, 300);
        assert_eq!(stat.totals.crit_lucky, 400);
        assert_eq!(stat.totals.total, 1000);
        assert_eq!(stat.totals.hp_lessen, 150);
        assert_eq!(
            stat.totals.total,
            stat.totals.normal + stat.totals.critical + stat.totals.lucky + stat.totals.crit_lucky
        );
    }

    #[test]
    fn counts_mirror_flags() {
        let mut stat = StatisticData::new(StatKind::Damage);
        // crit+lucky raises both counters but counts as one event
        stat.add_record_at(0, 500, true, true, 0);
        assert_eq!(stat.counts.critical, 1);
        assert_eq!(stat.counts.lucky, 1);
        assert_eq!(stat.counts.normal, 0);
        assert_eq!(stat.counts.total, 1);

        // with disjoint flags, total equals the bucket sum
        let mut stat = StatisticData::new(StatKind::Damage);
        for (crit, lucky) in [(false, false), (true, false), (false, true)] {
            stat.add_record_at(0, 1, crit, lucky, 0);
        }
        assert_eq!(
            stat.counts.total,
            stat.counts.normal + stat.counts.critical + stat.counts.lucky
        );
    }

    #[test]
    fn realtime_window_slides() {
        let mut stat = StatisticData::new(StatKind::Damage);
        stat.add_record_at(0, 1000, false, false, 0);
        stat.add_record_at(500, 500, false, false, 0);

        stat.update_realtime_at(900);
        assert_eq!(stat.realtime_value, 1500);
        assert_eq!(stat.realtime_max, 1500);

        // both entries are past the 1000 ms window at t=1600
        stat.update_realtime_at(1600);
        assert_eq!(stat.realtime_value, 0);
        assert_eq!(stat.realtime_max, 1500);

        // still empty later on
        stat.update_realtime_at(2100);
        assert_eq!(stat.realtime_value, 0);
        assert_eq!(stat.realtime_max, 1500);
    }

    #[test]
    fn window_entries_never_exceed_max_age() {
        let mut stat = StatisticData::new(StatKind::Healing);
        for t in (0..5000).step_by(70) {
            stat.add_record_at(t, 10, false, false, 0);
            stat.update_realtime_at(t);
            let sum: u64 = (0..=t)
                .step_by(70)
                .filter(|&ts| t - ts <= REALTIME_WINDOW_MS)
                .map(|_| 10u64)
                .sum();
            assert_eq!(stat.realtime_value, sum);
            assert!(stat.realtime_max >= stat.realtime_value);
        }
    }

    #[test]
    fn total_per_second_requires_two_timestamps() {
        let mut stat = StatisticData::new(StatKind::Damage);
        assert_eq!(stat.total_per_second(), 0.0);

        stat.add_record_at(1000, 500, false, false, 0);
        assert_eq!(stat.total_per_second(), 0.0);

        // same timestamp again: still a zero-width range
        stat.add_record_at(1000, 500, false, false, 0);
        assert_eq!(stat.total_per_second(), 0.0);

        stat.add_record_at(3000, 1000, false, false, 0);
        let rate = stat.total_per_second();
        assert!(rate.is_finite());
        assert!((rate - 1000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cleared_window_reports_no_realtime() {
        let mut stat = StatisticData::new(StatKind::Damage);
        stat.add_record_at(0, 100, false, false, 0);
        stat.clear_window();
        stat.update_realtime_at(1);
        assert_eq!(stat.realtime_value, 0);
        assert_eq!(stat.totals.total, 100);
    }
}
