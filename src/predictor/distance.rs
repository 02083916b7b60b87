// The weighted feature-distance metric and its running statistics.
//
// Distance between two sampled pages is a weighted L1 over per-feature
// absolute differences (virtual address, access cycle, instruction
// pointer). Two EMAs track the observed distribution: a plain running mean
// and a clamped asymmetric running minimum. The minimum serves as the
// promotion threshold: it trails toward the lower edge of the observed
// range quickly and recovers slowly, which biases prediction toward
// high-confidence (unusually close) neighbors.

use crate::config::Config;
use crate::mem::PageMeta;
use serde::Serialize;

/// Feature snapshot of one page at observation time.
#[derive(Debug, Clone, Copy)]
pub struct Features {
    pub va: u64,
    pub cyc: u64,
    pub ip: u64,
}

impl Features {
    #[inline]
    pub fn of(meta: &PageMeta) -> Self {
        Self {
            va: meta.va,
            cyc: meta.cyc_accessed,
            ip: meta.ip,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DistanceModel {
    w_va: f64,
    w_cyc: f64,
    w_ip: f64,
    dec_up: f64,
    dec_down: f64,
    dec_dist: f64,
    avg_dist: f64,
    bot_dist: f64,
}

impl DistanceModel {
    pub fn new(cfg: &Config) -> Self {
        Self {
            w_va: cfg.w_va,
            w_cyc: cfg.w_cyc,
            w_ip: cfg.w_ip,
            dec_up: cfg.dec_up,
            dec_down: cfg.dec_down,
            dec_dist: cfg.dec_dist,
            avg_dist: 1.0,
            bot_dist: 1.0,
        }
    }

    /// Running minimum: the promotion threshold.
    #[inline]
    pub fn bot(&self) -> f64 {
        self.bot_dist
    }

    /// Running mean, exported for the stats log.
    #[inline]
    pub fn avg(&self) -> f64 {
        self.avg_dist
    }

    /// Weighted L1 distance between two feature snapshots, updating the
    /// running statistics. A zero distance (identical features) leaves the
    /// statistics untouched.
    pub fn observe(&mut self, a: &Features, b: &Features) -> f64 {
        let distance = self.w_va * a.va.abs_diff(b.va) as f64
            + self.w_cyc * a.cyc.abs_diff(b.cyc) as f64
            + self.w_ip * a.ip.abs_diff(b.ip) as f64;

        if distance == 0.0 {
            return 0.0;
        }

        self.bot_dist = self.update_bot(self.bot_dist, distance);
        self.avg_dist = self.dec_dist * distance + (1.0 - self.dec_dist) * self.avg_dist;
        distance
    }

    /// Asymmetric clamped EMA toward the lower edge of the range: a value
    /// below the current bound pulls fast (dec_up), a value above pushes
    /// slowly (dec_down), and the sample is clamped into
    /// [bot/10, bot*10] so one outlier cannot teleport the bound.
    fn update_bot(&self, bot: f64, val: f64) -> f64 {
        let val = val.max(bot / 10.0);
        if val < bot {
            return self.dec_up * val + (1.0 - self.dec_up) * bot;
        }
        let val = val.min(bot * 10.0);
        self.dec_down * val + (1.0 - self.dec_down) * bot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> DistanceModel {
        DistanceModel::new(&Config::default())
    }

    fn feat(va: u64, cyc: u64, ip: u64) -> Features {
        Features { va, cyc, ip }
    }

    #[test]
    fn distance_is_weighted_l1() {
        let mut m = model();
        let a = feat(1000, 2000, 3000);
        let b = feat(1300, 1900, 3000);
        // 0.33*300 + 0.33*100 + 0.33*0
        let d = m.observe(&a, &b);
        assert!((d - 0.33 * 400.0).abs() < 1e-9);
        // Symmetric.
        let d2 = m.observe(&b, &a);
        assert!((d2 - d).abs() < 1e-9);
    }

    #[test]
    fn identical_features_leave_stats_untouched() {
        let mut m = model();
        let a = feat(1, 2, 3);
        let before = (m.bot(), m.avg());
        assert_eq!(m.observe(&a, &a), 0.0);
        assert_eq!((m.bot(), m.avg()), before);
    }

    #[test]
    fn bot_trails_down_fast_and_up_slowly() {
        let mut m = model();
        let start = m.bot();

        // A closer-than-ever observation pulls the bound down quickly.
        m.observe(&feat(0, 0, 0), &feat(1, 0, 0));
        let after_low = m.bot();
        assert!(after_low < start);

        // A far observation moves it back up far more slowly than the
        // close one pulled it down.
        m.observe(&feat(0, 0, 0), &feat(1 << 40, 1 << 40, 1 << 40));
        let after_high = m.bot();
        assert!(after_high > after_low);
        assert!(after_high - after_low < (start - after_low) / 2.0);
    }

    #[test]
    fn bot_update_clamps_outliers() {
        let m = model();
        // An absurdly low sample is clamped to bot/10.
        let pulled = m.update_bot(1.0, 1e-12);
        let clamped = m.update_bot(1.0, 0.1);
        assert_eq!(pulled, clamped);

        // An absurdly high sample is clamped to bot*10.
        let pushed = m.update_bot(1.0, 1e12);
        let clamped = m.update_bot(1.0, 10.0);
        assert_eq!(pushed, clamped);
    }

    #[test]
    fn avg_follows_ema() {
        let mut m = model();
        let d = m.observe(&feat(0, 0, 0), &feat(100, 0, 0));
        let expect = 0.0001 * d + (1.0 - 0.0001) * 1.0;
        assert!((m.avg() - expect).abs() < 1e-12);
    }
}
