//! Empirical target/decoy score distributions.
//!
//! Scores are "lower is better" throughout (E-values and probability
//! products). A map moves through three states:
//! * [`TargetDecoyMap`]: mutable histogram, points are added as target or decoy
//! * [`CuredMap`]: aggregated, sorted bins plus the smoothing window
//! * [`TargetDecoyModel`]: read-only score -> posterior error probability
//!   lookup, also used for threshold search
//!
//! The local probability of a score is estimated as `D / (D + T)` over a
//! window of neighbouring bins holding more target hits than the largest
//! decoy-free stretch of the score axis, so that every window contains decoy
//! evidence.
//!
//! Käll, 2008 [https://pubmed.ncbi.nlm.nih.gov/18052118/]

use fnv::FnvHashMap;
use itertools::Itertools;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    pub score: f64,
    pub n_target: u64,
    pub n_decoy: u64,
}

#[derive(Clone, Debug, Default)]
pub struct TargetDecoyMap {
    // Keyed by the bit pattern of the score, (targets, decoys)
    hits: FnvHashMap<u64, (u64, u64)>,
    non_finite: usize,
}

impl TargetDecoyMap {
    pub fn add_point(&mut self, score: f64, decoy: bool) {
        if !score.is_finite() {
            self.non_finite += 1;
            return;
        }
        // Fold -0.0 into 0.0
        let entry = self.hits.entry((score + 0.0).to_bits()).or_default();
        match decoy {
            true => entry.1 += 1,
            false => entry.0 += 1,
        }
    }

    /// Add `bin.n_target` target and `bin.n_decoy` decoy points at `bin.score`
    pub fn add_bin(&mut self, bin: &Bin) {
        if !bin.score.is_finite() {
            self.non_finite += (bin.n_target + bin.n_decoy) as usize;
            return;
        }
        let entry = self.hits.entry((bin.score + 0.0).to_bits()).or_default();
        entry.0 += bin.n_target;
        entry.1 += bin.n_decoy;
    }

    pub fn merge(mut self, other: Self) -> Self {
        if self.hits.len() < other.hits.len() {
            return other.merge(self);
        }
        for (score, (t, d)) in other.hits {
            let entry = self.hits.entry(score).or_default();
            entry.0 += t;
            entry.1 += d;
        }
        self.non_finite += other.non_finite;
        self
    }

    pub fn n_targets(&self) -> u64 {
        self.hits.values().map(|(t, _)| t).sum()
    }

    pub fn n_decoys(&self) -> u64 {
        self.hits.values().map(|(_, d)| d).sum()
    }

    /// Number of finite points inserted
    pub fn len(&self) -> u64 {
        self.n_targets() + self.n_decoys()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Aggregate the histogram into sorted bins and derive the smoothing
    /// window. Consumes the map: no points can be added afterwards.
    ///
    /// Maps holding fewer than `min_decoys` decoys (and always maps holding
    /// none) are flagged as degraded, and their probabilities fall back to
    /// the identity mapping.
    pub fn cure(self, min_decoys: u64) -> CuredMap {
        let bins = self
            .hits
            .into_iter()
            .map(|(score, (n_target, n_decoy))| Bin {
                score: f64::from_bits(score),
                n_target,
                n_decoy,
            })
            .sorted_by(|a, b| a.score.total_cmp(&b.score))
            .collect::<Vec<_>>();

        let decoys = bins.iter().map(|b| b.n_decoy).sum::<u64>();
        let required = min_decoys.max(1);
        let curation = match decoys >= required {
            true => Curation::Sufficient,
            false => Curation::InsufficientDecoys { decoys, required },
        };

        // Largest target mass in a stretch of decoy-free bins
        let mut window = 0;
        let mut run = 0;
        for bin in &bins {
            match bin.n_decoy {
                0 => {
                    run += bin.n_target;
                    window = window.max(run);
                }
                _ => run = 0,
            }
        }

        CuredMap {
            bins,
            window: window.max(1),
            curation,
            non_finite: self.non_finite,
        }
    }
}

impl Extend<(f64, bool)> for TargetDecoyMap {
    fn extend<I: IntoIterator<Item = (f64, bool)>>(&mut self, iter: I) {
        for (score, decoy) in iter {
            self.add_point(score, decoy);
        }
    }
}

impl FromIterator<(f64, bool)> for TargetDecoyMap {
    fn from_iter<I: IntoIterator<Item = (f64, bool)>>(iter: I) -> Self {
        let mut map = TargetDecoyMap::default();
        map.extend(iter);
        map
    }
}

impl FromParallelIterator<(f64, bool)> for TargetDecoyMap {
    fn from_par_iter<I>(par_iter: I) -> Self
    where
        I: IntoParallelIterator<Item = (f64, bool)>,
    {
        par_iter
            .into_par_iter()
            .fold(TargetDecoyMap::default, |mut map, (score, decoy)| {
                map.add_point(score, decoy);
                map
            })
            .reduce(TargetDecoyMap::default, TargetDecoyMap::merge)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Curation {
    Sufficient,
    InsufficientDecoys { decoys: u64, required: u64 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct CuredMap {
    bins: Vec<Bin>,
    window: u64,
    curation: Curation,
    non_finite: usize,
}

impl CuredMap {
    pub fn bins(&self) -> &[Bin] {
        &self.bins
    }

    pub fn window(&self) -> u64 {
        self.window
    }

    pub fn curation(&self) -> Curation {
        self.curation
    }

    /// Points dropped because their score was NaN or infinite
    pub fn non_finite(&self) -> usize {
        self.non_finite
    }

    /// Range of bins `[lo, hi]` around bin `i` holding at least `need`
    /// target hits, split as evenly as possible on either side
    fn extent(prefix: &[u64], i: usize, need: u64) -> (usize, usize) {
        let n = prefix.len() - 1;
        let own = prefix[i + 1] - prefix[i];
        let remaining = need.saturating_sub(own);

        let avail_below = prefix[i];
        let avail_above = prefix[n] - prefix[i + 1];
        if avail_below + avail_above < remaining {
            return (0, n - 1);
        }

        let mut below = remaining - remaining / 2;
        let mut above = remaining / 2;
        if below > avail_below {
            above += below - avail_below;
            below = avail_below;
        } else if above > avail_above {
            below += above - avail_above;
            above = avail_above;
        }

        let floor = prefix[i] - below;
        let lo = prefix[..=i].partition_point(|&x| x <= floor) - 1;
        let ceiling = prefix[i + 1] + above;
        let hi = i + prefix[i + 1..].partition_point(|&x| x < ceiling);
        (lo, hi)
    }

    /// Compute the posterior error probability of every bin.
    ///
    /// Probabilities are made monotonic (non-increasing as the score
    /// improves) with a running minimum from the worst bin to the best.
    pub fn estimate_probabilities(&self) -> TargetDecoyModel {
        let mut probabilities = match self.curation {
            Curation::InsufficientDecoys { .. } => self
                .bins
                .iter()
                .map(|bin| bin.score.clamp(0.0, 1.0))
                .collect::<Vec<_>>(),
            Curation::Sufficient => {
                let mut targets = Vec::with_capacity(self.bins.len() + 1);
                let mut decoys = Vec::with_capacity(self.bins.len() + 1);
                targets.push(0);
                decoys.push(0);
                for bin in &self.bins {
                    targets.push(targets[targets.len() - 1] + bin.n_target);
                    decoys.push(decoys[decoys.len() - 1] + bin.n_decoy);
                }

                let need = self.window + 1;
                (0..self.bins.len())
                    .into_par_iter()
                    .map(|i| {
                        let (lo, hi) = Self::extent(&targets, i, need);
                        let t = (targets[hi + 1] - targets[lo]) as f64;
                        let d = (decoys[hi + 1] - decoys[lo]) as f64;
                        match t + d > 0.0 {
                            true => (d / (t + d)).clamp(0.0, 1.0),
                            false => 1.0,
                        }
                    })
                    .collect::<Vec<_>>()
            }
        };

        let mut p_min = 1.0f64;
        for p in probabilities.iter_mut().rev() {
            p_min = p_min.min(*p);
            *p = p_min;
        }

        TargetDecoyModel {
            bins: self.bins.clone(),
            probabilities,
            window: self.window,
            curation: self.curation,
        }
    }
}

/// Which axis a threshold is expressed on
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    Score,
    Probability,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    pub fdr: f64,
    pub probabilistic: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetDecoyResults {
    /// Requested FDR
    pub target_fdr: f64,
    pub axis: Axis,
    /// `None` if no threshold reaches the requested FDR
    pub limit: Option<f64>,
    /// Estimated FDR at `limit`
    pub fdr: f64,
    /// Estimated FNR at `limit`
    pub fnr: f64,
    pub n_validated_targets: u64,
    pub n_validated_decoys: u64,
    pub n_targets: u64,
    pub n_decoys: u64,
}

impl TargetDecoyResults {
    /// Whether a match with this score/probability passes the threshold
    pub fn accepts(&self, score: Option<f64>, probability: Option<f64>) -> bool {
        let value = match self.axis {
            Axis::Score => score,
            Axis::Probability => probability,
        };
        match (value, self.limit) {
            (Some(value), Some(limit)) => value <= limit,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetDecoyModel {
    bins: Vec<Bin>,
    probabilities: Vec<f64>,
    window: u64,
    curation: Curation,
}

impl TargetDecoyModel {
    pub fn bins(&self) -> &[Bin] {
        &self.bins
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    pub fn window(&self) -> u64 {
        self.window
    }

    pub fn curation(&self) -> Curation {
        self.curation
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.curation, Curation::InsufficientDecoys { .. })
    }

    pub fn n_targets(&self) -> u64 {
        self.bins.iter().map(|b| b.n_target).sum()
    }

    pub fn n_decoys(&self) -> u64 {
        self.bins.iter().map(|b| b.n_decoy).sum()
    }

    /// Posterior error probability of `score`: the probability of the
    /// closest observed bin at or better than `score`
    pub fn probability(&self, score: f64) -> f64 {
        if score.is_nan() {
            return 1.0;
        }
        if self.bins.is_empty() {
            return score.clamp(0.0, 1.0);
        }
        let ix = self.bins.partition_point(|b| b.score <= score);
        self.probabilities[ix.saturating_sub(1)]
    }

    /// Worst score whose cumulative `D / (T + D)`, counted from the best
    /// score down, is at most `fdr`
    pub fn score_limit(&self, fdr: f64) -> Option<f64> {
        let mut t = 0;
        let mut d = 0;
        let mut limit = None;
        for bin in &self.bins {
            t += bin.n_target;
            d += bin.n_decoy;
            if d as f64 <= fdr * (t + d) as f64 {
                limit = Some(bin.score);
            }
        }
        limit
    }

    /// Largest probability such that the expected proportion of false
    /// targets among accepted targets is at most `fdr`
    pub fn probability_limit(&self, fdr: f64) -> Option<f64> {
        let mut accepted = 0.0;
        let mut expected = 0.0;
        let mut limit = None;
        for (ix, (bin, &p)) in self.bins.iter().zip(&self.probabilities).enumerate() {
            accepted += bin.n_target as f64;
            expected += p * bin.n_target as f64;
            // Only test at the end of a run of tied probabilities, as the
            // whole run is accepted together
            let last_of_run = self.probabilities.get(ix + 1).map_or(true, |&next| next != p);
            if last_of_run && accepted > 0.0 && expected <= fdr * accepted {
                limit = Some(p);
            }
        }
        limit
    }

    /// Estimate the threshold for `policy`, along with the resulting FDR,
    /// FNR and counts. Degraded maps always use the probability axis.
    pub fn results(&self, policy: ThresholdPolicy) -> TargetDecoyResults {
        let axis = match policy.probabilistic || self.is_degraded() {
            true => Axis::Probability,
            false => Axis::Score,
        };
        let limit = match axis {
            Axis::Score => self.score_limit(policy.fdr),
            Axis::Probability => self.probability_limit(policy.fdr),
        };

        let mut results = TargetDecoyResults {
            target_fdr: policy.fdr,
            axis,
            limit,
            fdr: 0.0,
            fnr: 0.0,
            n_validated_targets: 0,
            n_validated_decoys: 0,
            n_targets: self.n_targets(),
            n_decoys: self.n_decoys(),
        };

        // Expected false (probability axis) among accepted, and expected true
        // among rejected/total targets
        let mut false_accepted = 0.0;
        let mut true_rejected = 0.0;
        let mut true_total = 0.0;
        for (bin, &p) in self.bins.iter().zip(&self.probabilities) {
            let accepted = results.accepts(Some(bin.score), Some(p));
            let t = bin.n_target as f64;
            true_total += (1.0 - p) * t;
            if accepted {
                results.n_validated_targets += bin.n_target;
                results.n_validated_decoys += bin.n_decoy;
                false_accepted += p * t;
            } else {
                true_rejected += (1.0 - p) * t;
            }
        }

        let (t_acc, d_acc) = (
            results.n_validated_targets as f64,
            results.n_validated_decoys as f64,
        );
        let (t_rej, d_rej) = (
            results.n_targets as f64 - t_acc,
            results.n_decoys as f64 - d_acc,
        );

        match axis {
            Axis::Score => {
                if t_acc + d_acc > 0.0 {
                    results.fdr = d_acc / (t_acc + d_acc);
                }
                let positives = results.n_targets as f64 - results.n_decoys as f64;
                if positives > 0.0 {
                    results.fnr = ((t_rej - d_rej).max(0.0) / positives).clamp(0.0, 1.0);
                }
            }
            Axis::Probability => {
                if t_acc > 0.0 {
                    results.fdr = false_accepted / t_acc;
                }
                if true_total > 0.0 {
                    results.fnr = (true_rejected / true_total).clamp(0.0, 1.0);
                }
            }
        }

        results
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn model(points: &[(f64, bool)]) -> TargetDecoyModel {
        points
            .iter()
            .copied()
            .collect::<TargetDecoyMap>()
            .cure(1)
            .estimate_probabilities()
    }

    #[test]
    fn single_engine_scenario() {
        let model = model(&[(0.001, false), (0.5, true), (0.9, true), (0.0001, false)]);
        assert_eq!(model.score_limit(0.1), Some(0.001));

        let results = model.results(ThresholdPolicy {
            fdr: 0.1,
            probabilistic: false,
        });
        assert_eq!(results.axis, Axis::Score);
        assert_eq!(results.n_validated_targets, 2);
        assert_eq!(results.n_validated_decoys, 0);
        assert_eq!(results.fdr, 0.0);
        assert_eq!(results.fnr, 0.0);
        assert!(results.accepts(Some(0.0001), None));
        assert!(results.accepts(Some(0.001), None));
        assert!(!results.accepts(Some(0.5), None));
        assert!(!results.accepts(None, None));
    }

    #[test]
    fn cure_aggregates_and_windows() {
        let mut map = TargetDecoyMap::default();
        for score in [1.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0] {
            map.add_point(score, false);
        }
        map.add_point(3.5, true);
        map.add_point(f64::NAN, false);
        map.add_point(-0.0, false);

        assert_eq!(map.len(), 9);
        let cured = map.cure(1);
        assert_eq!(cured.non_finite(), 1);
        assert_eq!(cured.bins()[0].score, 0.0);
        assert_eq!(cured.bins()[1].n_target, 2);
        // 0.0, 1.0 (x2), 2.0, 3.0 precede the first decoy
        assert_eq!(cured.window(), 5);
        assert_eq!(cured.curation(), Curation::Sufficient);
    }

    #[test]
    fn no_zero_probabilities_from_decoy_free_bins() {
        let mut points = vec![];
        for i in 0..50 {
            points.push((i as f64, false));
        }
        for i in 0..10 {
            points.push((30.5 + i as f64 * 2.0, true));
        }
        let model = model(&points);
        assert!(model.probabilities().iter().all(|&p| p > 0.0 && p <= 1.0));
    }

    #[test]
    fn monotonic_probabilities() {
        let points = [
            (0.1, false),
            (0.2, true),
            (0.3, false),
            (0.4, false),
            (0.5, false),
            (0.6, true),
            (0.7, false),
            (0.8, true),
            (0.9, true),
        ];
        let model = model(&points);
        let p = model.probabilities();
        assert!(p.windows(2).all(|w| w[0] <= w[1]), "{:?}", p);
    }

    #[test]
    fn estimation_is_idempotent() {
        let cured = [(0.1, false), (0.2, true), (0.3, false), (0.4, true)]
            .into_iter()
            .collect::<TargetDecoyMap>()
            .cure(1);
        assert_eq!(cured.estimate_probabilities(), cured.estimate_probabilities());
    }

    #[test]
    fn probability_lookup() {
        let model = model(&[(0.1, false), (0.2, false), (0.3, true), (0.4, true)]);
        // Before the first bin and between bins
        assert_eq!(model.probability(0.01), model.probabilities()[0]);
        assert_eq!(model.probability(0.25), model.probabilities()[1]);
        assert_eq!(model.probability(10.0), model.probabilities()[3]);
        assert_eq!(model.probability(f64::NAN), 1.0);
    }

    #[test]
    fn unachievable_threshold() {
        let model = model(&[(0.1, true), (0.2, false), (0.3, false)]);
        assert_eq!(model.score_limit(0.1), None);
        let results = model.results(ThresholdPolicy {
            fdr: 0.1,
            probabilistic: false,
        });
        assert_eq!(results.limit, None);
        assert_eq!(results.n_validated_targets, 0);
        assert_eq!(results.fnr, 1.0);
    }

    #[test]
    fn insufficient_decoys_use_identity() {
        let cured = [(0.001, false), (0.02, false), (0.3, false)]
            .into_iter()
            .collect::<TargetDecoyMap>()
            .cure(0);
        assert_eq!(
            cured.curation(),
            Curation::InsufficientDecoys {
                decoys: 0,
                required: 1
            }
        );
        let model = cured.estimate_probabilities();
        assert_eq!(model.probabilities(), &[0.001, 0.02, 0.3]);

        // Never validates everything on the strength of zero decoys
        let results = model.results(ThresholdPolicy {
            fdr: 0.05,
            probabilistic: false,
        });
        assert_eq!(results.axis, Axis::Probability);
        assert_eq!(results.limit, Some(0.02));
        assert_eq!(results.n_validated_targets, 2);
    }

    #[test]
    fn probabilistic_limit_respects_ties() {
        let model = model(&[
            (0.1, false),
            (0.2, false),
            (0.3, false),
            (0.4, true),
            (0.5, false),
            (0.6, true),
        ]);
        let results = model.results(ThresholdPolicy {
            fdr: 0.5,
            probabilistic: true,
        });
        let limit = results.limit.unwrap();
        let accepted = model
            .probabilities()
            .iter()
            .zip(model.bins())
            .filter(|(&p, _)| p <= limit)
            .map(|(&p, b)| (p * b.n_target as f64, b.n_target as f64))
            .fold((0.0, 0.0), |acc, x| (acc.0 + x.0, acc.1 + x.1));
        assert!(accepted.0 / accepted.1 <= 0.5);
        assert!((results.fdr - accepted.0 / accepted.1).abs() < 1e-12);
    }

    #[test]
    fn parallel_fill() {
        let points = (0..10_000)
            .map(|i| (i as f64 / 100.0, i % 7 == 0))
            .collect::<Vec<_>>();
        let parallel = points.par_iter().copied().collect::<TargetDecoyMap>();
        let serial = points.iter().copied().collect::<TargetDecoyMap>();
        assert_eq!(parallel.n_decoys(), serial.n_decoys());
        assert_eq!(parallel.cure(1), serial.cure(1));
    }
}
