//! Target/decoy maps stratified by a key (precursor charge, number of search
//! engines, modification profile...), so that scores are only compared
//! within homogeneous groups.

use crate::target_decoy::{
    Curation, CuredMap, TargetDecoyMap, TargetDecoyModel, TargetDecoyResults, ThresholdPolicy,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

#[derive(Clone, Debug)]
pub struct SpecificMapSet<K> {
    maps: BTreeMap<K, TargetDecoyMap>,
}

impl<K: Ord> Default for SpecificMapSet<K> {
    fn default() -> Self {
        Self {
            maps: BTreeMap::new(),
        }
    }
}

impl<K: Ord> SpecificMapSet<K> {
    /// Route a point to the map for `key`, creating it if needed
    pub fn add_point(&mut self, key: K, score: f64, decoy: bool) {
        self.maps.entry(key).or_default().add_point(score, decoy);
    }

    pub fn merge(mut self, other: Self) -> Self {
        for (key, map) in other.maps {
            let merged = match self.maps.remove(&key) {
                Some(existing) => existing.merge(map),
                None => map,
            };
            self.maps.insert(key, merged);
        }
        self
    }

    pub fn get(&self, key: &K) -> Option<&TargetDecoyMap> {
        self.maps.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.maps.keys()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Cure every map independently
    pub fn cure(self, min_decoys: u64) -> CuredMapSet<K> {
        CuredMapSet {
            maps: self
                .maps
                .into_iter()
                .map(|(key, map)| (key, map.cure(min_decoys)))
                .collect(),
            min_decoys,
        }
    }
}

impl<K: Ord> Extend<(K, f64, bool)> for SpecificMapSet<K> {
    fn extend<I: IntoIterator<Item = (K, f64, bool)>>(&mut self, iter: I) {
        for (key, score, decoy) in iter {
            self.add_point(key, score, decoy);
        }
    }
}

impl<K: Ord> FromIterator<(K, f64, bool)> for SpecificMapSet<K> {
    fn from_iter<I: IntoIterator<Item = (K, f64, bool)>>(iter: I) -> Self {
        let mut set = SpecificMapSet::default();
        set.extend(iter);
        set
    }
}

impl<K: Ord + Send> FromParallelIterator<(K, f64, bool)> for SpecificMapSet<K> {
    fn from_par_iter<I>(par_iter: I) -> Self
    where
        I: IntoParallelIterator<Item = (K, f64, bool)>,
    {
        par_iter
            .into_par_iter()
            .fold(SpecificMapSet::default, |mut set, (key, score, decoy)| {
                set.add_point(key, score, decoy);
                set
            })
            .reduce(SpecificMapSet::default, SpecificMapSet::merge)
    }
}

#[derive(Clone, Debug)]
pub struct CuredMapSet<K> {
    maps: BTreeMap<K, CuredMap>,
    min_decoys: u64,
}

impl<K: Ord + Clone + Send + Sync> CuredMapSet<K> {
    pub fn get(&self, key: &K) -> Option<&CuredMap> {
        self.maps.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &CuredMap)> {
        self.maps.iter()
    }

    /// Keys whose map lacks decoy data, along with their curation status
    pub fn degraded(&self) -> impl Iterator<Item = (&K, Curation)> {
        self.maps
            .iter()
            .map(|(key, map)| (key, map.curation()))
            .filter(|(_, curation)| *curation != Curation::Sufficient)
    }

    pub fn estimate_probabilities(&self) -> SpecificModel<K> {
        SpecificModel {
            models: self
                .maps
                .par_iter()
                .map(|(key, map)| (key.clone(), map.estimate_probabilities()))
                .collect(),
            min_decoys: self.min_decoys,
            pooled: OnceLock::new(),
        }
    }
}

/// Finalized, per-key score -> probability models.
///
/// Lookups for a key without a model fall back to a pooled model built from
/// the bins of every key, constructed on the first such lookup.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize",
    deserialize = "K: Ord + Deserialize<'de>"
))]
pub struct SpecificModel<K> {
    models: BTreeMap<K, TargetDecoyModel>,
    min_decoys: u64,
    #[serde(skip)]
    pooled: OnceLock<TargetDecoyModel>,
}

impl<K: Ord> SpecificModel<K> {
    pub fn get(&self, key: &K) -> Option<&TargetDecoyModel> {
        self.models.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &TargetDecoyModel)> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn pooled(&self) -> &TargetDecoyModel {
        self.pooled.get_or_init(|| {
            log::debug!(
                "building pooled score distribution from {} keys",
                self.models.len()
            );
            let mut map = TargetDecoyMap::default();
            for bin in self.models.values().flat_map(|model| model.bins()) {
                map.add_bin(bin);
            }
            map.cure(self.min_decoys).estimate_probabilities()
        })
    }

    pub fn probability(&self, key: &K, score: f64) -> f64 {
        match self.models.get(key) {
            Some(model) => model.probability(score),
            None => self.pooled().probability(score),
        }
    }

    pub fn results(&self, policy: ThresholdPolicy) -> BTreeMap<K, TargetDecoyResults>
    where
        K: Clone,
    {
        self.models
            .iter()
            .map(|(key, model)| (key.clone(), model.results(policy)))
            .collect()
    }
}
