//! Identification store: spectrum, peptide and protein matches, each carrying
//! a single [`ValidationParameter`] once the pipeline has scored it.

use crate::{Error, Result};
use fnv::FnvHashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Search engine that reported a peptide assumption
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Advocate(pub u16);

impl Advocate {
    pub const MASCOT: Advocate = Advocate(0);
    pub const OMSSA: Advocate = Advocate(1);
    pub const XTANDEM: Advocate = Advocate(2);
}

impl fmt::Display for Advocate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::MASCOT => f.write_str("Mascot"),
            Self::OMSSA => f.write_str("OMSSA"),
            Self::XTANDEM => f.write_str("X!Tandem"),
            Advocate(id) => write!(f, "engine_{}", id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpectrumId(pub String);

impl fmt::Display for SpectrumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SpectrumId {
    fn from(value: &str) -> Self {
        SpectrumId(value.into())
    }
}

impl From<String> for SpectrumId {
    fn from(value: String) -> Self {
        SpectrumId(value)
    }
}

/// Peptide identity: sequence plus the sorted modification signature
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeptideKey {
    pub sequence: String,
    #[serde(default)]
    pub modifications: Vec<String>,
}

impl PeptideKey {
    pub fn new<S, I, M>(sequence: S, modifications: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = M>,
        M: Into<String>,
    {
        let mut modifications = modifications.into_iter().map(Into::into).collect_vec();
        modifications.sort();
        Self {
            sequence: sequence.into(),
            modifications,
        }
    }

    pub fn unmodified<S: Into<String>>(sequence: S) -> Self {
        Self::new(sequence, std::iter::empty::<String>())
    }

    pub fn modification_signature(&self) -> String {
        self.modifications.iter().join(",")
    }
}

impl fmt::Display for PeptideKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.modifications.is_empty() {
            true => f.write_str(&self.sequence),
            false => write!(f, "{}_{}", self.sequence, self.modification_signature()),
        }
    }
}

/// Sorted set of protein accessions
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProteinKey(Vec<String>);

impl ProteinKey {
    pub fn new<I, S>(accessions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProteinKey(
            accessions
                .into_iter()
                .map(Into::into)
                .sorted()
                .dedup()
                .collect(),
        )
    }

    pub fn accessions(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for ProteinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.iter().join(";"))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeptideAssumption {
    pub peptide: PeptideKey,
    pub e_value: f64,
    pub decoy: bool,
}

/// Per-level validation result. `score` and `probability` are `None` for
/// matches without usable evidence; such matches are never validated.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationParameter {
    pub score: Option<f64>,
    pub probability: Option<f64>,
    pub validated: bool,
}

impl ValidationParameter {
    pub fn scored(score: f64) -> Self {
        Self {
            score: Some(score),
            ..Default::default()
        }
    }

    pub fn unscored() -> Self {
        Self::default()
    }
}

/// A match at any of the three levels, keyed by `K` and carrying the level's
/// evidence `E`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Match<K, E> {
    pub key: K,
    pub decoy: bool,
    pub evidence: E,
    #[serde(default)]
    validation: Option<ValidationParameter>,
}

impl<K: fmt::Display, E> Match<K, E> {
    pub fn new(key: K, decoy: bool, evidence: E) -> Self {
        Self {
            key,
            decoy,
            evidence,
            validation: None,
        }
    }

    /// Attach the validation parameter. A match holds exactly one for its
    /// whole lifetime, a second attachment is rejected.
    pub fn attach(&mut self, parameter: ValidationParameter) -> Result<&mut ValidationParameter> {
        match self.validation {
            Some(_) => Err(Error::AlreadyAttached(self.key.to_string())),
            None => Ok(self.validation.insert(parameter)),
        }
    }

    pub fn validation(&self) -> Option<&ValidationParameter> {
        self.validation.as_ref()
    }

    pub fn validation_mut(&mut self) -> Option<&mut ValidationParameter> {
        self.validation.as_mut()
    }

    pub fn score(&self) -> Option<f64> {
        self.validation.and_then(|v| v.score)
    }

    pub fn probability(&self) -> Option<f64> {
        self.validation.and_then(|v| v.probability)
    }

    pub fn is_validated(&self) -> bool {
        self.validation.map(|v| v.validated).unwrap_or(false)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SpectrumEvidence {
    /// Precursor charge state
    pub charge: u8,
    /// Competing assumptions, per search engine
    pub assumptions: BTreeMap<Advocate, Vec<PeptideAssumption>>,
    #[serde(default)]
    best: Option<PeptideAssumption>,
}

impl SpectrumEvidence {
    pub fn new(charge: u8) -> Self {
        Self {
            charge,
            ..Default::default()
        }
    }

    pub fn push(&mut self, advocate: Advocate, assumption: PeptideAssumption) {
        self.assumptions.entry(advocate).or_default().push(assumption);
    }

    /// Lowest E-value assumption reported by `advocate`
    pub fn first_hit(&self, advocate: Advocate) -> Option<&PeptideAssumption> {
        self.assumptions
            .get(&advocate)?
            .iter()
            .min_by(|a, b| a.e_value.total_cmp(&b.e_value))
    }

    /// First hit of every search engine that reported something, in
    /// advocate order
    pub fn first_hits(&self) -> impl Iterator<Item = (Advocate, &PeptideAssumption)> + '_ {
        self.assumptions
            .keys()
            .filter_map(move |&advocate| self.first_hit(advocate).map(|hit| (advocate, hit)))
    }

    /// Number of search engines contributing at least one assumption
    pub fn advocates(&self) -> usize {
        self.assumptions.values().filter(|v| !v.is_empty()).count()
    }

    pub fn best_assumption(&self) -> Option<&PeptideAssumption> {
        self.best.as_ref()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PeptideEvidence {
    pub spectra: Vec<SpectrumId>,
    pub proteins: Vec<String>,
}

impl PeptideEvidence {
    /// Peptide maps to exactly one protein
    pub fn is_proteotypic(&self) -> bool {
        self.proteins.iter().unique().count() == 1
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProteinEvidence {
    pub peptides: Vec<PeptideKey>,
}

pub type SpectrumMatch = Match<SpectrumId, SpectrumEvidence>;
pub type PeptideMatch = Match<PeptideKey, PeptideEvidence>;
pub type ProteinMatch = Match<ProteinKey, ProteinEvidence>;

impl SpectrumMatch {
    /// Designate the best assumption; the spectrum's decoy status follows it
    pub fn set_best_assumption(&mut self, assumption: PeptideAssumption) {
        self.decoy = assumption.decoy;
        self.evidence.best = Some(assumption);
    }
}

/// Serialized form of an [`Identification`]
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IdentificationRecords {
    pub spectra: Vec<SpectrumMatch>,
    pub peptides: Vec<PeptideMatch>,
    pub proteins: Vec<ProteinMatch>,
}

/// Addressable store of every match, at every level.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "IdentificationRecords", into = "IdentificationRecords")]
pub struct Identification {
    pub(crate) spectra: Vec<SpectrumMatch>,
    pub(crate) peptides: Vec<PeptideMatch>,
    pub(crate) proteins: Vec<ProteinMatch>,
    spectrum_ix: FnvHashMap<SpectrumId, usize>,
    peptide_ix: FnvHashMap<PeptideKey, usize>,
    protein_ix: FnvHashMap<ProteinKey, usize>,
}

fn index<K, E>(matches: &[Match<K, E>]) -> Result<FnvHashMap<K, usize>>
where
    K: Clone + Eq + std::hash::Hash + fmt::Display,
{
    let mut ix = FnvHashMap::default();
    for (i, m) in matches.iter().enumerate() {
        if ix.insert(m.key.clone(), i).is_some() {
            return Err(Error::DuplicateKey(m.key.to_string()));
        }
    }
    Ok(ix)
}

impl Identification {
    /// Build the store, checking that keys are unique and that every
    /// spectrum and peptide referenced by a higher level exists.
    pub fn new(
        spectra: Vec<SpectrumMatch>,
        peptides: Vec<PeptideMatch>,
        proteins: Vec<ProteinMatch>,
    ) -> Result<Self> {
        let spectrum_ix = index(&spectra)?;
        let peptide_ix = index(&peptides)?;
        let protein_ix = index(&proteins)?;

        for peptide in &peptides {
            if let Some(missing) = peptide
                .evidence
                .spectra
                .iter()
                .find(|id| !spectrum_ix.contains_key(*id))
            {
                return Err(Error::MissingSpectrum {
                    peptide: peptide.key.clone(),
                    spectrum: missing.clone(),
                });
            }
        }

        for protein in &proteins {
            if let Some(missing) = protein
                .evidence
                .peptides
                .iter()
                .find(|key| !peptide_ix.contains_key(*key))
            {
                return Err(Error::MissingPeptide {
                    protein: protein.key.clone(),
                    peptide: missing.clone(),
                });
            }
        }

        Ok(Self {
            spectra,
            peptides,
            proteins,
            spectrum_ix,
            peptide_ix,
            protein_ix,
        })
    }

    pub fn spectra(&self) -> &[SpectrumMatch] {
        &self.spectra
    }

    pub fn peptides(&self) -> &[PeptideMatch] {
        &self.peptides
    }

    pub fn proteins(&self) -> &[ProteinMatch] {
        &self.proteins
    }

    pub fn spectrum(&self, id: &SpectrumId) -> Option<&SpectrumMatch> {
        self.spectrum_ix.get(id).map(|&ix| &self.spectra[ix])
    }

    pub fn peptide(&self, key: &PeptideKey) -> Option<&PeptideMatch> {
        self.peptide_ix.get(key).map(|&ix| &self.peptides[ix])
    }

    pub fn protein(&self, key: &ProteinKey) -> Option<&ProteinMatch> {
        self.protein_ix.get(key).map(|&ix| &self.proteins[ix])
    }
}

impl TryFrom<IdentificationRecords> for Identification {
    type Error = Error;

    fn try_from(value: IdentificationRecords) -> Result<Self> {
        Identification::new(value.spectra, value.peptides, value.proteins)
    }
}

impl From<Identification> for IdentificationRecords {
    fn from(value: Identification) -> Self {
        IdentificationRecords {
            spectra: value.spectra,
            peptides: value.peptides,
            proteins: value.proteins,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn assumption(seq: &str, e_value: f64, decoy: bool) -> PeptideAssumption {
        PeptideAssumption {
            peptide: PeptideKey::unmodified(seq),
            e_value,
            decoy,
        }
    }

    #[test]
    fn first_hit_is_lowest_e_value() {
        let mut evidence = SpectrumEvidence::new(2);
        evidence.push(Advocate::MASCOT, assumption("PEPTIDE", 0.1, false));
        evidence.push(Advocate::MASCOT, assumption("PEPTIDR", 0.01, true));
        evidence.push(Advocate::OMSSA, assumption("PEPTIDE", 0.5, false));

        assert_eq!(evidence.advocates(), 2);
        assert_eq!(
            evidence.first_hit(Advocate::MASCOT).unwrap().peptide.sequence,
            "PEPTIDR"
        );
        let hits = evidence.first_hits().map(|(a, _)| a).collect::<Vec<_>>();
        assert_eq!(hits, vec![Advocate::MASCOT, Advocate::OMSSA]);
        assert!(evidence.first_hit(Advocate::XTANDEM).is_none());
    }

    #[test]
    fn attach_once() {
        let mut m = SpectrumMatch::new("scan=1".into(), false, SpectrumEvidence::new(2));
        assert!(m.attach(ValidationParameter::scored(0.5)).is_ok());
        assert!(matches!(
            m.attach(ValidationParameter::scored(0.1)),
            Err(Error::AlreadyAttached(_))
        ));
        assert_eq!(m.score(), Some(0.5));
        m.validation_mut().unwrap().probability = Some(0.2);
        assert_eq!(m.probability(), Some(0.2));
        assert!(!m.is_validated());
    }

    #[test]
    fn best_assumption_sets_decoy() {
        let mut m = SpectrumMatch::new("scan=1".into(), false, SpectrumEvidence::new(2));
        m.set_best_assumption(assumption("EDITPEP", 0.1, true));
        assert!(m.decoy);
        assert_eq!(
            m.evidence.best_assumption().unwrap().peptide,
            PeptideKey::unmodified("EDITPEP")
        );
    }

    #[test]
    fn keys_are_canonical() {
        let a = PeptideKey::new("PEPTIDE", ["Oxidation@4", "Acetyl@0"]);
        let b = PeptideKey::new("PEPTIDE", ["Acetyl@0", "Oxidation@4"]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "PEPTIDE_Acetyl@0,Oxidation@4");

        let p = ProteinKey::new(["P2", "P1", "P2"]);
        assert_eq!(p.accessions(), &["P1".to_string(), "P2".to_string()]);
        assert_eq!(p.to_string(), "P1;P2");
    }

    #[test]
    fn store_checks_references() {
        let spectra = vec![SpectrumMatch::new(
            "scan=1".into(),
            false,
            SpectrumEvidence::new(2),
        )];
        let peptides = vec![PeptideMatch::new(
            PeptideKey::unmodified("PEPTIDE"),
            false,
            PeptideEvidence {
                spectra: vec!["scan=2".into()],
                proteins: vec!["P1".into()],
            },
        )];
        let err = Identification::new(spectra.clone(), peptides, vec![]).unwrap_err();
        assert!(matches!(err, Error::MissingSpectrum { .. }));

        let proteins = vec![ProteinMatch::new(
            ProteinKey::new(["P1"]),
            false,
            ProteinEvidence {
                peptides: vec![PeptideKey::unmodified("MISSING")],
            },
        )];
        let err = Identification::new(spectra.clone(), vec![], proteins).unwrap_err();
        assert!(matches!(err, Error::MissingPeptide { .. }));

        let proteins = vec![
            ProteinMatch::new(ProteinKey::new(["P2", "P1"]), false, ProteinEvidence::default()),
            ProteinMatch::new(ProteinKey::new(["P3"]), true, ProteinEvidence::default()),
        ];
        let store = Identification::new(vec![], vec![], proteins).unwrap();
        assert!(store.protein(&ProteinKey::new(["P3"])).unwrap().decoy);
        assert!(!store.protein(&ProteinKey::new(["P1", "P2"])).unwrap().decoy);
        assert!(store.protein(&ProteinKey::new(["P1"])).is_none());

        let err = Identification::new(
            vec![spectra[0].clone(), spectra[0].clone()],
            vec![],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(_)));
    }

    #[test]
    fn proteotypic() {
        let mut evidence = PeptideEvidence {
            spectra: vec![],
            proteins: vec!["P1".into(), "P1".into()],
        };
        assert!(evidence.is_proteotypic());
        evidence.proteins.push("P2".into());
        assert!(!evidence.is_proteotypic());
    }
}
