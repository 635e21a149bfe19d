use crate::identification::{PeptideMatch, SpectrumMatch};
use crate::target_decoy::ThresholdPolicy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Requested threshold at one level
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelThreshold {
    pub fdr: f64,
    /// Overrides [`IdentificationPreferences::probabilistic`] for this level
    #[serde(default)]
    pub probabilistic: Option<bool>,
}

impl Default for LevelThreshold {
    fn default() -> Self {
        Self {
            fdr: 0.01,
            probabilistic: None,
        }
    }
}

/// How spectrum matches are grouped before estimating probabilities
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectrumStratification {
    /// Precursor charge
    #[default]
    Charge,
    /// Number of search engines that reported a hit
    EngineCount,
    None,
}

impl SpectrumStratification {
    pub fn key(&self, spectrum: &SpectrumMatch) -> u8 {
        match self {
            Self::Charge => spectrum.evidence.charge,
            Self::EngineCount => spectrum.evidence.advocates().min(u8::MAX as usize) as u8,
            Self::None => 0,
        }
    }
}

impl fmt::Display for SpectrumStratification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Charge => f.write_str("charge"),
            Self::EngineCount => f.write_str("engine_count"),
            Self::None => f.write_str("none"),
        }
    }
}

/// How peptide matches are grouped before estimating probabilities
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeptideStratification {
    #[default]
    None,
    /// Modification profile of the peptide
    Modifications,
}

impl PeptideStratification {
    pub fn key(&self, peptide: &PeptideMatch) -> String {
        match self {
            Self::None => String::new(),
            Self::Modifications => peptide.key.modification_signature(),
        }
    }
}

impl fmt::Display for PeptideStratification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Modifications => f.write_str("modifications"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentificationPreferences {
    /// Use probability thresholds instead of score thresholds
    pub probabilistic: bool,
    pub psm: LevelThreshold,
    pub peptide: LevelThreshold,
    pub protein: LevelThreshold,
    /// Maps holding fewer decoys fall back to identity probabilities
    pub min_decoys: u64,
    pub spectrum_stratification: SpectrumStratification,
    pub peptide_stratification: PeptideStratification,
}

impl Default for IdentificationPreferences {
    fn default() -> Self {
        Self {
            probabilistic: false,
            psm: LevelThreshold::default(),
            peptide: LevelThreshold::default(),
            protein: LevelThreshold::default(),
            min_decoys: 1,
            spectrum_stratification: SpectrumStratification::default(),
            peptide_stratification: PeptideStratification::default(),
        }
    }
}

impl IdentificationPreferences {
    /// Same FDR at every level
    pub fn with_fdr(fdr: f64) -> Self {
        let threshold = LevelThreshold {
            fdr,
            probabilistic: None,
        };
        Self {
            psm: threshold,
            peptide: threshold,
            protein: threshold,
            ..Default::default()
        }
    }

    fn policy(&self, level: LevelThreshold) -> ThresholdPolicy {
        ThresholdPolicy {
            fdr: level.fdr,
            probabilistic: level.probabilistic.unwrap_or(self.probabilistic),
        }
    }

    pub fn psm_policy(&self) -> ThresholdPolicy {
        self.policy(self.psm)
    }

    pub fn peptide_policy(&self) -> ThresholdPolicy {
        self.policy(self.peptide)
    }

    pub fn protein_policy(&self) -> ThresholdPolicy {
        self.policy(self.protein)
    }

    pub fn validate(&self) -> Result<()> {
        for level in [self.psm, self.peptide, self.protein] {
            if !(0.0..=1.0).contains(&level.fdr) {
                return Err(Error::InvalidFdr(level.fdr));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn level_overrides_global_mode() {
        let mut prefs = IdentificationPreferences::with_fdr(0.05);
        prefs.probabilistic = true;
        prefs.protein.probabilistic = Some(false);
        assert!(prefs.psm_policy().probabilistic);
        assert!(!prefs.protein_policy().probabilistic);
        assert_eq!(prefs.peptide_policy().fdr, 0.05);
    }

    #[test]
    fn rejects_invalid_fdr() {
        assert!(IdentificationPreferences::default().validate().is_ok());
        let prefs = IdentificationPreferences::with_fdr(1.5);
        assert!(matches!(prefs.validate(), Err(Error::InvalidFdr(_))));
        let prefs = IdentificationPreferences::with_fdr(f64::NAN);
        assert!(prefs.validate().is_err());
    }
}
