//! Compensatory multidimensional IRT
//!
//! ```text
//! P(correct | θ) = c + (1 - c) / (1 + exp(-(aᵀθ + d)))
//! ```
//!
//! One latent dimension per content area. Ability vectors are MAP estimates
//! under a multivariate normal prior, found by Fisher scoring with step
//! halving; standard errors come from the inverse posterior information.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigRecord, MirtConfig};
use crate::error::{EngineError, EngineResult};
use crate::item_bank::{ContentArea, Item, ItemBank, ItemId};
use crate::response::ResponsePattern;

const PROBABILITY_FLOOR: f64 = 1e-10;
const LOGIT_LIMIT: f64 = 20.0;
const VARIANCE_FLOOR: f64 = 0.001;
const Z_95: f64 = 1.959_963_984_540_054;

/// Item with one loading per latent dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMirtItem", into = "RawMirtItem")]
pub struct MirtItem {
    pub id: ItemId,
    loadings: Vec<f64>,
    intercept: f64,
    guessing: f64,
    primary: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMirtItem {
    pub id: ItemId,
    pub loadings: Vec<f64>,
    pub intercept: f64,
    #[serde(default)]
    pub guessing: f64,
    #[serde(default)]
    pub primary: Option<usize>,
}

impl TryFrom<RawMirtItem> for MirtItem {
    type Error = EngineError;

    fn try_from(raw: RawMirtItem) -> Result<Self, Self::Error> {
        let item = MirtItem::new(raw.id, raw.loadings, raw.intercept, raw.guessing)?;
        match raw.primary {
            Some(primary) => item.with_primary(primary),
            None => Ok(item),
        }
    }
}

impl From<MirtItem> for RawMirtItem {
    fn from(item: MirtItem) -> Self {
        Self {
            id: item.id,
            loadings: item.loadings,
            intercept: item.intercept,
            guessing: item.guessing,
            primary: Some(item.primary),
        }
    }
}

impl MirtItem {
    pub fn new(id: impl Into<ItemId>, loadings: Vec<f64>, intercept: f64, guessing: f64) -> EngineResult<Self> {
        let id = id.into();
        if loadings.iter().any(|a| !a.is_finite() || *a < 0.0) {
            return Err(EngineError::invalid_item(&id, "loadings must be finite and non-negative"));
        }
        let primary = loadings
            .iter()
            .enumerate()
            .filter(|(_, a)| **a > 0.0)
            .max_by(|x, y| x.1.total_cmp(y.1))
            .map(|(k, _)| k)
            .ok_or_else(|| EngineError::invalid_item(&id, "at least one loading must be positive"))?;
        if !intercept.is_finite() {
            return Err(EngineError::invalid_item(&id, "intercept must be finite"));
        }
        if !(0.0..1.0).contains(&guessing) {
            return Err(EngineError::invalid_item(&id, format!("guessing {} outside [0, 1)", guessing)));
        }
        Ok(Self {
            id,
            loadings,
            intercept,
            guessing,
            primary,
        })
    }

    /// Pin the primary dimension, e.g. when loadings tie
    pub fn with_primary(mut self, primary: usize) -> EngineResult<Self> {
        match self.loadings.get(primary) {
            Some(a) if *a > 0.0 => {
                self.primary = primary;
                Ok(self)
            }
            _ => Err(EngineError::invalid_item(
                &self.id,
                format!("primary dimension {} has no positive loading", primary),
            )),
        }
    }

    pub fn loadings(&self) -> &[f64] {
        &self.loadings
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn guessing(&self) -> f64 {
        self.guessing
    }

    /// Dimension with the largest loading
    pub fn primary(&self) -> usize {
        self.primary
    }

    pub fn probability(&self, theta: &[f64]) -> f64 {
        let z: f64 = self.loadings.iter().zip(theta).map(|(a, t)| a * t).sum::<f64>() + self.intercept;
        let z = z.clamp(-LOGIT_LIMIT, LOGIT_LIMIT);
        self.guessing + (1.0 - self.guessing) / (1.0 + (-z).exp())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirtResponse {
    pub item: MirtItem,
    pub correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionProfile {
    pub area: ContentArea,
    pub theta: f64,
    pub standard_error: f64,
    pub interval: (f64, f64),

    /// Responses whose primary dimension is this one
    pub item_count: usize,

    /// 1 for the strongest dimension
    pub rank: usize,
    pub weakly_measured: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirtEstimate {
    /// In configured dimension order
    pub theta: Vec<f64>,
    pub standard_errors: Vec<f64>,
    pub covariance: Vec<Vec<f64>>,

    /// Strongest dimension first
    pub profiles: Vec<DimensionProfile>,

    /// Unweighted mean of θ
    pub composite_theta: f64,
    pub iterations: usize,
    pub converged: bool,
    pub gradient_norm: f64,
    pub total_items: usize,
}

#[derive(Debug, Clone)]
pub struct MirtEstimator {
    config: MirtConfig,
    prior_mean: DVector<f64>,
    prior_covariance: DMatrix<f64>,
    prior_precision: DMatrix<f64>,
}

impl MirtEstimator {
    /// Estimator with a standard normal prior on every dimension
    pub fn new(config: MirtConfig) -> EngineResult<Self> {
        config.validate()?;
        let k = config.dimensions.len();
        Ok(Self {
            config,
            prior_mean: DVector::zeros(k),
            prior_covariance: DMatrix::identity(k, k),
            prior_precision: DMatrix::identity(k, k),
        })
    }

    /// Replace the prior with N(mean, covariance)
    pub fn with_prior(mut self, mean: Vec<f64>, covariance: DMatrix<f64>) -> EngineResult<Self> {
        let k = self.dimensions();
        if mean.len() != k {
            return Err(EngineError::DimensionMismatch {
                expected: k,
                found: mean.len(),
            });
        }
        if covariance.nrows() != k || covariance.ncols() != k {
            return Err(EngineError::DimensionMismatch {
                expected: k,
                found: covariance.nrows().max(covariance.ncols()),
            });
        }
        if mean.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
            return Err(EngineError::InvalidInput("prior must be finite".into()));
        }
        if (&covariance - covariance.transpose()).amax() > 1e-9 {
            return Err(EngineError::InvalidInput("prior covariance must be symmetric".into()));
        }
        let precision = covariance
            .clone()
            .cholesky()
            .map(|factor| factor.inverse())
            .ok_or_else(|| EngineError::InvalidInput("prior covariance must be positive definite".into()))?;

        self.prior_mean = DVector::from_vec(mean);
        self.prior_covariance = covariance;
        self.prior_precision = precision;
        Ok(self)
    }

    pub fn config(&self) -> &MirtConfig {
        &self.config
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions.len()
    }

    /// Spread a unidimensional bank item over the dimensions
    ///
    /// The item's own area carries its calibrated slope; every other
    /// dimension gets the configured cross-loading.
    pub fn lift(&self, item: &Item) -> EngineResult<MirtItem> {
        let primary = self
            .config
            .dimensions
            .iter()
            .position(|area| *area == item.area)
            .ok_or_else(|| {
                EngineError::InvalidInput(format!("item {} has area {} outside the MIRT dimensions", item.id, item.area))
            })?;
        let a = item.irt.discrimination();
        let loadings = (0..self.dimensions())
            .map(|k| if k == primary { a } else { self.config.cross_loading })
            .collect();
        MirtItem::new(item.id.clone(), loadings, -a * item.irt.difficulty(), item.irt.guessing())?.with_primary(primary)
    }

    /// Lift and score a unidimensional response pattern
    pub fn estimate_pattern(&self, bank: &ItemBank, pattern: &ResponsePattern) -> EngineResult<MirtEstimate> {
        let responses = pattern
            .records()
            .iter()
            .map(|record| {
                let item = bank.require(&record.item_id)?;
                Ok(MirtResponse {
                    item: self.lift(item)?,
                    correct: record.correct,
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;
        self.estimate(&responses)
    }

    pub fn estimate(&self, responses: &[MirtResponse]) -> EngineResult<MirtEstimate> {
        let k = self.dimensions();
        if let Some(bad) = responses.iter().find(|r| r.item.loadings.len() != k) {
            return Err(EngineError::DimensionMismatch {
                expected: k,
                found: bad.item.loadings.len(),
            });
        }

        let bound = self.config.theta_bound;
        let mut theta = self.prior_mean.map(|t| t.clamp(-bound, bound));
        let mut iterations = 0;
        let mut converged = false;
        let mut gradient_norm = f64::INFINITY;

        while iterations < self.config.max_iterations {
            iterations += 1;
            let (gradient, information) = self.derivatives(&theta, responses);
            gradient_norm = gradient.norm();

            let direction = match information.cholesky() {
                Some(factor) => factor.solve(&gradient),
                None => {
                    warn!("MIRT information matrix is not positive definite after {} iterations", iterations);
                    break;
                }
            };

            let current = self.log_posterior(&theta, responses);
            let mut step = 1.0;
            let mut candidate = &theta + &direction * step;
            for _ in 0..self.config.max_step_halvings {
                if self.log_posterior(&candidate, responses) >= current {
                    break;
                }
                step *= 0.5;
                candidate = &theta + &direction * step;
            }
            theta = candidate.map(|t| t.clamp(-bound, bound));

            if (&direction * step).amax() < self.config.tolerance {
                converged = true;
                break;
            }
        }

        if !converged {
            debug!(
                "MIRT MAP stopped after {} iterations with gradient norm {:.4}",
                iterations, gradient_norm
            );
        }

        let (_, information) = self.derivatives(&theta, responses);
        let covariance = information
            .cholesky()
            .map(|factor| factor.inverse())
            .unwrap_or_else(|| self.prior_covariance.clone());

        Ok(self.profile(theta, covariance, responses, iterations, converged, gradient_norm))
    }

    /// Log posterior up to a constant
    fn log_posterior(&self, theta: &DVector<f64>, responses: &[MirtResponse]) -> f64 {
        let log_likelihood: f64 = responses
            .iter()
            .map(|r| {
                let p = r
                    .item
                    .probability(theta.as_slice())
                    .clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR);
                if r.correct {
                    p.ln()
                } else {
                    (1.0 - p).ln()
                }
            })
            .sum();
        let centered = theta - &self.prior_mean;
        log_likelihood - 0.5 * centered.dot(&(&self.prior_precision * &centered))
    }

    /// Gradient of the log posterior and the posterior information matrix
    fn derivatives(&self, theta: &DVector<f64>, responses: &[MirtResponse]) -> (DVector<f64>, DMatrix<f64>) {
        let mut gradient = -(&self.prior_precision * (theta - &self.prior_mean));
        let mut information = self.prior_precision.clone();

        for r in responses {
            let a = DVector::from_column_slice(&r.item.loadings);
            let c = r.item.guessing;
            let p = r
                .item
                .probability(theta.as_slice())
                .clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR);
            let u = if r.correct { 1.0 } else { 0.0 };
            let w = (p - c) / ((1.0 - c) * p);

            gradient += &a * ((u - p) * w);
            information.ger(p * (1.0 - p) * w * w, &a, &a, 1.0);
        }
        (gradient, information)
    }

    fn profile(
        &self,
        theta: DVector<f64>,
        covariance: DMatrix<f64>,
        responses: &[MirtResponse],
        iterations: usize,
        converged: bool,
        gradient_norm: f64,
    ) -> MirtEstimate {
        let k = self.dimensions();
        let standard_errors: Vec<f64> = (0..k)
            .map(|d| covariance[(d, d)].max(VARIANCE_FLOOR).sqrt())
            .collect();

        let mut item_counts = vec![0usize; k];
        for r in responses {
            item_counts[r.item.primary] += 1;
        }

        let mut order: Vec<usize> = (0..k).collect();
        order.sort_by(|x, y| theta[*y].total_cmp(&theta[*x]));
        let profiles = order
            .iter()
            .enumerate()
            .map(|(rank, &d)| DimensionProfile {
                area: self.config.dimensions[d].clone(),
                theta: theta[d],
                standard_error: standard_errors[d],
                interval: (theta[d] - Z_95 * standard_errors[d], theta[d] + Z_95 * standard_errors[d]),
                item_count: item_counts[d],
                rank: rank + 1,
                weakly_measured: item_counts[d] < self.config.min_items_per_dimension,
            })
            .collect();

        MirtEstimate {
            composite_theta: theta.mean(),
            theta: theta.iter().copied().collect(),
            standard_errors,
            covariance: (0..k).map(|i| (0..k).map(|j| covariance[(i, j)]).collect()).collect(),
            profiles,
            iterations,
            converged,
            gradient_norm,
            total_items: responses.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irt::IrtParameters;
    use crate::response::ResponseRecord;
    use approx::assert_relative_eq;

    fn two_areas(cross_loading: f64) -> MirtConfig {
        MirtConfig {
            dimensions: vec![ContentArea::from("cirurgia"), ContentArea::from("pediatria")],
            cross_loading,
            tolerance: 1e-6,
            max_iterations: 100,
            ..MirtConfig::default()
        }
    }

    fn bank() -> ItemBank {
        let items = (0..6).flat_map(|i| {
            let b = -0.5 + 0.2 * i as f64;
            [
                Item::new(format!("cir{}", i), IrtParameters::new(1.2, b, 0.2).unwrap(), "cirurgia"),
                Item::new(format!("ped{}", i), IrtParameters::new(1.2, b, 0.2).unwrap(), "pediatria"),
            ]
        });
        ItemBank::new(items).unwrap()
    }

    fn pattern(records: impl IntoIterator<Item = (String, bool)>) -> ResponsePattern {
        ResponsePattern::from_records(records.into_iter().map(|(id, correct)| ResponseRecord::new(id, correct))).unwrap()
    }

    #[test]
    fn test_no_responses_returns_prior() {
        let estimate = MirtEstimator::new(MirtConfig::default()).unwrap().estimate(&[]).unwrap();
        assert!(estimate.converged);
        assert_eq!(estimate.iterations, 1);
        assert!(estimate.theta.iter().all(|t| *t == 0.0));
        for se in &estimate.standard_errors {
            assert_relative_eq!(*se, 1.0, epsilon = 1e-12);
        }
        assert!(estimate.profiles.iter().all(|p| p.weakly_measured));
        assert_eq!(estimate.composite_theta, 0.0);
    }

    #[test]
    fn test_lift_places_slope_on_item_area() {
        let estimator = MirtEstimator::new(MirtConfig::default()).unwrap();
        let item = Item::new("p1", IrtParameters::new(1.5, 0.4, 0.2).unwrap(), "pediatria");
        let lifted = estimator.lift(&item).unwrap();

        let primary = estimator
            .config()
            .dimensions
            .iter()
            .position(|a| a.as_str() == "pediatria")
            .unwrap();
        assert_eq!(lifted.primary(), primary);
        for (k, a) in lifted.loadings().iter().enumerate() {
            assert_eq!(*a, if k == primary { 1.5 } else { 0.3 });
        }
        assert_relative_eq!(lifted.intercept(), -0.6, epsilon = 1e-12);
        assert_eq!(lifted.guessing(), 0.2);

        let stray = Item::new("x", IrtParameters::new(1.0, 0.0, 0.0).unwrap(), "radiologia");
        assert!(matches!(estimator.lift(&stray), Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_area_strengths_are_separated_and_ranked() {
        let estimator = MirtEstimator::new(two_areas(0.3)).unwrap();
        let records = (0..6).flat_map(|i| [(format!("cir{}", i), true), (format!("ped{}", i), false)]);
        let estimate = estimator.estimate_pattern(&bank(), &pattern(records)).unwrap();

        assert!(estimate.converged);
        assert!(estimate.theta[0] > 0.0);
        assert!(estimate.theta[1] < 0.0);
        assert_eq!(estimate.profiles[0].area.as_str(), "cirurgia");
        assert_eq!(estimate.profiles[0].rank, 1);
        assert_eq!(estimate.profiles[1].item_count, 6);
        assert!(!estimate.profiles[1].weakly_measured);
        assert_relative_eq!(estimate.composite_theta, (estimate.theta[0] + estimate.theta[1]) / 2.0);

        for p in &estimate.profiles {
            assert!(p.interval.0 < p.theta && p.theta < p.interval.1);
            assert!(p.standard_error < 1.0);
        }
    }

    #[test]
    fn test_estimate_is_the_posterior_mode() {
        let estimator = MirtEstimator::new(two_areas(0.3)).unwrap();
        let records = [("cir0", true), ("cir3", false), ("cir5", true), ("ped1", true), ("ped4", false)]
            .map(|(id, c)| (id.to_string(), c));
        let estimate = estimator.estimate_pattern(&bank(), &pattern(records.clone())).unwrap();
        assert!(estimate.converged);
        assert!(estimate.gradient_norm < 1e-3);

        let bank = bank();
        let responses: Vec<MirtResponse> = records
            .iter()
            .map(|(id, correct)| MirtResponse {
                item: estimator.lift(bank.get(&ItemId::from(id.as_str())).unwrap()).unwrap(),
                correct: *correct,
            })
            .collect();
        let mode = DVector::from_vec(estimate.theta.clone());
        let at_mode = estimator.log_posterior(&mode, &responses);
        for (dx, dy) in [(0.05, 0.0), (-0.05, 0.0), (0.0, 0.05), (0.0, -0.05)] {
            let nearby = &mode + DVector::from_vec(vec![dx, dy]);
            assert!(estimator.log_posterior(&nearby, &responses) < at_mode);
        }
    }

    #[test]
    fn test_correlated_prior_borrows_strength() {
        let records = (0..6).map(|i| (format!("cir{}", i), true));
        let independent = MirtEstimator::new(two_areas(0.0))
            .unwrap()
            .estimate_pattern(&bank(), &pattern(records.clone()))
            .unwrap();
        assert_relative_eq!(independent.theta[1], 0.0, epsilon = 1e-9);

        let correlated = MirtEstimator::new(two_areas(0.0))
            .unwrap()
            .with_prior(vec![0.0, 0.0], DMatrix::from_row_slice(2, 2, &[1.0, 0.8, 0.8, 1.0]))
            .unwrap()
            .estimate_pattern(&bank(), &pattern(records))
            .unwrap();
        assert!(correlated.theta[1] > 0.2);
        assert!(correlated.theta[1] < correlated.theta[0]);
    }

    #[test]
    fn test_invalid_priors_and_items_are_rejected() {
        let estimator = MirtEstimator::new(two_areas(0.3)).unwrap();
        let indefinite = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!(estimator.clone().with_prior(vec![0.0, 0.0], indefinite).is_err());
        assert!(matches!(
            estimator.clone().with_prior(vec![0.0], DMatrix::identity(2, 2)),
            Err(EngineError::DimensionMismatch { expected: 2, found: 1 })
        ));

        let three = MirtItem::new("t", vec![1.0, 0.2, 0.2], 0.0, 0.2).unwrap();
        assert!(matches!(
            estimator.estimate(&[MirtResponse { item: three, correct: true }]),
            Err(EngineError::DimensionMismatch { expected: 2, found: 3 })
        ));
        assert!(MirtItem::new("z", vec![0.0, 0.0], 0.0, 0.2).is_err());
        assert!(MirtItem::new("g", vec![1.0, 0.0], 0.0, 1.0).is_err());
    }

    #[test]
    fn test_deserialization_validates_items() {
        let tied: MirtItem =
            serde_json::from_str(r#"{"id":"t","loadings":[0.3,0.3],"intercept":0.0,"primary":1}"#).unwrap();
        assert_eq!(tied.primary(), 1);
        let back: MirtItem = serde_json::from_str(&serde_json::to_string(&tied).unwrap()).unwrap();
        assert_eq!(back, tied);

        assert!(serde_json::from_str::<MirtItem>(r#"{"id":"n","loadings":[-1.0,1.0],"intercept":0.0}"#).is_err());
        assert!(serde_json::from_str::<MirtItem>(r#"{"id":"p","loadings":[1.0,0.0],"intercept":0.0,"primary":1}"#).is_err());
    }
}
