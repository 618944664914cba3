//! Joint accuracy and response-time scoring
//!
//! Accuracy follows the item's 3PL curve in ability θ; log response time is
//! normal around `β - τ` where β is the item's time intensity and τ the
//! examinee's speed. θ and τ are estimated together by EAP over a grid under
//! a correlated bivariate normal prior, and each response is labelled by how
//! far its time falls from what the estimated speed predicts.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::{BTreeMap, HashMap};

use log::debug;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, Normal};

use crate::config::{ConfigRecord, ResponseTimeConfig};
use crate::error::{EngineError, EngineResult};
use crate::irt::IrtParameters;
use crate::item_bank::{Item, ItemBank, ItemId};

const PROBABILITY_FLOOR: f64 = 1e-10;
const VARIANCE_FLOOR: f64 = 0.001;

/// 3PL item with a log-normal time model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawResponseTimeItem")]
pub struct ResponseTimeItem {
    pub id: ItemId,
    pub irt: IrtParameters,

    /// Expected log seconds at τ = 0
    time_intensity: f64,
    time_variance: f64,
}

#[derive(Deserialize)]
struct RawResponseTimeItem {
    id: ItemId,
    irt: IrtParameters,
    time_intensity: f64,
    time_variance: f64,
}

impl TryFrom<RawResponseTimeItem> for ResponseTimeItem {
    type Error = EngineError;

    fn try_from(raw: RawResponseTimeItem) -> Result<Self, Self::Error> {
        ResponseTimeItem::new(raw.id, raw.irt, raw.time_intensity, raw.time_variance)
    }
}

impl ResponseTimeItem {
    pub fn new(id: impl Into<ItemId>, irt: IrtParameters, time_intensity: f64, time_variance: f64) -> EngineResult<Self> {
        let id = id.into();
        if !time_intensity.is_finite() {
            return Err(EngineError::invalid_item(&id, "time intensity must be finite"));
        }
        if !(time_variance > 0.0 && time_variance.is_finite()) {
            return Err(EngineError::invalid_item(
                &id,
                format!("time variance must be positive, got {}", time_variance),
            ));
        }
        Ok(Self {
            id,
            irt,
            time_intensity,
            time_variance,
        })
    }

    /// Time parameters for a bank item: harder items are assumed slower
    /// unless an observed median log time is supplied
    pub fn from_item(item: &Item, config: &ResponseTimeConfig, median_log_time: Option<f64>) -> EngineResult<Self> {
        let intensity =
            median_log_time.unwrap_or(config.intensity_intercept + config.intensity_slope * item.irt.difficulty());
        Self::new(item.id.clone(), item.irt, intensity, config.time_variance)
    }

    pub fn time_intensity(&self) -> f64 {
        self.time_intensity
    }

    pub fn time_variance(&self) -> f64 {
        self.time_variance
    }

    pub fn expected_log_time(&self, tau: f64) -> f64 {
        self.time_intensity - tau
    }

    /// Standardized distance of a log time from its expectation
    pub fn residual(&self, log_time: f64, tau: f64) -> f64 {
        (log_time - self.expected_log_time(tau)) / self.time_variance.sqrt()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedResponse {
    pub item_id: ItemId,
    pub correct: bool,
    pub response_time_ms: u64,
}

impl TimedResponse {
    pub fn new(item_id: impl Into<ItemId>, correct: bool, response_time_ms: u64) -> Self {
        Self {
            item_id: item_id.into(),
            correct,
            response_time_ms,
        }
    }

    /// Log seconds, floored at `min_seconds`
    pub fn log_time(&self, min_seconds: f64) -> f64 {
        (self.response_time_ms as f64 / 1000.0).max(min_seconds).ln()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseBehavior {
    RapidGuess,
    FastCorrect,
    Normal,
    SlowCareful,
    AberrantSlow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedResponse {
    pub item_id: ItemId,
    pub log_time: f64,
    pub expected_log_time: f64,
    pub residual: f64,
    pub behavior: ResponseBehavior,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingSummary {
    pub total_responses: usize,
    pub mean_seconds: f64,

    /// Upper median
    pub median_seconds: f64,
    pub behavior_counts: BTreeMap<ResponseBehavior, usize>,
    pub rapid_guess_rate: f64,

    /// θ re-estimated without rapid guesses, when there were some to drop
    pub theta_without_rapid_guesses: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseTimeEstimate {
    pub theta: f64,
    pub tau: f64,
    pub theta_se: f64,
    pub tau_se: f64,

    /// Posterior correlation of θ and τ
    pub correlation: f64,

    /// Positive when accuracy dominates speed, both rescaled to the grid
    pub tradeoff: f64,
    pub responses: Vec<ClassifiedResponse>,
    pub summary: TimingSummary,
}

#[derive(Debug, Clone, Copy)]
struct Moments {
    theta: f64,
    tau: f64,
    theta_variance: f64,
    tau_variance: f64,
    covariance: f64,
}

/// One response joined with its item and time likelihood
struct Observation<'a> {
    item: &'a ResponseTimeItem,
    correct: bool,
    log_time: f64,
    time_density: Normal,
}

#[derive(Debug, Clone)]
pub struct ResponseTimeModel {
    config: ResponseTimeConfig,
    items: HashMap<ItemId, ResponseTimeItem>,
}

impl ResponseTimeModel {
    pub fn new(config: ResponseTimeConfig, items: impl IntoIterator<Item = ResponseTimeItem>) -> EngineResult<Self> {
        config.validate()?;
        let mut by_id = HashMap::new();
        for item in items {
            if by_id.contains_key(&item.id) {
                return Err(EngineError::InvalidInput(format!("duplicate timed item {}", item.id)));
            }
            by_id.insert(item.id.clone(), item);
        }
        Ok(Self { config, items: by_id })
    }

    /// Time model over a whole bank with difficulty-based intensities
    pub fn from_bank(config: ResponseTimeConfig, bank: &ItemBank) -> EngineResult<Self> {
        let items = bank
            .iter()
            .map(|item| ResponseTimeItem::from_item(item, &config, None))
            .collect::<EngineResult<Vec<_>>>()?;
        Self::new(config, items)
    }

    pub fn config(&self) -> &ResponseTimeConfig {
        &self.config
    }

    pub fn item(&self, id: &ItemId) -> Option<&ResponseTimeItem> {
        self.items.get(id)
    }

    pub fn classify(&self, residual: f64) -> ResponseBehavior {
        let c = &self.config;
        if residual < c.rapid_guess_z {
            ResponseBehavior::RapidGuess
        } else if residual > c.aberrant_slow_z {
            ResponseBehavior::AberrantSlow
        } else if residual < c.fast_z {
            ResponseBehavior::FastCorrect
        } else if residual > c.slow_z {
            ResponseBehavior::SlowCareful
        } else {
            ResponseBehavior::Normal
        }
    }

    pub fn estimate(&self, responses: &[TimedResponse]) -> EngineResult<ResponseTimeEstimate> {
        let observations = responses
            .iter()
            .map(|r| {
                let item = self
                    .items
                    .get(&r.item_id)
                    .ok_or_else(|| EngineError::UnknownItem(r.item_id.clone()))?;
                let time_density = Normal::new(0.0, item.time_variance.sqrt())
                    .map_err(|e| EngineError::invalid_item(&item.id, e.to_string()))?;
                Ok(Observation {
                    item,
                    correct: r.correct,
                    log_time: r.log_time(self.config.min_seconds),
                    time_density,
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;

        let moments = self.posterior_moments(&observations);
        let theta_se = moments.theta_variance.max(VARIANCE_FLOOR).sqrt();
        let tau_se = moments.tau_variance.max(VARIANCE_FLOOR).sqrt();
        let correlation = (moments.covariance / (theta_se * tau_se)).clamp(-1.0, 1.0);

        let classified: Vec<ClassifiedResponse> = observations
            .iter()
            .map(|o| {
                let residual = o.item.residual(o.log_time, moments.tau);
                ClassifiedResponse {
                    item_id: o.item.id.clone(),
                    log_time: o.log_time,
                    expected_log_time: o.item.expected_log_time(moments.tau),
                    residual,
                    behavior: self.classify(residual),
                }
            })
            .collect();

        let kept: Vec<&Observation> = observations
            .iter()
            .zip(&classified)
            .filter(|(_, c)| c.behavior != ResponseBehavior::RapidGuess)
            .map(|(o, _)| o)
            .collect();
        let theta_without_rapid_guesses = if !kept.is_empty() && kept.len() < observations.len() {
            Some(self.posterior_moments_of(kept.iter().copied()).theta)
        } else {
            None
        };

        let summary = summarize(&observations, &classified, theta_without_rapid_guesses);
        debug!(
            "Speed-accuracy EAP: θ={:.3} τ={:.3} over {} responses, {} rapid guesses",
            moments.theta,
            moments.tau,
            responses.len(),
            summary.behavior_counts[&ResponseBehavior::RapidGuess]
        );

        Ok(ResponseTimeEstimate {
            theta: moments.theta,
            tau: moments.tau,
            theta_se,
            tau_se,
            correlation,
            tradeoff: self.tradeoff(moments.theta, moments.tau),
            responses: classified,
            summary,
        })
    }

    /// Accuracy share minus speed share, each rescaled to [0, 1] over the grid
    pub fn tradeoff(&self, theta: f64, tau: f64) -> f64 {
        let c = &self.config;
        (theta - c.theta_min) / (c.theta_max - c.theta_min) - (tau - c.tau_min) / (c.tau_max - c.tau_min)
    }

    fn posterior_moments(&self, observations: &[Observation]) -> Moments {
        self.posterior_moments_of(observations.iter())
    }

    fn posterior_moments_of<'a, 'b: 'a>(&self, observations: impl Iterator<Item = &'a Observation<'b>> + Clone) -> Moments {
        let c = &self.config;
        let n = c.grid_points;
        let theta_step = (c.theta_max - c.theta_min) / (n - 1) as f64;
        let tau_step = (c.tau_max - c.tau_min) / (n - 1) as f64;
        let rho = c.prior_correlation;

        let mut nodes = Vec::with_capacity(n * n);
        for i in 0..n {
            let theta = c.theta_min + i as f64 * theta_step;
            for j in 0..n {
                let tau = c.tau_min + j as f64 * tau_step;
                let log_prior = -(theta * theta - 2.0 * rho * theta * tau + tau * tau) / (2.0 * (1.0 - rho * rho));
                let log_likelihood: f64 = observations
                    .clone()
                    .map(|o| {
                        let p = o.item.irt.probability(theta).clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR);
                        let accuracy = if o.correct { p.ln() } else { (1.0 - p).ln() };
                        accuracy + o.time_density.ln_pdf(o.log_time - o.item.expected_log_time(tau))
                    })
                    .sum();
                nodes.push((theta, tau, log_prior + log_likelihood));
            }
        }

        let peak = nodes.iter().map(|n| n.2).fold(f64::NEG_INFINITY, f64::max);
        let (mut total, mut s_theta, mut s_tau) = (0.0, 0.0, 0.0);
        let (mut s_theta2, mut s_tau2, mut s_cross) = (0.0, 0.0, 0.0);
        for (theta, tau, log_weight) in nodes {
            let w = (log_weight - peak).exp();
            total += w;
            s_theta += w * theta;
            s_tau += w * tau;
            s_theta2 += w * theta * theta;
            s_tau2 += w * tau * tau;
            s_cross += w * theta * tau;
        }

        let theta = s_theta / total;
        let tau = s_tau / total;
        Moments {
            theta,
            tau,
            theta_variance: s_theta2 / total - theta * theta,
            tau_variance: s_tau2 / total - tau * tau,
            covariance: s_cross / total - theta * tau,
        }
    }
}

fn summarize(
    observations: &[Observation],
    classified: &[ClassifiedResponse],
    theta_without_rapid_guesses: Option<f64>,
) -> TimingSummary {
    let mut seconds: Vec<f64> = observations.iter().map(|o| o.log_time.exp()).collect();
    seconds.sort_by(f64::total_cmp);
    let n = seconds.len();

    let mut behavior_counts: BTreeMap<ResponseBehavior, usize> = [
        ResponseBehavior::RapidGuess,
        ResponseBehavior::FastCorrect,
        ResponseBehavior::Normal,
        ResponseBehavior::SlowCareful,
        ResponseBehavior::AberrantSlow,
    ]
    .into_iter()
    .map(|b| (b, 0))
    .collect();
    for c in classified {
        *behavior_counts.entry(c.behavior).or_default() += 1;
    }

    let (mean_seconds, median_seconds, rapid_guess_rate) = if n > 0 {
        (
            seconds.iter().sum::<f64>() / n as f64,
            seconds[n / 2],
            behavior_counts[&ResponseBehavior::RapidGuess] as f64 / n as f64,
        )
    } else {
        (0.0, 0.0, 0.0)
    };

    TimingSummary {
        total_responses: n,
        mean_seconds,
        median_seconds,
        behavior_counts,
        rapid_guess_rate,
        theta_without_rapid_guesses,
    }
}
