//! End-to-end scoring, diagnosis and calibration scenarios

use std::collections::BTreeMap;
use std::sync::Arc;

use approx::assert_relative_eq;
use psychometric_core::calibration::{CalibrationLevel, LacunaType};
use psychometric_core::cdm::{CdmItem, CdCatStoppingReason};
use psychometric_core::{
    AttributeSet, CalibrationAnalyzer, CalibrationInput, CatConfig, CatSession, CdmConfig, CdmEngine, CdmRequest,
    ConfidenceRating, ExposureControl, IrtParameters, IrtScorer, Item, ItemBank, ItemId, Quadrant, ResponsePattern,
    ResponseRecord, SessionState,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn set(indices: &[usize]) -> AttributeSet {
    AttributeSet::from_indices(indices.iter().copied()).unwrap()
}

/// Ten correct answers at rising difficulty, ten wrong at falling difficulty
fn scenario_one_bank() -> (ItemBank, ResponsePattern) {
    let mut items = Vec::new();
    let mut records = Vec::new();
    for i in 0..10 {
        let easy = format!("c{:02}", i);
        let hard = format!("w{:02}", i);
        items.push(Item::new(
            easy.as_str(),
            IrtParameters::new(1.2, -2.0 + 0.2 * i as f64, 0.2).unwrap(),
            "clinica_medica",
        ));
        items.push(Item::new(
            hard.as_str(),
            IrtParameters::new(1.2, 2.0 - 0.2 * i as f64, 0.2).unwrap(),
            "clinica_medica",
        ));
        records.push(ResponseRecord::new(easy, true));
        records.push(ResponseRecord::new(hard, false));
    }
    (
        ItemBank::new(items).unwrap(),
        ResponsePattern::from_records(records).unwrap(),
    )
}

#[test]
fn test_mle_matches_dense_grid_reference() {
    init_logging();
    let (bank, pattern) = scenario_one_bank();
    let scorer = IrtScorer::default();
    let estimate = scorer.estimate(&pattern, &bank).unwrap();

    let log_likelihood = |theta: f64| -> f64 {
        pattern
            .records()
            .iter()
            .map(|r| bank.get(&r.item_id).unwrap().irt.log_likelihood(theta, r.correct))
            .sum()
    };
    let reference = (0..=80_000)
        .map(|i| -4.0 + 8.0 * i as f64 / 80_000.0)
        .fold((0.0, f64::NEG_INFINITY), |best, theta| {
            let ll = log_likelihood(theta);
            if ll > best.1 {
                (theta, ll)
            } else {
                best
            }
        })
        .0;

    assert!(!estimate.prior_regularized);
    assert!((estimate.theta - reference).abs() < 0.05);
    assert!(estimate.standard_error > 0.0);
    assert!(estimate.confidence_interval.0 < estimate.theta && estimate.theta < estimate.confidence_interval.1);
}

#[test]
fn test_scoring_is_bit_identical_across_calls() {
    let (bank, pattern) = scenario_one_bank();
    let scorer = IrtScorer::default();
    let first = scorer.estimate(&pattern, &bank).unwrap();
    let second = scorer.estimate(&pattern, &bank).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.theta.to_bits(), second.theta.to_bits());
}

#[test]
fn test_dina_scenario_with_six_attributes() {
    init_logging();
    let truth = set(&[0, 2, 4]);
    let partial = CdmItem::dina("pair", set(&[0, 2]), 0.1, 0.15).unwrap();
    let beyond = CdmItem::dina("quad", set(&[0, 2, 4, 5]), 0.1, 0.15).unwrap();

    assert_relative_eq!(partial.probability(truth), 0.9, epsilon = 1e-12);
    assert!(partial.probability(truth) > 0.8);
    assert_relative_eq!(beyond.probability(truth), 0.15, epsilon = 1e-12);
    assert!(beyond.probability(truth) < 0.2);

    let rows: Vec<&[usize]> = vec![
        &[0],
        &[1],
        &[2],
        &[3],
        &[4],
        &[5],
        &[0, 1],
        &[2, 3],
        &[4, 5],
        &[0, 2],
        &[1, 3],
        &[2, 4],
        &[3, 5],
    ];
    let items: Vec<CdmItem> = rows
        .iter()
        .enumerate()
        .map(|(i, r)| CdmItem::dina(format!("i{}", i), set(r), 0.05, 0.1).unwrap())
        .collect();
    let config = CdmConfig {
        attributes: 6,
        ..CdmConfig::default()
    };
    let engine = CdmEngine::new(config, items.clone()).unwrap();
    assert!(engine.diagnose_q_matrix().is_identifiable());

    let request = CdmRequest {
        responses: items
            .iter()
            .map(|item| ResponseRecord::new(item.id.clone(), truth.is_superset_of(item.required)))
            .collect(),
        q_matrix: items.iter().map(|item| (item.id.clone(), item.required)).collect(),
    };
    let result = engine.classify(&request).unwrap();
    assert_eq!(result.latent_class, truth);
    assert_eq!(result.mastered_attributes, vec![0, 2, 4]);
    assert_eq!(result.unmastered_attributes, vec![1, 3, 5]);
    assert!(result.posterior_entropy < 6.0);
}

#[test]
fn test_cd_cat_entropy_trace() {
    let items: Vec<CdmItem> = (0..4)
        .flat_map(|k| {
            (0..3).map(move |copy| CdmItem::dina(format!("k{}-{}", k, copy), set(&[k]), 0.05, 0.05).unwrap())
        })
        .collect();
    let config = CdmConfig {
        attributes: 4,
        entropy_threshold: 0.5,
        max_items: 12,
        ..CdmConfig::default()
    };
    let engine = CdmEngine::new(config, items).unwrap();
    let mut session = engine.start_adaptive().unwrap();
    assert_relative_eq!(session.posterior().entropy(), 4.0, epsilon = 1e-12);

    let truth = set(&[1, 3]);
    while let Some(candidate) = session.next_item() {
        let item = engine.item(&candidate.item_id).unwrap();
        let correct = truth.is_superset_of(item.required);
        session.record_response(&candidate.item_id, correct).unwrap();
        let total: f64 = session.posterior().probabilities().iter().sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-9);
    }

    assert_eq!(session.stopping_reason(), Some(CdCatStoppingReason::EntropyThreshold));
    assert_eq!(session.summary().map_class, truth);
}

#[test]
fn test_quadrant_sequence_scenario() {
    let analyzer = CalibrationAnalyzer::default();
    let steps = [(true, 5), (false, 5), (true, 1), (false, 2)];
    let labels = ["data", "pattern", "hypothesis", "management"];
    let input = CalibrationInput {
        levels: steps
            .iter()
            .zip(labels)
            .map(|(&(correct, rating), label)| {
                CalibrationLevel::new(label, correct, ConfidenceRating::new(rating).unwrap())
            })
            .collect(),
    };

    let result = analyzer.analyze(&input).unwrap();
    let quadrants: Vec<Quadrant> = result.level_results.iter().map(|r| r.quadrant).collect();
    assert_eq!(
        quadrants,
        vec![
            Quadrant::Mastery,
            Quadrant::IllusionOfKnowing,
            Quadrant::UnconsciousCompetence,
            Quadrant::KnownUnknown
        ]
    );
    assert_eq!(result.quadrant_counts.total(), 4);
    assert_eq!(result.uncertain_count, 0);
    assert!(result
        .lacunas
        .iter()
        .any(|l| l.lacuna_type == LacunaType::Metacognitive && l.level == 1));
}

#[test]
fn test_overconfidence_sign() {
    let analyzer = CalibrationAnalyzer::default();
    let case = |correct: bool| CalibrationInput {
        levels: (0..4)
            .map(|i| CalibrationLevel::new(format!("step {}", i), correct, ConfidenceRating::new(5).unwrap()))
            .collect(),
    };
    let right = analyzer.analyze(&case(true)).unwrap();
    let wrong = analyzer.analyze(&case(false)).unwrap();
    assert!(right.overconfidence_index.abs() < 1e-9);
    assert!(wrong.overconfidence_index > 0.9);
}

fn adaptive_bank() -> Arc<ItemBank> {
    let areas = [
        "clinica_medica",
        "cirurgia",
        "ginecologia_obstetricia",
        "pediatria",
        "saude_coletiva",
    ];
    let items = (0..200).map(|i| {
        let b = -3.0 + 6.0 * (i as f64 * 0.618_034).fract();
        let a = 0.8 + 0.8 * (i as f64 * 0.414_214).fract();
        Item::new(
            format!("item-{:03}", i),
            IrtParameters::new(a, b, 0.2).unwrap(),
            areas[i % areas.len()],
        )
    });
    Arc::new(ItemBank::new(items).unwrap())
}

fn run_session(bank: &Arc<ItemBank>, seed: u64, true_theta: f64) -> CatSession {
    let config = CatConfig::default();
    let exposure = Arc::new(ExposureControl::from_config(&config));
    let mut session = CatSession::new(config, IrtScorer::default(), bank.clone(), exposure, seed).unwrap();
    while let Some(item_id) = session.next_item().unwrap() {
        let correct = bank.get(&item_id).unwrap().irt.difficulty() < true_theta;
        session.record_response(&item_id, correct).unwrap();
    }
    session
}

#[test]
fn test_adaptive_session_is_reproducible_and_replayable() {
    init_logging();
    let bank = adaptive_bank();
    let first = run_session(&bank, 7, 0.8);
    let second = run_session(&bank, 7, 0.8);

    assert_eq!(first.state(), SessionState::Terminated);
    let ids = |s: &CatSession| s.pattern().records().iter().map(|r| r.item_id.clone()).collect::<Vec<ItemId>>();
    assert_eq!(ids(&first), ids(&second));
    assert!(first.items_administered() >= CatConfig::default().min_items);
    assert!(first.items_administered() <= CatConfig::default().max_items);

    let config = CatConfig::default();
    let replayed = CatSession::replay(
        config.clone(),
        IrtScorer::default(),
        bank.clone(),
        Arc::new(ExposureControl::from_config(&config)),
        7,
        first.pattern(),
    )
    .unwrap();
    assert_eq!(replayed.theta(), first.theta());
    assert_eq!(replayed.stopping_reason(), first.stopping_reason());

    let coverage: BTreeMap<_, _> = first.area_coverage().clone();
    assert_eq!(coverage.len(), 5);
}
