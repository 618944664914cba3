//! Property tests for the engine's numerical invariants

use proptest::prelude::*;
use psychometric_core::cdm::cat::expected_entropy_reduction;
use psychometric_core::cdm::CdmItem;
use psychometric_core::{
    AttributeSet, CalibrationConfig, ConfidenceRating, IrtParameters, IrtScorer, LatentClassPosterior, Quadrant,
};

proptest! {
    #[test]
    fn test_response_probability_bounded_and_increasing(
        a in 0.2f64..2.5,
        b in -3.0f64..3.0,
        c in 0.0f64..0.5,
        theta in -4.0f64..4.0,
        step in 0.01f64..2.0,
    ) {
        let item = IrtParameters::new(a, b, c).unwrap();
        let p = item.probability(theta);
        prop_assert!(p >= c && p < 1.0);
        prop_assert!(item.probability(theta + step) > p);
        prop_assert!(item.information(theta) >= 0.0);
    }

    #[test]
    fn test_scorer_is_deterministic(
        responses in prop::collection::vec((0.5f64..2.0, -2.5f64..2.5, any::<bool>()), 1..30)
    ) {
        let responses: Vec<(IrtParameters, bool)> = responses
            .into_iter()
            .map(|(a, b, correct)| (IrtParameters::new(a, b, 0.2).unwrap(), correct))
            .collect();
        let scorer = IrtScorer::default();
        let first = scorer.estimate_responses(&responses).unwrap();
        let second = scorer.estimate_responses(&responses).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert!(first.standard_error > 0.0);
        prop_assert!(first.theta >= -4.0 && first.theta <= 4.0);
    }

    #[test]
    fn test_posterior_stays_normalized(
        steps in prop::collection::vec((1u32..16, any::<bool>(), 0.01f64..0.4, 0.01f64..0.4), 1..25)
    ) {
        let mut posterior = LatentClassPosterior::uniform(4).unwrap();
        for (i, (bits, correct, slip, guess)) in steps.into_iter().enumerate() {
            let item = CdmItem::dina(format!("p{}", i), AttributeSet::from_bits(bits), slip, guess).unwrap();
            posterior = posterior.update(&item, correct).unwrap();
            let total: f64 = posterior.probabilities().iter().sum();
            prop_assert!((total - 1.0).abs() < 1e-9);
            prop_assert!(posterior.entropy() >= 0.0 && posterior.entropy() <= 4.0 + 1e-9);
        }
    }

    #[test]
    fn test_quadrant_depends_only_on_correctness_and_rating(correct in any::<bool>(), rating in 1u8..=5) {
        let config = CalibrationConfig::default();
        let confidence = ConfidenceRating::new(rating).unwrap();
        let quadrant = Quadrant::classify(correct, confidence, &config);
        prop_assert_eq!(quadrant, Quadrant::classify(correct, confidence, &config));
        prop_assert_eq!(quadrant == Quadrant::Uncertain, rating == 3);
        if quadrant.is_counted() {
            let confident = matches!(quadrant, Quadrant::Mastery | Quadrant::IllusionOfKnowing);
            let right = matches!(quadrant, Quadrant::Mastery | Quadrant::UnconsciousCompetence);
            prop_assert_eq!(confident, rating >= 4);
            prop_assert_eq!(right, correct);
        }
    }

    #[test]
    fn test_expected_entropy_never_increases(
        weights in prop::collection::vec(0.001f64..1.0, 8),
        bits in 1u32..8,
        table in prop::collection::vec(0.0f64..=1.0, 8),
    ) {
        let posterior = LatentClassPosterior::from_weights(3, weights).unwrap();
        let required = AttributeSet::from_bits(bits);
        let probabilities = table[..1usize << required.len()].to_vec();
        let item = CdmItem::gdina("g", required, probabilities).unwrap();

        let reduction = expected_entropy_reduction(&posterior, &item);
        prop_assert!(reduction >= -1e-9, "reduction {}", reduction);
        prop_assert!(reduction <= posterior.entropy() + 1e-9);

        // Matches the average entropy of the two possible updated posteriors
        let p_correct: f64 = posterior.classes().map(|(class, p)| p * item.probability(class)).sum();
        let after_correct = posterior.update(&item, true).unwrap().entropy();
        let after_incorrect = posterior.update(&item, false).unwrap().entropy();
        let expected_after = p_correct * after_correct + (1.0 - p_correct) * after_incorrect;
        prop_assert!((posterior.entropy() - expected_after - reduction).abs() < 1e-6);
    }
}
