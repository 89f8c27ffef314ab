//! Per-trait arithmetic mean over an application's answer vectors.
//!
//! Returns full precision; display rounding happens at the HTTP boundary.

use thiserror::Error;

use crate::personality::TraitVector;

#[derive(Debug, Error, PartialEq)]
#[error("cannot aggregate an empty answer set")]
pub struct EmptyAnswerSet;

pub fn aggregate(answers: &[TraitVector]) -> Result<TraitVector, EmptyAnswerSet> {
    if answers.is_empty() {
        return Err(EmptyAnswerSet);
    }
    let mut sums = [0.0_f64; 5];
    for answer in answers {
        for (sum, score) in sums.iter_mut().zip(answer.to_array()) {
            *sum += score;
        }
    }
    let n = answers.len() as f64;
    Ok(TraitVector::from_array(sums.map(|s| s / n)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::personality::Trait;

    fn v(e: f64) -> TraitVector {
        TraitVector::from_array([e, 0.5, 0.4, 0.3, 0.2])
    }

    #[test]
    fn test_empty_set_rejected() {
        assert_eq!(aggregate(&[]), Err(EmptyAnswerSet));
    }

    #[test]
    fn test_mean_is_exact_for_two_answers() {
        let avg = aggregate(&[v(0.2), v(0.8)]).unwrap();
        assert_eq!(avg.extraversion, 0.5);
    }

    #[test]
    fn test_single_answer_is_identity() {
        let one = TraitVector::from_array([0.11, -0.2, 1.3, 0.0, 0.7]);
        assert_eq!(aggregate(&[one]).unwrap(), one);
    }

    #[test]
    fn test_order_insensitive() {
        let v1 = TraitVector::from_array([0.13, 0.91, 0.44, 0.27, 0.66]);
        let v2 = TraitVector::from_array([0.52, 0.08, 0.71, 0.39, 0.12]);
        let v3 = TraitVector::from_array([0.97, 0.35, 0.03, 0.84, 0.58]);
        let a = aggregate(&[v1, v2, v3]).unwrap();
        let b = aggregate(&[v3, v1, v2]).unwrap();
        let c = aggregate(&[v2, v3, v1]).unwrap();
        for t in Trait::ALL {
            assert!((a.get(t) - b.get(t)).abs() < 1e-12);
            assert!((a.get(t) - c.get(t)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_each_trait_averaged_independently() {
        let a = TraitVector::from_array([1.0, 2.0, 3.0, 4.0, 5.0]);
        let b = TraitVector::from_array([3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(
            aggregate(&[a, b]).unwrap(),
            TraitVector::from_array([2.0, 3.0, 4.0, 5.0, 6.0])
        );
    }
}
