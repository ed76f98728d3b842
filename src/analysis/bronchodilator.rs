use serde::{Deserialize, Serialize};

use super::panel::PanelAnalyzer;
use super::record::MeasurementRecord;
use crate::data::model::Parameter;
use crate::equations::classify::{round2, RSE_DEFAULT};
use crate::equations::z_score;

/// Minimum relative gain for a significant response (%).
pub const RESPONSE_PERCENT: f64 = 12.0;
/// Minimum absolute gain for a significant response (mL).
pub const RESPONSE_ML: f64 = 200.0;
/// FEV1 gain flagging a high probability of asthma (mL).
pub const HIGH_ASTHMA_ML: f64 = 400.0;

// ---------------------------------------------------------------------------
// VolumeChange
// ---------------------------------------------------------------------------

/// Pre/post change of one spirometric volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeChange {
    pub pre: f64,
    pub post: f64,
    pub change_percent: f64,
    pub change_ml: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_pre: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_post: Option<f64>,
}

impl VolumeChange {
    pub fn new(pre: f64, post: f64) -> Self {
        // Rounded to a micro-unit so decimal litres like 2.5 -> 2.8 land on
        // exactly 12 % instead of 11.999...
        let micro = |v: f64| (v * 1e6).round() / 1e6;
        Self {
            pre,
            post,
            change_percent: micro((post - pre) / pre * 100.0),
            change_ml: micro((post - pre) * 1000.0),
            z_pre: None,
            z_post: None,
        }
    }

    pub fn is_significant(&self) -> bool {
        self.change_percent >= RESPONSE_PERCENT && self.change_ml >= RESPONSE_ML
    }

    fn with_z_scores(mut self, predicted: f64) -> Self {
        self.z_pre = Some(round2(z_score(self.pre, predicted, RSE_DEFAULT)));
        self.z_post = Some(round2(z_score(self.post, predicted, RSE_DEFAULT)));
        self
    }
}

// ---------------------------------------------------------------------------
// BronchodilatorAssessment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BronchodilatorAssessment {
    Positive {
        by: Parameter,
        high_asthma_probability: bool,
        fev1: VolumeChange,
        fvc: VolumeChange,
    },
    Negative {
        fev1: VolumeChange,
        fvc: VolumeChange,
    },
    Insufficient {
        reason: String,
    },
}

impl BronchodilatorAssessment {
    pub fn is_positive(&self) -> bool {
        matches!(self, BronchodilatorAssessment::Positive { .. })
    }

    pub fn summary(&self) -> String {
        match self {
            BronchodilatorAssessment::Positive {
                by,
                high_asthma_probability,
                fev1,
                fvc,
            } => {
                let change = if *by == Parameter::Fev1 { fev1 } else { fvc };
                let mut line = format!(
                    "Positive bronchodilator response by {by} (+{:.0} mL, +{:.1} %)",
                    change.change_ml, change.change_percent
                );
                if *high_asthma_probability {
                    line.push_str("; high probability of asthma");
                }
                line
            }
            BronchodilatorAssessment::Negative { fev1, .. } => format!(
                "No significant bronchodilator response (FEV1 {:+.0} mL, {:+.1} %)",
                fev1.change_ml, fev1.change_percent
            ),
            BronchodilatorAssessment::Insufficient { reason } => {
                format!("Bronchodilator response not assessable: {reason}")
            }
        }
    }

    fn map_changes(self, f: impl Fn(Parameter, VolumeChange) -> VolumeChange) -> Self {
        match self {
            BronchodilatorAssessment::Positive {
                by,
                high_asthma_probability,
                fev1,
                fvc,
            } => BronchodilatorAssessment::Positive {
                by,
                high_asthma_probability,
                fev1: f(Parameter::Fev1, fev1),
                fvc: f(Parameter::Fvc, fvc),
            },
            BronchodilatorAssessment::Negative { fev1, fvc } => BronchodilatorAssessment::Negative {
                fev1: f(Parameter::Fev1, fev1),
                fvc: f(Parameter::Fvc, fvc),
            },
            insufficient => insufficient,
        }
    }
}

/// Judge the pre/post bronchodilator change of FEV1 and FVC.
///
/// FEV1 takes precedence; FVC is only consulted when FEV1 does not respond.
pub fn assess_bronchodilator(record: &MeasurementRecord) -> BronchodilatorAssessment {
    let insufficient = |reason: &str| BronchodilatorAssessment::Insufficient {
        reason: reason.to_string(),
    };

    let Some(fvc_post) = record.post(Parameter::Fvc) else {
        return insufficient("missing FVC post value");
    };
    let Some(fev1_post) = record.post(Parameter::Fev1) else {
        return insufficient("missing FEV1 post value");
    };
    let (Some(fev1_pre), Some(fvc_pre)) = (record.pre(Parameter::Fev1), record.pre(Parameter::Fvc))
    else {
        return insufficient("missing pre-bronchodilator values");
    };
    if fev1_pre <= 0.0 || fvc_pre <= 0.0 {
        return insufficient("pre-bronchodilator values must be positive");
    }

    let fev1 = VolumeChange::new(fev1_pre, fev1_post);
    let fvc = VolumeChange::new(fvc_pre, fvc_post);

    if fev1.is_significant() {
        BronchodilatorAssessment::Positive {
            by: Parameter::Fev1,
            high_asthma_probability: fev1.change_ml >= HIGH_ASTHMA_ML,
            fev1,
            fvc,
        }
    } else if fvc.is_significant() {
        BronchodilatorAssessment::Positive {
            by: Parameter::Fvc,
            high_asthma_probability: false,
            fev1,
            fvc,
        }
    } else {
        BronchodilatorAssessment::Negative { fev1, fvc }
    }
}

impl PanelAnalyzer {
    /// [`assess_bronchodilator`] plus pre/post z-scores of FEV1 and FVC
    /// when the subject's predicted values can be computed.
    pub fn bronchodilator(&self, record: &MeasurementRecord) -> BronchodilatorAssessment {
        let assessment = assess_bronchodilator(record);
        let Ok((age, height, sex)) = record.demographics() else {
            return assessment;
        };
        let evaluator = self.evaluator();
        assessment.map_changes(|parameter, change| {
            match evaluator.predict(age, height, sex, parameter) {
                Ok(predicted) => change.with_z_scores(predicted),
                Err(_) => change,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::panel::tests::flat_store;
    use crate::data::model::Sex;

    fn record(fev1: (f64, f64), fvc: (f64, f64)) -> MeasurementRecord {
        MeasurementRecord::new(40.0, 170.0, Sex::Male)
            .with_pre(Parameter::Fev1, fev1.0)
            .with_post(Parameter::Fev1, fev1.1)
            .with_pre(Parameter::Fvc, fvc.0)
            .with_post(Parameter::Fvc, fvc.1)
    }

    #[test]
    fn fev1_response() {
        let a = assess_bronchodilator(&record((2.0, 2.3), (3.0, 3.1)));
        match a {
            BronchodilatorAssessment::Positive {
                by,
                high_asthma_probability,
                fev1,
                ..
            } => {
                assert_eq!(by, Parameter::Fev1);
                assert!(!high_asthma_probability);
                assert_eq!(fev1.change_ml, 300.0);
                assert_eq!(fev1.change_percent, 15.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn boundary_twelve_percent_two_hundred_ml() {
        // 2.5 -> 2.8 is +300 mL and exactly +12 %.
        assert!(assess_bronchodilator(&record((2.5, 2.8), (3.0, 3.0))).is_positive());
        // 1.0 -> 1.2 is +20 % but exactly +200 mL.
        assert!(assess_bronchodilator(&record((1.0, 1.2), (3.0, 3.0))).is_positive());
        // +10 % only.
        assert!(!assess_bronchodilator(&record((3.0, 3.3), (4.0, 4.0))).is_positive());
        // +20 % but only +100 mL.
        assert!(!assess_bronchodilator(&record((0.5, 0.6), (4.0, 4.0))).is_positive());
    }

    #[test]
    fn high_asthma_probability_from_fev1_gain() {
        let a = assess_bronchodilator(&record((2.0, 2.45), (3.0, 3.0)));
        assert!(matches!(
            a,
            BronchodilatorAssessment::Positive {
                high_asthma_probability: true,
                ..
            }
        ));
    }

    #[test]
    fn fvc_used_when_fev1_does_not_respond() {
        let a = assess_bronchodilator(&record((3.0, 3.05), (3.0, 3.5)));
        assert!(matches!(
            a,
            BronchodilatorAssessment::Positive {
                by: Parameter::Fvc,
                high_asthma_probability: false,
                ..
            }
        ));
        assert!(a.summary().contains("FVC"));
    }

    #[test]
    fn negative_response() {
        let a = assess_bronchodilator(&record((3.0, 3.1), (4.0, 4.1)));
        assert!(matches!(a, BronchodilatorAssessment::Negative { .. }));
        assert!(a.summary().starts_with("No significant"));
    }

    #[test]
    fn missing_values_in_order() {
        let base = MeasurementRecord::new(40.0, 170.0, Sex::Male);
        let reason = |r: &MeasurementRecord| match assess_bronchodilator(r) {
            BronchodilatorAssessment::Insufficient { reason } => reason,
            other => panic!("unexpected {other:?}"),
        };

        assert!(reason(&base).contains("FVC post"));
        let r = base.clone().with_post(Parameter::Fvc, 3.0);
        assert!(reason(&r).contains("FEV1 post"));
        let r = r.with_post(Parameter::Fev1, 2.0).with_pre(Parameter::Fev1, 1.8);
        assert!(reason(&r).contains("pre-bronchodilator"));
        let r = r.with_pre(Parameter::Fvc, 0.0);
        assert!(reason(&r).contains("positive"));
    }

    #[test]
    fn z_scores_attached_when_predictable() {
        let analyzer = PanelAnalyzer::new(flat_store());
        let a = analyzer.bronchodilator(&record((3.0, 3.5), (4.0, 4.2)));
        let BronchodilatorAssessment::Positive { fev1, fvc, .. } = a else {
            panic!("expected a positive response");
        };
        assert!(fev1.z_pre.unwrap() < fev1.z_post.unwrap());
        assert!(fvc.z_pre.is_some());

        let mut no_sex = record((3.0, 3.5), (4.0, 4.2));
        no_sex.sex = None;
        let BronchodilatorAssessment::Positive { fev1, .. } = analyzer.bronchodilator(&no_sex) else {
            panic!("expected a positive response");
        };
        assert_eq!(fev1.z_pre, None);
    }

    #[test]
    fn serializes_with_outcome_tag() {
        let a = assess_bronchodilator(&record((3.0, 3.1), (4.0, 4.1)));
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["outcome"], "negative");
        assert!(json["fev1"].get("z_pre").is_none());
    }
}
