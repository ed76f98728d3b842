use crate::data::model::{CoefficientSet, Panel, Parameter, Sex, TableKey};
use crate::data::store::ReferenceStore;
use crate::error::{ReferenceError, Result};

// GLI 2017 transfer factor (diffusion capacity)
const DLCO_MALE: CoefficientSet = CoefficientSet::new(-7.034920, 2.018368, 0.012425);
const DLCO_FEMALE: CoefficientSet = CoefficientSet::new(-5.159451, 1.618697, 0.015390);
const KCO_MALE: CoefficientSet = CoefficientSet::new(4.088408, 0.415334, 0.113166);
const KCO_FEMALE: CoefficientSet = CoefficientSet::new(5.131492, 0.645656, 0.097395);
const VA_MALE: CoefficientSet = CoefficientSet::new(-11.086573, 2.430021, 0.097047);
const VA_FEMALE: CoefficientSet = CoefficientSet::new(-9.873970, 2.182316, 0.082868);

// GLI 2021 static lung volumes
const TLC_MALE: CoefficientSet = CoefficientSet::new(-10.5861, 0.1433, 2.3155);
const TLC_FEMALE: CoefficientSet = CoefficientSet::new(-10.1128, 0.1062, 2.2259);
const VC_MALE: CoefficientSet = CoefficientSet::new(-10.134371, -0.003532, 2.307980);
const VC_FEMALE: CoefficientSet = CoefficientSet::new(-9.230600, -0.005517, 2.116822);
const RV_MALE: CoefficientSet = CoefficientSet::new(-2.37211, 0.01346, 0.01307);
const RV_FEMALE: CoefficientSet = CoefficientSet::new(-2.50593, 0.01307, 0.01379);
const RVTLC_MALE: CoefficientSet = CoefficientSet::new(2.634, 0.01302, -0.00008862);
const RVTLC_FEMALE: CoefficientSet = CoefficientSet::new(2.666, 0.01411, -0.00003689);

/// Hard-coded constants for the diffusion and volume equations.
///
/// Spirometry has none here: its constants ship inside the reference
/// tables (see [`coefficients_for`]).
pub fn fixed_coefficients(parameter: Parameter, sex: Sex) -> Option<CoefficientSet> {
    use Parameter::*;
    use Sex::*;
    let set = match (parameter, sex) {
        (Dlco, Male) => DLCO_MALE,
        (Dlco, Female) => DLCO_FEMALE,
        (Kco, Male) => KCO_MALE,
        (Kco, Female) => KCO_FEMALE,
        (Va, Male) => VA_MALE,
        (Va, Female) => VA_FEMALE,
        (Tlc, Male) => TLC_MALE,
        (Tlc, Female) => TLC_FEMALE,
        (Vc, Male) => VC_MALE,
        (Vc, Female) => VC_FEMALE,
        (Rv, Male) => RV_MALE,
        (Rv, Female) => RV_FEMALE,
        (RvTlc, Male) => RVTLC_MALE,
        (RvTlc, Female) => RVTLC_FEMALE,
        (Fev1 | Fvc | Fef2575, _) => return None,
    };
    Some(set)
}

/// Regression constants for (parameter, sex).
///
/// Spirometry constants come from the coefficient block embedded in the
/// loaded reference sheet; everything else is fixed. Fails with
/// `UnknownParameter` when no set is registered for the pair.
pub fn coefficients_for(
    store: &ReferenceStore,
    parameter: Parameter,
    sex: Sex,
) -> Result<CoefficientSet> {
    let found = match parameter.panel() {
        Panel::Spirometry => store.embedded_coefficients(TableKey::new(parameter, sex))?,
        Panel::Diffusion | Panel::Volumes => fixed_coefficients(parameter, sex),
    };
    found.ok_or_else(|| {
        ReferenceError::UnknownParameter(format!("no coefficients registered for {parameter} {sex}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{ReferencePoint, ReferenceSheet, SplineTable};

    #[test]
    fn fixed_constants_cover_diffusion_and_volumes() {
        for panel in [Panel::Diffusion, Panel::Volumes] {
            for key in panel.required_keys() {
                assert!(fixed_coefficients(key.parameter, key.sex).is_some(), "{key}");
            }
        }
        for key in Panel::Spirometry.required_keys() {
            assert!(fixed_coefficients(key.parameter, key.sex).is_none());
        }
    }

    #[test]
    fn published_values() {
        assert_eq!(
            fixed_coefficients(Parameter::Dlco, Sex::Male),
            Some(CoefficientSet::new(-7.034920, 2.018368, 0.012425))
        );
        assert_eq!(
            fixed_coefficients(Parameter::RvTlc, Sex::Female),
            Some(CoefficientSet::new(2.666, 0.01411, -0.00003689))
        );
    }

    #[test]
    fn spirometry_uses_embedded_block() {
        let embedded = CoefficientSet::new(-10.0, 2.2, 0.05);
        let store = ReferenceStore::from_sheets(Panel::Spirometry.required_keys().map(|key| {
            ReferenceSheet {
                key,
                table: SplineTable::new(vec![ReferencePoint { age: 3.0, spline: 0.0 }]).unwrap(),
                coefficients: (key.parameter == Parameter::Fev1).then_some(embedded),
            }
        }));

        assert_eq!(
            coefficients_for(&store, Parameter::Fev1, Sex::Male).unwrap(),
            embedded
        );
        assert!(matches!(
            coefficients_for(&store, Parameter::Fvc, Sex::Male),
            Err(ReferenceError::UnknownParameter(_))
        ));
        // Fixed constants never touch the store.
        assert!(coefficients_for(&store, Parameter::Tlc, Sex::Male).is_ok());
    }
}
