use crate::error::{ProcessingError, Result};
use crate::models::{SourceKind, VariableSpec};
use crate::utils::constants::{
    CELSIUS_TO_KELVIN, STANDARD_PRESSURE_KPA, WATER_TO_DRY_AIR_MASS_RATIO,
};

/// Fixed transform between a source unit and an output unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnitConversion {
    Identity,
    Offset(f64),
    Scale(f64),
    /// Depth accumulated over one step (mm) to a mass flux rate (kg/m2/s)
    DepthPerStepToRate,
    /// Relative humidity (%) to specific humidity (kg/kg)
    RelativeToSpecificHumidity,
}

impl UnitConversion {
    /// Resolve the transform for a declared unit pair
    pub fn resolve(source_unit: &str, output_unit: &str) -> Result<Self> {
        if source_unit == output_unit {
            return Ok(UnitConversion::Identity);
        }

        match (source_unit, output_unit) {
            ("degC", "K") => Ok(UnitConversion::Offset(CELSIUS_TO_KELVIN)),
            ("kPa", "Pa") => Ok(UnitConversion::Scale(1000.0)),
            ("hPa", "Pa") => Ok(UnitConversion::Scale(100.0)),
            ("%", "m3/m3") => Ok(UnitConversion::Scale(0.01)),
            ("mm", "kg/m2/s") => Ok(UnitConversion::DepthPerStepToRate),
            ("%", "kg/kg") => Ok(UnitConversion::RelativeToSpecificHumidity),
            ("umolCO2/mol", "ppm") => Ok(UnitConversion::Identity),
            ("umolCO2/m2/s", "umol/m2/s") | ("umolPhoton/m2/s", "umol/m2/s") => {
                Ok(UnitConversion::Identity)
            }
            _ => Err(ProcessingError::UnsupportedUnitConversion {
                from: source_unit.to_string(),
                to: output_unit.to_string(),
            }),
        }
    }

    /// Inverse of a linear transform, `None` for state-dependent ones
    pub fn inverse(&self) -> Option<Self> {
        match *self {
            UnitConversion::Identity => Some(UnitConversion::Identity),
            UnitConversion::Offset(offset) => Some(UnitConversion::Offset(-offset)),
            UnitConversion::Scale(factor) if factor != 0.0 => {
                Some(UnitConversion::Scale(1.0 / factor))
            }
            _ => None,
        }
    }

    /// Apply a linear transform to a single value
    pub fn apply_linear(&self, value: f64) -> Option<f64> {
        match *self {
            UnitConversion::Identity => Some(value),
            UnitConversion::Offset(offset) => Some(value + offset),
            UnitConversion::Scale(factor) => Some(value * factor),
            _ => None,
        }
    }
}

/// Site-level inputs some transforms depend on
#[derive(Debug, Clone, Copy)]
pub struct ConversionContext<'a> {
    pub step_seconds: f64,
    /// Air temperature in degC on the same grid as the converted values
    pub air_temperature: Option<&'a [f64]>,
    /// Air pressure in kPa on the same grid as the converted values
    pub air_pressure: Option<&'a [f64]>,
}

impl<'a> ConversionContext<'a> {
    pub fn new(step_seconds: i64) -> Self {
        Self {
            step_seconds: step_seconds as f64,
            air_temperature: None,
            air_pressure: None,
        }
    }

    pub fn with_air_temperature(mut self, values: Option<&'a [f64]>) -> Self {
        self.air_temperature = values;
        self
    }

    pub fn with_air_pressure(mut self, values: Option<&'a [f64]>) -> Self {
        self.air_pressure = values;
        self
    }
}

pub struct UnitConverter;

impl UnitConverter {
    /// Convert a value sequence from the variable's source unit to its output unit.
    ///
    /// Missing values (NaN) stay missing.
    pub fn convert(
        values: &[f64],
        spec: &VariableSpec,
        context: &ConversionContext<'_>,
    ) -> Result<Vec<f64>> {
        let conversion = UnitConversion::resolve(&spec.source_unit, &spec.output_unit)?;

        let values: Vec<f64> = match spec.source_kind {
            SourceKind::Integer => values.iter().map(|v| v.round()).collect(),
            SourceKind::Numeric => values.to_vec(),
        };

        match conversion {
            UnitConversion::Identity => Ok(values),
            UnitConversion::Offset(offset) => Ok(values.iter().map(|v| v + offset).collect()),
            UnitConversion::Scale(factor) => Ok(values.iter().map(|v| v * factor).collect()),
            UnitConversion::DepthPerStepToRate => {
                if context.step_seconds <= 0.0 {
                    return Err(ProcessingError::Config(format!(
                        "Cannot convert {} to a rate with a step of {}s",
                        spec.source_name, context.step_seconds
                    )));
                }
                Ok(values.iter().map(|v| v / context.step_seconds).collect())
            }
            UnitConversion::RelativeToSpecificHumidity => {
                Self::specific_humidity(&values, spec, context)
            }
        }
    }

    fn specific_humidity(
        relative_humidity: &[f64],
        spec: &VariableSpec,
        context: &ConversionContext<'_>,
    ) -> Result<Vec<f64>> {
        let temperature = context.air_temperature.ok_or_else(|| {
            ProcessingError::MissingData(format!(
                "{} needs air temperature to derive {}",
                spec.source_name, spec.output_name
            ))
        })?;

        if temperature.len() != relative_humidity.len() {
            return Err(ProcessingError::MissingData(format!(
                "air temperature has {} steps, {} has {}",
                temperature.len(),
                spec.source_name,
                relative_humidity.len()
            )));
        }

        Ok(relative_humidity
            .iter()
            .enumerate()
            .map(|(i, &rh)| {
                let pressure = context
                    .air_pressure
                    .and_then(|p| p.get(i).copied())
                    .filter(|p| !p.is_nan())
                    .unwrap_or(STANDARD_PRESSURE_KPA);
                rh_to_specific_humidity(rh, temperature[i], pressure)
            })
            .collect())
    }
}

/// Saturation vapour pressure (kPa) over water at `temp_c` (Bolton 1980)
pub fn saturation_vapour_pressure(temp_c: f64) -> f64 {
    0.6112 * (17.67 * temp_c / (temp_c + 243.5)).exp()
}

/// Specific humidity (kg/kg) from relative humidity (%), temperature (degC)
/// and pressure (kPa)
pub fn rh_to_specific_humidity(rh_percent: f64, temp_c: f64, pressure_kpa: f64) -> f64 {
    let vapour_pressure = rh_percent / 100.0 * saturation_vapour_pressure(temp_c);
    WATER_TO_DRY_AIR_MASS_RATIO * vapour_pressure
        / (pressure_kpa - (1.0 - WATER_TO_DRY_AIR_MASS_RATIO) * vapour_pressure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AggregateMethod, Category};

    fn spec(source_unit: &str, output_unit: &str) -> VariableSpec {
        VariableSpec {
            source_name: "X".to_string(),
            source_unit: source_unit.to_string(),
            source_kind: SourceKind::Numeric,
            output_name: "Y".to_string(),
            output_unit: output_unit.to_string(),
            long_name: "Test variable".to_string(),
            standard_name: None,
            valid_min: -1.0e9,
            valid_max: 1.0e9,
            is_essential_met: false,
            is_preferred_eval: false,
            category: Category::Met,
            substitute_source: None,
            aggregate_method: AggregateMethod::Mean,
        }
    }

    #[test]
    fn test_celsius_to_kelvin_round_trip() {
        let forward = UnitConversion::resolve("degC", "K").unwrap();
        let inverse = forward.inverse().unwrap();
        for value in [-40.0, 0.0, 21.7, 45.3] {
            let kelvin = forward.apply_linear(value).unwrap();
            let back = inverse.apply_linear(kelvin).unwrap();
            assert!((back - value).abs() < 1e-9);
        }
        assert!((forward.apply_linear(0.0).unwrap() - 273.15).abs() < 1e-12);
    }

    #[test]
    fn test_kilopascal_round_trip() {
        let forward = UnitConversion::resolve("kPa", "Pa").unwrap();
        let inverse = forward.inverse().unwrap();
        let pa = forward.apply_linear(101.325).unwrap();
        assert!((pa - 101_325.0).abs() < 1e-6);
        assert!((inverse.apply_linear(pa).unwrap() - 101.325).abs() < 1e-9);
    }

    #[test]
    fn test_unsupported_pair_names_both_units() {
        let err = UnitConversion::resolve("furlong", "K").unwrap_err();
        match err {
            ProcessingError::UnsupportedUnitConversion { from, to } => {
                assert_eq!(from, "furlong");
                assert_eq!(to, "K");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_precipitation_depth_to_rate() {
        let context = ConversionContext::new(1800);
        let out = UnitConverter::convert(&[1.0, 0.0, f64::NAN], &spec("mm", "kg/m2/s"), &context)
            .unwrap();
        assert!((out[0] - 1.0 / 1800.0).abs() < 1e-15);
        assert_eq!(out[1], 0.0);
        assert!(out[2].is_nan());
    }

    #[test]
    fn test_integer_kind_rounds() {
        let mut s = spec("degrees", "degrees");
        s.source_kind = SourceKind::Integer;
        let out = UnitConverter::convert(&[10.4, 10.6], &s, &ConversionContext::new(1800)).unwrap();
        assert_eq!(out, vec![10.0, 11.0]);
    }

    #[test]
    fn test_specific_humidity_needs_temperature() {
        let context = ConversionContext::new(1800);
        assert!(UnitConverter::convert(&[50.0], &spec("%", "kg/kg"), &context).is_err());

        let temperature = [20.0];
        let context = context.with_air_temperature(Some(&temperature));
        let q = UnitConverter::convert(&[50.0], &spec("%", "kg/kg"), &context).unwrap();
        // About 7.2 g/kg at 20 degC, 50 % and standard pressure
        assert!((q[0] - 0.0072).abs() < 2e-4, "q = {}", q[0]);
    }

    #[test]
    fn test_saturated_air_at_zero_celsius() {
        let es = saturation_vapour_pressure(0.0);
        assert!((es - 0.6112).abs() < 1e-12);
    }
}
