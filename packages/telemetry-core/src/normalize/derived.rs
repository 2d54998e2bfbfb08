//! Derived-field formulas.
//!
//! A formula declares the input fields it needs; if any of them is missing or
//! not numeric the output field is omitted from the record, never defaulted.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt;

use crate::record::FieldValue;

type ComputeFn = Box<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// A named formula computing one derived field from numeric inputs.
pub struct DerivedFormula {
    name: String,
    inputs: Vec<String>,
    compute: ComputeFn,
}

impl DerivedFormula {
    /// Creates a formula. `compute` receives the inputs in declaration order.
    pub fn new<F>(name: impl Into<String>, inputs: &[&str], compute: F) -> Self
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            inputs: inputs.iter().map(|s| (*s).to_string()).collect(),
            compute: Box::new(compute),
        }
    }

    /// Ground speed in km/h from a wheel's rotational rate in rev/min.
    pub fn speed(rate_field: &str, wheel_radius_m: f64) -> Self {
        Self::new("speed", &[rate_field], move |inputs| {
            speed_kmh(wheel_radius_m, inputs[0])
        })
    }

    /// Name of the field this formula produces.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the fields this formula requires.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Evaluates the formula, or returns `None` if an input is unavailable
    /// or the result is not a finite number.
    pub fn evaluate(&self, fields: &BTreeMap<String, FieldValue>) -> Option<f64> {
        let values = self
            .inputs
            .iter()
            .map(|name| fields.get(name).and_then(FieldValue::as_f64))
            .collect::<Option<Vec<f64>>>()?;
        Some((self.compute)(&values)).filter(|v| v.is_finite())
    }
}

impl fmt::Debug for DerivedFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedFormula")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

/// `2π·r·rpm·60 / 1000`: wheel circumference times revolutions per hour, in km.
#[must_use]
pub fn speed_kmh(wheel_radius_m: f64, rpm: f64) -> f64 {
    2.0 * PI * wheel_radius_m * rpm * 60.0 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(entries: &[(&str, FieldValue)]) -> BTreeMap<String, FieldValue> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn speed_matches_formula() {
        let formula = DerivedFormula::speed("rpm", 0.3);
        let value = formula
            .evaluate(&fields(&[("rpm", FieldValue::Number(300.0))]))
            .unwrap();
        let expected = 2.0 * PI * 0.3 * 300.0 * 60.0 / 1000.0;
        assert!((value - expected).abs() < 1e-9);
        assert!((value - 33.929).abs() < 1e-3);
    }

    #[test]
    fn missing_input_skips_formula() {
        let formula = DerivedFormula::speed("rpm", 0.3);
        assert_eq!(formula.evaluate(&BTreeMap::new()), None);
    }

    #[test]
    fn text_input_skips_formula() {
        let formula = DerivedFormula::speed("rpm", 0.3);
        let f = fields(&[("rpm", FieldValue::Text("fast".into()))]);
        assert_eq!(formula.evaluate(&f), None);
    }

    #[test]
    fn multi_input_formula_requires_all_inputs() {
        let power = DerivedFormula::new("power", &["volts", "amps"], |v| v[0] * v[1]);
        assert_eq!(power.inputs(), ["volts".to_string(), "amps".to_string()]);

        let partial = fields(&[("volts", FieldValue::Number(12.0))]);
        assert_eq!(power.evaluate(&partial), None);

        let full = fields(&[
            ("volts", FieldValue::Number(12.0)),
            ("amps", FieldValue::Number(2.5)),
        ]);
        assert_eq!(power.evaluate(&full), Some(30.0));
    }

    #[test]
    fn non_finite_result_is_omitted() {
        let ratio = DerivedFormula::new("ratio", &["a", "b"], |v| v[0] / v[1]);
        let f = fields(&[("a", FieldValue::Number(1.0)), ("b", FieldValue::Number(0.0))]);
        assert_eq!(ratio.evaluate(&f), None);
    }
}
