//! Versioned hyperparameter search spaces
//!
//! A [`SearchSpace`] is the single definition used both to sample trial
//! parameters and to restore them from the strings a tracking run logged.
//! Integer domains restore to the identical integers, and every logged
//! parameter set carries the space version so a changed definition cannot
//! silently reinterpret old runs.
//!
//! ```rust
//! use bus_delay_mlops::models::ModelFamily;
//! use rand::SeedableRng;
//!
//! let space = ModelFamily::RandomForest.search_space();
//! let mut rng = rand::rngs::StdRng::seed_from_u64(42);
//! let params = space.sample(&mut rng);
//!
//! let logged = space.to_logged(&params);
//! assert_eq!(space.restore(&logged).unwrap(), params);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;

use crate::{Error, Result};

/// Param that records which definition produced a parameter set.
pub const VERSION_PARAM: &str = "search_space_version";

/// Concrete hyperparameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Integer (depths, counts, seeds)
    Int(i64),
    /// Real number (rates, regularization)
    Float(f64),
    /// Text (objective names)
    Text(String),
}

impl ParamValue {
    /// Integer value, if this is one.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric value as `f64`. Integers widen.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    /// Text value, if this is one.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            // Shortest representation that parses back to the same f64.
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// Typed parameter set keyed by parameter name.
pub type ParamSet = BTreeMap<String, ParamValue>;

/// Domain of one hyperparameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamDomain {
    /// `round(uniform(low, high) / q) * q`, as an integer.
    QUniformInt {
        /// Lower bound (inclusive)
        low: i64,
        /// Upper bound (inclusive)
        high: i64,
        /// Quantization step; values below 1 sample as 1 and restore nothing
        q: i64,
    },
    /// `exp(uniform(low, high))`.
    LogUniform {
        /// Lower bound of the exponent
        low: f64,
        /// Upper bound of the exponent
        high: f64,
    },
    /// Constant, never sampled.
    Fixed(ParamValue),
}

impl ParamDomain {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParamValue {
        match self {
            Self::QUniformInt { low, high, q } => {
                let raw: f64 = rng.gen_range(*low as f64..=*high as f64);
                let step = (*q).max(1) as f64;
                let value = ((raw / step).round() * step) as i64;
                ParamValue::Int(value.clamp(*low, *high))
            }
            Self::LogUniform { low, high } => ParamValue::Float(rng.gen_range(*low..=*high).exp()),
            Self::Fixed(value) => value.clone(),
        }
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn restore(&self, name: &str, raw: &str) -> Result<ParamValue> {
        let invalid = |reason: String| Error::InvalidParam {
            name: name.to_string(),
            reason,
        };

        match self {
            Self::QUniformInt { low, high, q } => {
                // Integers may have been logged as floats ("12.0").
                let value = match raw.trim().parse::<i64>() {
                    Ok(v) => v,
                    Err(_) => {
                        let v: f64 = raw
                            .trim()
                            .parse()
                            .map_err(|_| invalid(format!("{raw:?} is not a number")))?;
                        if !v.is_finite() || v.fract() != 0.0 {
                            return Err(invalid(format!("{raw:?} is not an integer")));
                        }
                        v as i64
                    }
                };
                if value < *low || value > *high {
                    return Err(invalid(format!("{value} is outside [{low}, {high}]")));
                }
                if *q < 1 {
                    return Err(invalid(format!("step {q} must be at least 1")));
                }
                if value % q != 0 {
                    return Err(invalid(format!("{value} is not a multiple of step {q}")));
                }
                Ok(ParamValue::Int(value))
            }
            Self::LogUniform { low, high } => {
                let value: f64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| invalid(format!("{raw:?} is not a number")))?;
                let (min, max) = (low.exp(), high.exp());
                // Allow for rounding in exp() on the producing side.
                let slack = f64::EPSILON * 16.0;
                if !value.is_finite() || value < min * (1.0 - slack) || value > max * (1.0 + slack) {
                    return Err(invalid(format!("{value} is outside [{min}, {max}]")));
                }
                Ok(ParamValue::Float(value))
            }
            Self::Fixed(value) => Ok(value.clone()),
        }
    }
}

/// Named, ordered set of parameter domains.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSpace {
    version: u32,
    params: Vec<(&'static str, ParamDomain)>,
}

impl SearchSpace {
    /// Version of the definitions shipped with this crate.
    pub const VERSION: u32 = 1;

    /// Empty space at [`Self::VERSION`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            version: Self::VERSION,
            params: Vec::new(),
        }
    }

    /// Add a parameter.
    #[must_use]
    pub fn add(mut self, name: &'static str, domain: ParamDomain) -> Self {
        self.params.push((name, domain));
        self
    }

    /// Definition version.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Parameter names in definition order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.params.iter().map(|(name, _)| *name)
    }

    /// Draw one parameter set.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParamSet {
        self.params
            .iter()
            .map(|(name, domain)| ((*name).to_string(), domain.sample(rng)))
            .collect()
    }

    /// String form for logging as run params, including [`VERSION_PARAM`].
    #[must_use]
    pub fn to_logged(&self, params: &ParamSet) -> BTreeMap<String, String> {
        let mut logged: BTreeMap<String, String> = params
            .iter()
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect();
        logged.insert(VERSION_PARAM.to_string(), self.version.to_string());
        logged
    }

    /// Rebuild a typed parameter set from logged string params.
    ///
    /// Fixed parameters take their constant whatever was logged. Logged keys
    /// the space does not define are ignored. A missing
    /// [`VERSION_PARAM`] is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParam`] if a sampled parameter is missing or
    /// out of its domain, or the logged version differs from this space's.
    pub fn restore(&self, logged: &BTreeMap<String, String>) -> Result<ParamSet> {
        if let Some(version) = logged.get(VERSION_PARAM) {
            if version.trim() != self.version.to_string() {
                return Err(Error::InvalidParam {
                    name: VERSION_PARAM.to_string(),
                    reason: format!(
                        "logged with search space version {version}, this build defines version {}",
                        self.version
                    ),
                });
            }
        }

        self.params
            .iter()
            .map(|(name, domain)| {
                let value = match domain {
                    ParamDomain::Fixed(value) => value.clone(),
                    _ => {
                        let raw = logged.get(*name).ok_or_else(|| Error::InvalidParam {
                            name: (*name).to_string(),
                            reason: "not logged on the run".to_string(),
                        })?;
                        domain.restore(name, raw)?
                    }
                };
                Ok(((*name).to_string(), value))
            })
            .collect()
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn space() -> SearchSpace {
        SearchSpace::new()
            .add("max_depth", ParamDomain::QUniformInt { low: 4, high: 100, q: 1 })
            .add("learning_rate", ParamDomain::LogUniform { low: -3.0, high: 0.0 })
            .add("objective", ParamDomain::Fixed(ParamValue::Text("reg:squarederror".into())))
            .add("seed", ParamDomain::Fixed(ParamValue::Int(42)))
    }

    fn logged(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_integer_logged_as_float_restores() {
        let params = space()
            .restore(&logged(&[("max_depth", "12.0"), ("learning_rate", "0.1")]))
            .unwrap();
        assert_eq!(params["max_depth"], ParamValue::Int(12));
        assert_eq!(params["seed"], ParamValue::Int(42));
        assert_eq!(params["objective"].as_text(), Some("reg:squarederror"));
    }

    #[test]
    fn test_non_integral_value_is_rejected() {
        let err = space()
            .restore(&logged(&[("max_depth", "12.5"), ("learning_rate", "0.1")]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParam { ref name, .. } if name == "max_depth"));
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        assert!(space()
            .restore(&logged(&[("max_depth", "3"), ("learning_rate", "0.1")]))
            .is_err());
        assert!(space()
            .restore(&logged(&[("max_depth", "5"), ("learning_rate", "2.0")]))
            .is_err());
    }

    #[test]
    fn test_missing_param_is_rejected() {
        let err = space().restore(&logged(&[("max_depth", "5")])).unwrap_err();
        assert!(matches!(err, Error::InvalidParam { ref name, .. } if name == "learning_rate"));
    }

    #[test]
    fn test_unknown_keys_and_fixed_overrides_are_ignored() {
        let params = space()
            .restore(&logged(&[
                ("max_depth", "5"),
                ("learning_rate", "0.1"),
                ("seed", "7"),
                ("verbosity", "0"),
            ]))
            .unwrap();
        assert_eq!(params["seed"], ParamValue::Int(42));
        assert!(!params.contains_key("verbosity"));
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let err = space()
            .restore(&logged(&[
                ("max_depth", "5"),
                ("learning_rate", "0.1"),
                (VERSION_PARAM, "2"),
            ]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParam { ref name, .. } if name == VERSION_PARAM));
    }

    #[test]
    fn test_samples_stay_in_domain() {
        let mut rng = StdRng::seed_from_u64(42);
        let space = space();
        for _ in 0..500 {
            let params = space.sample(&mut rng);
            let depth = params["max_depth"].as_int().unwrap();
            assert!((4..=100).contains(&depth));
            let rate = params["learning_rate"].as_f64().unwrap();
            assert!(rate >= (-3.0f64).exp() && rate <= 1.0);
        }
    }

    #[test]
    fn test_zero_step_does_not_panic() {
        let space = SearchSpace::new().add("n", ParamDomain::QUniformInt { low: 0, high: 10, q: 0 });

        let err = space.restore(&logged(&[("n", "4")])).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidParam { ref name, ref reason } if name == "n" && reason.contains("step")
        ));

        let n = space.sample(&mut StdRng::seed_from_u64(1))["n"].as_int().unwrap();
        assert!((0..=10).contains(&n));
    }

    #[test]
    fn test_sampling_is_seeded() {
        let a = space().sample(&mut StdRng::seed_from_u64(42));
        let b = space().sample(&mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Logging a sampled parameter set and restoring it is the identity.
            #[test]
            fn prop_logged_params_restore_exactly(seed in any::<u64>()) {
                let space = space();
                let params = space.sample(&mut StdRng::seed_from_u64(seed));
                let restored = space.restore(&space.to_logged(&params)).unwrap();
                prop_assert_eq!(restored, params);
            }

            /// Every in-range integer round-trips through its string form.
            #[test]
            fn prop_integers_round_trip(depth in 4i64..=100) {
                let restored = space()
                    .restore(&logged(&[("max_depth", &depth.to_string()), ("learning_rate", "0.5")]))
                    .unwrap();
                prop_assert_eq!(restored["max_depth"].as_int(), Some(depth));
            }
        }
    }
}
