//! Per-zone weighted outcome table.
//!
//! The table maps a zone name to the percentage of exchanges that should end
//! with each [`OutcomeCode`]. It is loaded once at startup, validated before any
//! traffic flows, and shared read-only afterwards.
//!
//! # File format
//!
//! YAML (`.yaml`, `.yml`), TOML (`.toml`) or JSON (anything else). Missing
//! codes default to 0:
//!
//! ```yaml
//! us-east-1a:
//!   200: 70
//!   404: 20
//!   500: 10
//!   requestsPerSecond: 5
//!   parallelism: 2
//! ```

use crate::{zone_suffix, ConfigError, OutcomeCode, ZoneError};
use rand::Rng;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Outcome weights and load hints for one zone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Zone {
    /// Percentage of 200 responses.
    #[serde(rename = "200", default)]
    pub ok: i64,

    /// Percentage of 404 responses.
    #[serde(rename = "404", default)]
    pub not_found: i64,

    /// Percentage of 500 responses.
    #[serde(rename = "500", default)]
    pub internal_server_error: i64,

    /// Percentage of 503 responses.
    #[serde(rename = "503", default)]
    pub service_unavailable: i64,

    /// Percentage of 504 responses.
    #[serde(rename = "504", default)]
    pub gateway_timeout: i64,

    /// Requests per second a generator in this zone should aim for.
    #[serde(default)]
    pub requests_per_second: Option<u32>,

    /// Worker count a generator in this zone should run.
    #[serde(default)]
    pub parallelism: Option<u32>,
}

impl Zone {
    /// Set the weight for one code.
    pub fn with_weight(mut self, code: OutcomeCode, weight: i64) -> Self {
        *self.weight_mut(code) = weight;
        self
    }

    /// Weight configured for `code`.
    pub fn weight(&self, code: OutcomeCode) -> i64 {
        match code {
            OutcomeCode::Ok => self.ok,
            OutcomeCode::NotFound => self.not_found,
            OutcomeCode::InternalServerError => self.internal_server_error,
            OutcomeCode::ServiceUnavailable => self.service_unavailable,
            OutcomeCode::GatewayTimeout => self.gateway_timeout,
        }
    }

    fn weight_mut(&mut self, code: OutcomeCode) -> &mut i64 {
        match code {
            OutcomeCode::Ok => &mut self.ok,
            OutcomeCode::NotFound => &mut self.not_found,
            OutcomeCode::InternalServerError => &mut self.internal_server_error,
            OutcomeCode::ServiceUnavailable => &mut self.service_unavailable,
            OutcomeCode::GatewayTimeout => &mut self.gateway_timeout,
        }
    }

    /// Weights in bucket order.
    pub fn weights(&self) -> impl Iterator<Item = (OutcomeCode, i64)> + '_ {
        OutcomeCode::ALL
            .into_iter()
            .map(move |code| (code, self.weight(code)))
    }

    /// Sum of all weights, saturating at `i64::MAX`.
    pub fn total(&self) -> i64 {
        self.weights()
            .fold(0i64, |total, (_, weight)| total.saturating_add(weight))
    }

    /// Map a draw in `[0, total)` to the code whose bucket contains it.
    fn bucket_for(&self, draw: i64) -> Option<OutcomeCode> {
        let mut upper: i64 = 0;
        for (code, weight) in self.weights() {
            upper = upper.saturating_add(weight);
            if draw < upper {
                return Some(code);
            }
        }
        None
    }
}

/// What to do when an exchange asks for a zone the table does not know.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownZonePolicy {
    /// Lookup fails with [`ZoneError::UnknownZone`].
    #[default]
    Reject,
    /// Lookup succeeds with [`OutcomeCode::Ok`].
    DefaultSuccess,
}

impl fmt::Display for UnknownZonePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownZonePolicy::Reject => write!(f, "reject"),
            UnknownZonePolicy::DefaultSuccess => write!(f, "default-success"),
        }
    }
}

impl FromStr for UnknownZonePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reject" => Ok(UnknownZonePolicy::Reject),
            "default-success" | "default" => Ok(UnknownZonePolicy::DefaultSuccess),
            other => Err(format!("Unknown zone policy: {}", other)),
        }
    }
}

/// Validated mapping from zone name to outcome weights.
#[derive(Debug, Clone, Default)]
pub struct ZoneOutcomeTable {
    zones: BTreeMap<String, Zone>,
    policy: UnknownZonePolicy,
}

impl ZoneOutcomeTable {
    /// Create a table from already-parsed zones. Call [`validate`](Self::validate)
    /// before use.
    pub fn new(zones: BTreeMap<String, Zone>) -> Self {
        Self {
            zones,
            policy: UnknownZonePolicy::default(),
        }
    }

    /// Build a table from `(name, zone)` pairs.
    pub fn from_zones<I, S>(zones: I) -> Self
    where
        I: IntoIterator<Item = (S, Zone)>,
        S: Into<String>,
    {
        Self::new(
            zones
                .into_iter()
                .map(|(name, zone)| (name.into(), zone))
                .collect(),
        )
    }

    /// Set the unknown-zone policy.
    pub fn with_policy(mut self, policy: UnknownZonePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Load, parse and validate a zone config file.
    ///
    /// Files ending in `.yaml` or `.yml` are parsed as YAML, `.toml` as TOML,
    /// everything else as JSON.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let table = match extension.as_deref() {
            Some("yaml" | "yml") => Self::parse_yaml(&contents)?,
            Some("toml") => Self::parse_toml(&contents)?,
            _ => Self::parse_json(&contents)?,
        };

        info!(
            path = %path.display(),
            zones = table.len(),
            "Loaded zone config"
        );
        Ok(table)
    }

    /// Parse and validate a YAML zone config.
    pub fn parse_yaml(contents: &str) -> Result<Self, ConfigError> {
        let zones: BTreeMap<String, Zone> =
            serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::validated(zones)
    }

    /// Parse and validate a TOML zone config.
    pub fn parse_toml(contents: &str) -> Result<Self, ConfigError> {
        let zones: BTreeMap<String, Zone> =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::validated(zones)
    }

    /// Parse and validate a JSON zone config.
    pub fn parse_json(contents: &str) -> Result<Self, ConfigError> {
        let zones: BTreeMap<String, Zone> =
            serde_json::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::validated(zones)
    }

    fn validated(zones: BTreeMap<String, Zone>) -> Result<Self, ConfigError> {
        let table = Self::new(zones);
        table.validate()?;
        Ok(table)
    }

    /// Check that every zone has non-negative weights summing to exactly 100.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.zones.is_empty() {
            return Err(ConfigError::Empty);
        }

        for (name, zone) in &self.zones {
            if let Some((code, weight)) = zone.weights().find(|(_, weight)| *weight < 0) {
                return Err(ConfigError::NegativeWeight {
                    zone: name.clone(),
                    code,
                    weight,
                });
            }

            let total = zone.total();
            if total != 100 {
                return Err(ConfigError::BadTotal {
                    zone: name.clone(),
                    total,
                });
            }
        }

        Ok(())
    }

    /// Find the entry for a zone.
    ///
    /// The full name is tried first, then its suffix (`us-east-1a` → `1a`), so a
    /// table can be keyed either way.
    pub fn resolve(&self, zone: &str) -> Option<(&str, &Zone)> {
        self.zones
            .get_key_value(zone)
            .or_else(|| self.zones.get_key_value(zone_suffix(zone)))
            .map(|(name, entry)| (name.as_str(), entry))
    }

    /// Whether `zone` resolves to an entry.
    pub fn contains(&self, zone: &str) -> bool {
        self.resolve(zone).is_some()
    }

    /// Draw an outcome for `zone`.
    ///
    /// Draws uniformly in `[0, total)` and walks the codes in
    /// [`OutcomeCode::ALL`] order, accumulating weight until the draw falls
    /// inside a bucket. Unknown zones follow the table's [`UnknownZonePolicy`].
    pub fn sample_outcome<R: Rng + ?Sized>(
        &self,
        zone: &str,
        rng: &mut R,
    ) -> Result<OutcomeCode, ZoneError> {
        let Some((name, entry)) = self.resolve(zone) else {
            return match self.policy {
                UnknownZonePolicy::Reject => Err(ZoneError::UnknownZone(zone.to_string())),
                UnknownZonePolicy::DefaultSuccess => {
                    debug!(zone, "Unknown zone, defaulting to success");
                    Ok(OutcomeCode::Ok)
                }
            };
        };

        let total = entry.total();
        if total <= 0 {
            return Err(ZoneError::NoWeights(name.to_string()));
        }

        let draw = rng.gen_range(0..total);
        entry
            .bucket_for(draw)
            .ok_or_else(|| ZoneError::NoWeights(name.to_string()))
    }

    /// Requests-per-second hint for a zone (0 when unknown or unset).
    pub fn requests_per_second(&self, zone: &str) -> u32 {
        self.resolve(zone)
            .and_then(|(_, entry)| entry.requests_per_second)
            .unwrap_or(0)
    }

    /// Parallelism hint for a zone (0 when unknown or unset).
    pub fn parallelism(&self, zone: &str) -> u32 {
        self.resolve(zone)
            .and_then(|(_, entry)| entry.parallelism)
            .unwrap_or(0)
    }

    /// The configured unknown-zone policy.
    pub fn policy(&self) -> UnknownZonePolicy {
        self.policy
    }

    /// Number of configured zones.
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Whether the table has no zones.
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashMap;
    use std::io::Write;

    fn zone(ok: i64, not_found: i64, internal: i64) -> Zone {
        Zone::default()
            .with_weight(OutcomeCode::Ok, ok)
            .with_weight(OutcomeCode::NotFound, not_found)
            .with_weight(OutcomeCode::InternalServerError, internal)
    }

    #[test]
    fn test_validate_accepts_exact_hundred() {
        let table = ZoneOutcomeTable::from_zones([("a", zone(70, 20, 10)), ("b", zone(100, 0, 0))]);
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_total() {
        let table = ZoneOutcomeTable::from_zones([("a", zone(70, 20, 20))]);
        match table.validate() {
            Err(ConfigError::BadTotal { zone, total }) => {
                assert_eq!(zone, "a");
                assert_eq!(total, 110);
            }
            other => panic!("expected BadTotal, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_negative_weight() {
        // Sums to 100 but hides a negative weight.
        let table = ZoneOutcomeTable::from_zones([("a", zone(110, -10, 0))]);
        assert!(matches!(
            table.validate(),
            Err(ConfigError::NegativeWeight {
                code: OutcomeCode::NotFound,
                weight: -10,
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_table() {
        assert!(matches!(
            ZoneOutcomeTable::default().validate(),
            Err(ConfigError::Empty)
        ));
    }

    #[test]
    fn test_sample_distribution_matches_weights() {
        let table = ZoneOutcomeTable::from_zones([("a", zone(70, 20, 10))]);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let draws = 20_000;

        let mut counts: HashMap<OutcomeCode, u32> = HashMap::new();
        for _ in 0..draws {
            let code = table.sample_outcome("a", &mut rng).unwrap();
            *counts.entry(code).or_default() += 1;
        }

        let share = |code| *counts.get(&code).unwrap_or(&0) as f64 / draws as f64;
        assert!((share(OutcomeCode::Ok) - 0.70).abs() < 0.02);
        assert!((share(OutcomeCode::NotFound) - 0.20).abs() < 0.02);
        assert!((share(OutcomeCode::InternalServerError) - 0.10).abs() < 0.02);
        assert_eq!(share(OutcomeCode::ServiceUnavailable), 0.0);
    }

    #[test]
    fn test_boundary_draw_belongs_to_later_code() {
        let entry = zone(70, 20, 10);
        assert_eq!(entry.bucket_for(0), Some(OutcomeCode::Ok));
        assert_eq!(entry.bucket_for(69), Some(OutcomeCode::Ok));
        assert_eq!(entry.bucket_for(70), Some(OutcomeCode::NotFound));
        assert_eq!(entry.bucket_for(89), Some(OutcomeCode::NotFound));
        assert_eq!(entry.bucket_for(90), Some(OutcomeCode::InternalServerError));
        assert_eq!(entry.bucket_for(99), Some(OutcomeCode::InternalServerError));
        assert_eq!(entry.bucket_for(100), None);
    }

    #[test]
    fn test_lowest_draw_skips_zero_weight_codes() {
        let entry = Zone::default()
            .with_weight(OutcomeCode::NotFound, 50)
            .with_weight(OutcomeCode::GatewayTimeout, 50);
        let table = ZoneOutcomeTable::from_zones([("z", entry)]);
        // StepRng yields 0 every time, the lowest possible draw.
        let mut rng = StepRng::new(0, 0);
        assert_eq!(
            table.sample_outcome("z", &mut rng),
            Ok(OutcomeCode::NotFound)
        );
    }

    #[test]
    fn test_unknown_zone_policy() {
        let table = ZoneOutcomeTable::from_zones([("a", zone(100, 0, 0))]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        assert_eq!(
            table.sample_outcome("missing", &mut rng),
            Err(ZoneError::UnknownZone("missing".to_string()))
        );

        let lenient = table.with_policy(UnknownZonePolicy::DefaultSuccess);
        assert_eq!(
            lenient.sample_outcome("missing", &mut rng),
            Ok(OutcomeCode::Ok)
        );
    }

    #[test]
    fn test_resolve_falls_back_to_suffix() {
        let table = ZoneOutcomeTable::from_zones([
            ("1a", zone(100, 0, 0)),
            ("us-east-1b", zone(0, 100, 0)),
        ]);
        assert_eq!(table.resolve("us-east-1a").map(|(n, _)| n), Some("1a"));
        assert_eq!(
            table.resolve("us-east-1b").map(|(n, _)| n),
            Some("us-east-1b")
        );
        assert!(!table.contains("us-east-1c"));
    }

    #[test]
    fn test_hints_default_to_zero() {
        let mut entry = zone(100, 0, 0);
        entry.requests_per_second = Some(25);
        let table = ZoneOutcomeTable::from_zones([("a", entry)]);
        assert_eq!(table.requests_per_second("a"), 25);
        assert_eq!(table.parallelism("a"), 0);
        assert_eq!(table.requests_per_second("b"), 0);
        assert_eq!(table.parallelism("b"), 0);
    }

    #[test]
    fn test_parse_toml() {
        let table = ZoneOutcomeTable::parse_toml(
            r#"
            [us-east-1a]
            200 = 70
            404 = 20
            500 = 10
            requestsPerSecond = 5
            parallelism = 3

            [us-east-1b]
            503 = 100
            "#,
        )
        .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.requests_per_second("us-east-1a"), 5);
        assert_eq!(table.parallelism("us-east-1a"), 3);
        let (_, b) = table.resolve("us-east-1b").unwrap();
        assert_eq!(b.weight(OutcomeCode::ServiceUnavailable), 100);
    }

    #[test]
    fn test_parse_json_rejects_invalid_total() {
        let result = ZoneOutcomeTable::parse_json(r#"{"z1": {"200": 50, "500": 40}}"#);
        assert!(matches!(result, Err(ConfigError::BadTotal { total: 90, .. })));
    }

    #[test]
    fn test_parse_rejects_unknown_code() {
        let result = ZoneOutcomeTable::parse_json(r#"{"z1": {"200": 50, "201": 50}}"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"z1": {{"500": 100}}}}"#).unwrap();

        let table = ZoneOutcomeTable::load(file.path()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        assert_eq!(
            table.sample_outcome("z1", &mut rng),
            Ok(OutcomeCode::InternalServerError)
        );
    }

    #[test]
    fn test_validate_rejects_overflowing_weights() {
        let result = ZoneOutcomeTable::parse_json(r#"{"z": {"200": 9223372036854775807, "404": 1}}"#);
        assert!(matches!(
            result,
            Err(ConfigError::BadTotal {
                total: i64::MAX,
                ..
            })
        ));
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            "us-east-1a:\n  200: 70\n  404: 20\n  500: 10\nus-east-1b:\n  200: 100\n  requestsPerSecond: 4\n"
        )
        .unwrap();

        let table = ZoneOutcomeTable::load(file.path()).unwrap();
        assert_eq!(table.len(), 2);
        let (_, a) = table.resolve("us-east-1a").unwrap();
        assert_eq!(a.weight(OutcomeCode::Ok), 70);
        assert_eq!(a.weight(OutcomeCode::NotFound), 20);
        assert_eq!(a.weight(OutcomeCode::InternalServerError), 10);
        assert_eq!(table.requests_per_second("us-east-1b"), 4);
    }

    #[test]
    fn test_parse_yaml_rejects_invalid_total() {
        let result = ZoneOutcomeTable::parse_yaml("z1:\n  200: 50\n  500: 40\n");
        assert!(matches!(result, Err(ConfigError::BadTotal { total: 90, .. })));
    }

    #[test]
    fn test_load_missing_file() {
        let result = ZoneOutcomeTable::load(Path::new("/nonexistent/zones.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "reject".parse::<UnknownZonePolicy>(),
            Ok(UnknownZonePolicy::Reject)
        );
        assert_eq!(
            "Default-Success".parse::<UnknownZonePolicy>(),
            Ok(UnknownZonePolicy::DefaultSuccess)
        );
        assert!("sometimes".parse::<UnknownZonePolicy>().is_err());
    }
}
