use serde::{Deserialize, Serialize};

/// Situational attributes accompanying a recommendation request.
///
/// The fields are fixed rather than an open dictionary so every call site
/// derives the bandit partitioning key from the same schema. Free-text
/// values (weather, season, ...) are lower-cased during key derivation, so
/// upstream casing differences cannot split a context in two.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationContext {
    pub weather: String,
    pub day_type: String,
    pub season: String,
    pub time_of_day: String,
    pub crowd_density: String,
    pub viral_trend: bool,
    pub special_event: Option<String>,
}

impl Default for RecommendationContext {
    fn default() -> Self {
        Self {
            weather: "unknown".to_string(),
            day_type: "weekday".to_string(),
            season: "unknown".to_string(),
            time_of_day: "unknown".to_string(),
            crowd_density: "medium".to_string(),
            viral_trend: false,
            special_event: None,
        }
    }
}

impl RecommendationContext {
    /// Canonical bandit partitioning key: attribute names in sorted order,
    /// values lower-cased, joined as `name=value|...`. Two contexts with the
    /// same attributes always map to the identical key.
    pub fn context_key(&self) -> String {
        let mut fields: Vec<(&str, String)> = vec![
            ("crowd_density", self.crowd_density.to_lowercase()),
            ("day_type", self.day_type.to_lowercase()),
            ("season", self.season.to_lowercase()),
            (
                "special_event",
                self.special_event
                    .as_deref()
                    .unwrap_or("none")
                    .to_lowercase(),
            ),
            ("time_of_day", self.time_of_day.to_lowercase()),
            ("viral_trend", self.viral_trend.to_string()),
            ("weather", self.weather.to_lowercase()),
        ];
        fields.sort_by(|a, b| a.0.cmp(b.0));

        fields
            .into_iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("|")
    }
}
