//! Current weather lookup backed by the Open-Meteo public APIs (no API key).

use async_trait::async_trait;
use serde::Deserialize;

use super::{Tool, ToolError, ToolSpec, required_str};

/// Geocoding endpoint.
const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
/// Forecast endpoint.
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
/// Variables requested for current conditions.
const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,wind_speed_10m,weather_code";

#[derive(Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<GeocodingPlace>,
}

#[derive(Deserialize)]
struct GeocodingPlace {
    name: String,
    latitude: f64,
    longitude: f64,
    country: Option<String>,
}

#[derive(Deserialize)]
struct ForecastResponse {
    current: CurrentConditions,
}

#[derive(Deserialize)]
struct CurrentConditions {
    temperature_2m: f64,
    relative_humidity_2m: f64,
    wind_speed_10m: f64,
    weather_code: u16,
}

/// `get_weather` tool.
pub struct WeatherTool {
    client: reqwest::Client,
}

impl WeatherTool {
    /// Create the tool around a shared HTTP client.
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn geocode(&self, location: &str) -> Result<GeocodingPlace, ToolError> {
        let response: GeocodingResponse = self
            .client
            .get(GEOCODING_URL)
            .query(&[("name", location), ("count", "1"), ("format", "json")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .results
            .into_iter()
            .next()
            .ok_or_else(|| ToolError::Failed(format!("location not found: {location}")))
    }

    async fn current(&self, place: &GeocodingPlace) -> Result<CurrentConditions, ToolError> {
        let response: ForecastResponse = self
            .client
            .get(FORECAST_URL)
            .query(&[
                ("latitude", place.latitude.to_string()),
                ("longitude", place.longitude.to_string()),
                ("current", CURRENT_FIELDS.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.current)
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_weather".to_string(),
            description: "Get the current weather for a city or place name.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "City or place name, e.g. \"Paris\""
                    }
                },
                "required": ["location"]
            }),
        }
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let location = required_str(arguments, "location")?;
        let place = self.geocode(location).await?;
        let current = self.current(&place).await?;

        let label = match &place.country {
            Some(country) => format!("{}, {country}", place.name),
            None => place.name.clone(),
        };

        Ok(serde_json::json!({
            "location": label,
            "temperature": current.temperature_2m,
            "condition": describe_weather_code(current.weather_code),
            "humidity": current.relative_humidity_2m,
            "windSpeed": current.wind_speed_10m,
        }))
    }
}

/// Human-readable label for a WMO weather interpretation code.
#[must_use]
pub const fn describe_weather_code(code: u16) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 | 48 => "Fog",
        51 | 53 | 55 => "Drizzle",
        56 | 57 => "Freezing drizzle",
        61 | 63 | 65 => "Rain",
        66 | 67 => "Freezing rain",
        71 | 73 | 75 | 77 => "Snow",
        80..=82 => "Rain showers",
        85 | 86 => "Snow showers",
        95 => "Thunderstorm",
        96 | 99 => "Thunderstorm with hail",
        _ => "Unknown",
    }
}
