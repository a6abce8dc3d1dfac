use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use super::http::{RetryPolicy, endpoint, fetch_json};
use super::{SearchArgs, Tool, ToolSpec, search_spec};
use crate::LitScoutError;
use crate::config::{ProviderKind, SharedConfig};
use crate::model::Source;

const KIND: ProviderKind = ProviderKind::Orkg;

/// Semantic search over the CORE corpus through ORKG Ask.
pub struct OrkgSearchTool {
    config: SharedConfig,
    client: Client,
}

impl OrkgSearchTool {
    pub fn new(config: SharedConfig, client: Client) -> Self {
        Self { config, client }
    }

    pub fn spec() -> ToolSpec {
        search_spec(
            KIND,
            "Semantic search for scientific papers through ORKG Ask.",
        )
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    payload: Payload,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    items: Vec<Item>,
}

/// ORKG items are loosely typed: authors and journals may be a string or a list,
/// years may be numbers or strings.
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    #[serde(default)]
    authors: Value,
    #[serde(default)]
    year: Value,
    #[serde(default)]
    journals: Value,
    doi: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    #[serde(default)]
    citation_count: Value,
}

fn strings(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn into_source(item: Item, min_year: i32) -> Option<Source> {
    let year = integer(&item.year).map(|y| y as i32);
    if year.is_some_and(|y| y < min_year) {
        return None;
    }
    let title = item
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())?;

    let mut source = Source::new(title, KIND.tool_name());
    source.authors = strings(&item.authors)
        .into_iter()
        .filter(|a| !a.trim().is_empty())
        .collect();
    source.year = year;
    source.citation_count = integer(&item.citation_count).and_then(|c| u64::try_from(c).ok());
    source.abstract_text = item.abstract_text.unwrap_or_default();
    source.venue = strings(&item.journals).into_iter().next();
    source.doi = item.doi.filter(|d| !d.trim().is_empty());
    Some(source)
}

#[async_trait]
impl Tool for OrkgSearchTool {
    fn name(&self) -> &str {
        KIND.tool_name()
    }

    async fn invoke(&self, arguments: &Map<String, Value>) -> Result<String, LitScoutError> {
        let (settings, defaults) = {
            let config = self.config.read().await;
            (config.sources.get(KIND).clone(), config.defaults.clone())
        };
        let args = SearchArgs::from_arguments(KIND.tool_name(), arguments, &defaults)?;
        let url = endpoint(&settings.base_url(KIND)?, "index/search");
        let policy = RetryPolicy::from_settings(&settings);

        let params = [
            ("query", args.topic.clone()),
            ("limit", args.max_results.to_string()),
            ("filter", format!("year >= {}", args.min_year)),
        ];

        let payload = fetch_json(KIND, &policy, || {
            self.client
                .get(&url)
                .query(&params)
                .header(reqwest::header::ACCEPT, "application/json")
        })
        .await?;
        let response: SearchResponse = serde_json::from_value(payload).map_err(|err| {
            LitScoutError::provider(KIND.tool_name(), format!("unexpected payload: {err}"))
        })?;

        let sources: Vec<Source> = response
            .payload
            .items
            .into_iter()
            .filter_map(|item| into_source(item, args.min_year))
            .take(args.max_results)
            .collect();
        info!(topic = %args.topic, count = sources.len(), "orkg search complete");

        serde_json::to_string(&sources).map_err(|err| LitScoutError::Other(err.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loosely_typed_items_are_normalized() {
        let item: Item = serde_json::from_value(json!({
            "title": "Neural decoders for surface codes",
            "authors": "C. Chamberland",
            "year": "2020",
            "journals": ["Quantum"],
            "doi": "10.22331/q-2020-01-01-1",
            "citation_count": "42"
        }))
        .unwrap();

        let source = into_source(item, 2004).unwrap();
        assert_eq!(source.authors, vec!["C. Chamberland"]);
        assert_eq!(source.year, Some(2020));
        assert_eq!(source.citation_count, Some(42));
        assert_eq!(source.venue.as_deref(), Some("Quantum"));
    }

    #[test]
    fn items_before_min_year_are_skipped() {
        let item: Item =
            serde_json::from_value(json!({ "title": "Early work", "year": 1995 })).unwrap();
        assert!(into_source(item, 2004).is_none());
    }
}
