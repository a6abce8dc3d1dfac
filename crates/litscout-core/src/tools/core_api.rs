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

const KIND: ProviderKind = ProviderKind::Core;

/// Open access papers from the CORE aggregator (API v3).
pub struct CoreSearchTool {
    config: SharedConfig,
    client: Client,
}

impl CoreSearchTool {
    pub fn new(config: SharedConfig, client: Client) -> Self {
        Self { config, client }
    }

    pub fn spec() -> ToolSpec {
        search_spec(
            KIND,
            "Search the CORE aggregation service for open access research papers.",
        )
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Work>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Work {
    title: Option<String>,
    #[serde(default)]
    authors: Vec<Author>,
    year_published: Option<i32>,
    published_date: Option<String>,
    deposited_date: Option<String>,
    publisher: Option<String>,
    #[serde(default)]
    journals: Vec<Value>,
    doi: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    citation_count: Option<u64>,
    download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Author {
    name: Option<String>,
}

impl Work {
    fn year(&self) -> Option<i32> {
        self.year_published.or_else(|| {
            self.published_date
                .as_deref()
                .or(self.deposited_date.as_deref())
                .and_then(|date| date.split('-').next())
                .and_then(|year| year.trim().parse().ok())
        })
    }

    /// Journals come back either as plain strings or as `{ "title": ... }` objects.
    fn venue(&self) -> Option<String> {
        let journal = self.journals.first().and_then(|journal| match journal {
            Value::String(name) => Some(name.clone()),
            Value::Object(fields) => fields
                .get("title")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        });
        self.publisher
            .clone()
            .filter(|p| !p.trim().is_empty())
            .or(journal)
    }
}

fn into_source(work: Work, min_year: i32) -> Option<Source> {
    let year = work.year();
    if year.is_some_and(|y| y < min_year) {
        return None;
    }
    let venue = work.venue();
    let title = work
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())?;

    let mut source = Source::new(title, KIND.tool_name());
    source.authors = work
        .authors
        .into_iter()
        .filter_map(|a| a.name)
        .filter(|name| !name.trim().is_empty())
        .collect();
    source.year = year;
    source.citation_count = work.citation_count;
    source.abstract_text = work.abstract_text.unwrap_or_default();
    source.venue = venue;
    source.doi = work.doi.filter(|d| !d.trim().is_empty());
    source.url = work.download_url.filter(|u| !u.trim().is_empty());
    Some(source)
}

#[async_trait]
impl Tool for CoreSearchTool {
    fn name(&self) -> &str {
        KIND.tool_name()
    }

    async fn invoke(&self, arguments: &Map<String, Value>) -> Result<String, LitScoutError> {
        let (settings, defaults) = {
            let config = self.config.read().await;
            (config.sources.get(KIND).clone(), config.defaults.clone())
        };
        let args = SearchArgs::from_arguments(KIND.tool_name(), arguments, &defaults)?;
        let url = endpoint(&settings.base_url(KIND)?, "search/works");
        let policy = RetryPolicy::from_settings(&settings);
        let api_key = settings.api_key()?;

        let params = [
            ("q", args.topic.clone()),
            ("limit", args.max_results.to_string()),
            ("offset", "0".to_string()),
        ];

        let payload = fetch_json(KIND, &policy, || {
            let request = self
                .client
                .get(&url)
                .query(&params)
                .header(reqwest::header::ACCEPT, "application/json");
            match &api_key {
                Some(key) => request.bearer_auth(key.expose()),
                None => request,
            }
        })
        .await?;
        let response: SearchResponse = serde_json::from_value(payload).map_err(|err| {
            LitScoutError::provider(KIND.tool_name(), format!("unexpected payload: {err}"))
        })?;

        let sources: Vec<Source> = response
            .results
            .into_iter()
            .filter_map(|work| into_source(work, args.min_year))
            .take(args.max_results)
            .collect();
        info!(topic = %args.topic, count = sources.len(), "core search complete");

        serde_json::to_string(&sources).map_err(|err| LitScoutError::Other(err.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn year_falls_back_to_dates() {
        let work: Work = serde_json::from_value(json!({
            "title": "Decoders",
            "depositedDate": "2019-04-01T00:00:00"
        }))
        .unwrap();
        assert_eq!(work.year(), Some(2019));
    }

    #[test]
    fn old_and_untitled_works_are_dropped() {
        let old: Work =
            serde_json::from_value(json!({ "title": "Old", "yearPublished": 1999 })).unwrap();
        assert!(into_source(old, 2004).is_none());

        let untitled: Work = serde_json::from_value(json!({ "yearPublished": 2020 })).unwrap();
        assert!(into_source(untitled, 2004).is_none());
    }

    #[tokio::test]
    async fn missing_citation_count_stays_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/works"))
            .and(query_param("q", "surface codes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{
                    "title": "Surface codes in practice",
                    "authors": [{ "name": "B. Terhal" }, { "name": "" }],
                    "publishedDate": "2021-06-01",
                    "journals": [{ "title": "Reviews of Modern Physics" }],
                    "doi": "10.1103/RevModPhys.87.307",
                    "abstract": "A review."
                }]
            })))
            .mount(&server)
            .await;

        let mut config = crate::Config::default();
        config.sources.core.base_url = Some(server.uri());
        let tool = CoreSearchTool::new(config.into_shared(), Client::new());

        let mut args = Map::new();
        args.insert("topic".into(), json!("surface codes"));
        let sources: Vec<Source> =
            serde_json::from_str(&tool.invoke(&args).await.unwrap()).unwrap();

        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].citation_count, None);
        assert_eq!(sources[0].year, Some(2021));
        assert_eq!(sources[0].authors, vec!["B. Terhal"]);
        assert_eq!(sources[0].venue.as_deref(), Some("Reviews of Modern Physics"));
    }
}
