use std::collections::HashMap;

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

const KIND: ProviderKind = ProviderKind::OpenAlex;

/// Bibliographic and citation data from OpenAlex.
pub struct OpenAlexSearchTool {
    config: SharedConfig,
    client: Client,
}

impl OpenAlexSearchTool {
    pub fn new(config: SharedConfig, client: Client) -> Self {
        Self { config, client }
    }

    pub fn spec() -> ToolSpec {
        search_spec(
            KIND,
            "Search OpenAlex for bibliographic data and citation counts of scientific papers.",
        )
    }
}

#[derive(Debug, Deserialize)]
struct WorksResponse {
    #[serde(default)]
    results: Vec<Work>,
}

#[derive(Debug, Deserialize)]
struct Work {
    id: Option<String>,
    title: Option<String>,
    display_name: Option<String>,
    #[serde(default)]
    authorships: Vec<Authorship>,
    publication_year: Option<i32>,
    doi: Option<String>,
    cited_by_count: Option<u64>,
    abstract_inverted_index: Option<HashMap<String, Vec<usize>>>,
    primary_location: Option<Location>,
}

#[derive(Debug, Deserialize)]
struct Authorship {
    author: Option<Named>,
}

#[derive(Debug, Deserialize)]
struct Location {
    source: Option<Named>,
}

#[derive(Debug, Deserialize)]
struct Named {
    display_name: Option<String>,
}

/// OpenAlex ships abstracts as `word -> [positions]`.
fn rebuild_abstract(index: &HashMap<String, Vec<usize>>) -> String {
    let mut positioned: Vec<(usize, &str)> = index
        .iter()
        .flat_map(|(word, positions)| positions.iter().map(move |pos| (*pos, word.as_str())))
        .collect();
    positioned.sort_unstable_by_key(|(pos, _)| *pos);
    positioned
        .into_iter()
        .map(|(_, word)| word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn into_source(work: Work) -> Option<Source> {
    let title = work
        .title
        .or(work.display_name)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())?;

    let mut source = Source::new(title, KIND.tool_name());
    source.authors = work
        .authorships
        .into_iter()
        .filter_map(|a| a.author.and_then(|n| n.display_name))
        .filter(|name| !name.trim().is_empty())
        .collect();
    source.year = work.publication_year;
    source.citation_count = work.cited_by_count;
    source.abstract_text = work
        .abstract_inverted_index
        .as_ref()
        .map(rebuild_abstract)
        .unwrap_or_default();
    source.venue = work
        .primary_location
        .and_then(|loc| loc.source)
        .and_then(|s| s.display_name);
    source.doi = work.doi.filter(|d| !d.trim().is_empty());
    source.url = work.id;
    Some(source)
}

#[async_trait]
impl Tool for OpenAlexSearchTool {
    fn name(&self) -> &str {
        KIND.tool_name()
    }

    async fn invoke(&self, arguments: &Map<String, Value>) -> Result<String, LitScoutError> {
        let (settings, defaults) = {
            let config = self.config.read().await;
            (config.sources.get(KIND).clone(), config.defaults.clone())
        };
        let args = SearchArgs::from_arguments(KIND.tool_name(), arguments, &defaults)?;
        let url = endpoint(&settings.base_url(KIND)?, "works");
        let policy = RetryPolicy::from_settings(&settings);

        let mut params = vec![
            ("search", args.topic.clone()),
            ("filter", format!("from_publication_date:{}-01-01", args.min_year)),
            ("sort", "relevance_score:desc".to_string()),
            ("per-page", args.max_results.to_string()),
        ];
        if let Some(mailto) = &settings.mailto {
            params.push(("mailto", mailto.clone()));
        }

        let payload = fetch_json(KIND, &policy, || self.client.get(&url).query(&params)).await?;
        let response: WorksResponse = serde_json::from_value(payload).map_err(|err| {
            LitScoutError::provider(KIND.tool_name(), format!("unexpected payload: {err}"))
        })?;

        let sources: Vec<Source> = response
            .results
            .into_iter()
            .filter_map(into_source)
            .take(args.max_results)
            .collect();
        info!(topic = %args.topic, count = sources.len(), "openalex search complete");

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
    fn abstract_is_rebuilt_in_position_order() {
        let index: HashMap<String, Vec<usize>> = serde_json::from_value(json!({
            "codes": [1, 4],
            "Surface": [0],
            "protect": [2],
            "qubits;": [3],
            "scale.": [5]
        }))
        .unwrap();
        assert_eq!(
            rebuild_abstract(&index),
            "Surface codes protect qubits; codes scale."
        );
    }

    #[tokio::test]
    async fn maps_works_into_sources() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .and(query_param("search", "quantum error correction"))
            .and(query_param("filter", "from_publication_date:2010-01-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{
                    "id": "https://openalex.org/W1",
                    "title": "Surface code thresholds",
                    "authorships": [{ "author": { "display_name": "A. Fowler" } }],
                    "publication_year": 2012,
                    "doi": "https://doi.org/10.1103/PhysRevA.86.032324",
                    "cited_by_count": 3100,
                    "abstract_inverted_index": { "Thresholds": [0], "matter.": [1] },
                    "primary_location": { "source": { "display_name": "Physical Review A" } }
                }, {
                    "id": "https://openalex.org/W2",
                    "title": "  "
                }]
            })))
            .mount(&server)
            .await;

        let mut config = crate::Config::default();
        config.sources.openalex.base_url = Some(server.uri());
        let tool = OpenAlexSearchTool::new(config.into_shared(), Client::new());

        let mut args = Map::new();
        args.insert("topic".into(), json!("quantum error correction"));
        args.insert("min_year".into(), json!(2010));
        let content = tool.invoke(&args).await.unwrap();
        let sources: Vec<Source> = serde_json::from_str(&content).unwrap();

        assert_eq!(sources.len(), 1);
        let paper = &sources[0];
        assert_eq!(paper.citation_count, Some(3100));
        assert_eq!(paper.authors, vec!["A. Fowler"]);
        assert_eq!(paper.abstract_text, "Thresholds matter.");
        assert_eq!(paper.venue.as_deref(), Some("Physical Review A"));
        assert_eq!(paper.id(), "doi:10.1103/physreva.86.032324");
        assert_eq!(paper.provenance, vec!["openalex_search"]);
    }
}
