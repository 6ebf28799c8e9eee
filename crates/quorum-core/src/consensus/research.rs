//! Research integrator - multi-channel source retrieval
//!
//! Fetches candidate snippets for a persona from several channels: the
//! host's local semantic index, the public arXiv API, Wikipedia summaries
//! and an optional web-search service. Channel failures are logged and
//! skipped; a synthetic scholarly pointer fills in when retrieval comes up
//! nearly empty, so grounding never hard-fails the pipeline.

use super::types::{AcademicSource, SourceType};
use crate::error::Result;
use crate::orchestrator::{GenerateOptions, Generator};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Cap on merged deep-search results
const DEEP_SEARCH_LIMIT: usize = 12;

/// Minimum result count before the synthetic fallback source is added
const MIN_RESULTS: usize = 3;

/// A host-provided semantic index over local documents
#[async_trait::async_trait]
pub trait SourceIndex: Send + Sync {
    /// Search the index; failures are recoverable
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<AcademicSource>>;
}

/// Anything that can fetch grounding sources for a persona. The pipeline
/// depends on this seam; tests substitute a stub.
#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    /// Fetch candidate sources for a persona's domain
    async fn fetch_sources(&self, query: &str, persona_key: &str) -> Vec<AcademicSource>;
}

/// Web-search service configuration (Tavily-shaped JSON API)
#[derive(Debug, Clone)]
pub struct WebSearchConfig {
    /// Service endpoint
    pub endpoint: String,
    /// API key
    pub api_key: String,
}

/// Research integrator configuration
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    /// arXiv API base; `None` disables the channel
    pub arxiv_base_url: Option<String>,
    /// Wikipedia REST base; `None` disables the channel
    pub wikipedia_base_url: Option<String>,
    /// Web search service; `None` disables the channel
    pub web_search: Option<WebSearchConfig>,
    /// Per-channel request timeout
    pub timeout: Duration,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            arxiv_base_url: Some("https://export.arxiv.org".to_string()),
            wikipedia_base_url: Some("https://en.wikipedia.org".to_string()),
            web_search: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl ResearchConfig {
    /// A configuration with every network channel disabled
    #[must_use]
    pub fn offline() -> Self {
        Self {
            arxiv_base_url: None,
            wikipedia_base_url: None,
            web_search: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Multi-channel source retrieval
pub struct ResearchIntegrator {
    client: Client,
    config: ResearchConfig,
    index: Option<Arc<dyn SourceIndex>>,
}

/// Which databases a persona's librarian consults first
#[must_use]
pub fn databases_for(persona_key: &str) -> &'static [&'static str] {
    match persona_key {
        "biologist" => &["PubMed", "Nature", "bioRxiv"],
        "historian" => &["JSTOR", "Archive.org"],
        "mathematician" => &["arXiv", "SIAM"],
        "economist" => &["NBER", "RePEc"],
        "data_scientist" => &["Kaggle", "arXiv", "GitHub"],
        "scientific_researcher" => &["PLOS ONE", "Science", "arXiv"],
        _ => &["Google Scholar"],
    }
}

impl ResearchIntegrator {
    /// Create an integrator
    #[must_use]
    pub fn new(config: ResearchConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            config,
            index: None,
        }
    }

    /// Attach a local semantic index
    #[must_use]
    pub fn with_index(mut self, index: Arc<dyn SourceIndex>) -> Self {
        self.index = Some(index);
        self
    }

    async fn search_local_index(&self, query: &str, results: &mut Vec<AcademicSource>) {
        let Some(index) = &self.index else { return };
        match index.search(query, 5).await {
            Ok(hits) => results.extend(hits),
            Err(error) => warn!(%error, "Local library search failed"),
        }
    }

    async fn search_arxiv(&self, query: &str) -> Result<Vec<AcademicSource>> {
        let Some(base) = &self.config.arxiv_base_url else {
            return Ok(Vec::new());
        };
        let url = format!(
            "{base}/api/query?search_query=all:{}&start=0&max_results=3",
            urlencode(query)
        );
        let body = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| quorum_llm::Error::Network(e.to_string()))?
            .text()
            .await
            .map_err(|e| quorum_llm::Error::Network(e.to_string()))?;
        Ok(parse_arxiv_feed(&body))
    }

    async fn search_wikipedia(&self, query: &str) -> Result<Option<AcademicSource>> {
        let Some(base) = &self.config.wikipedia_base_url else {
            return Ok(None);
        };
        let url = format!("{base}/api/rest_v1/page/summary/{}", urlencode(query));

        #[derive(Deserialize)]
        struct Summary {
            title: String,
            extract: String,
        }

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| quorum_llm::Error::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let summary: Summary = response
            .json()
            .await
            .map_err(|e| quorum_llm::Error::InvalidResponse(e.to_string()))?;

        Ok(Some(AcademicSource {
            url: format!("{base}/wiki/{}", urlencode(&summary.title)),
            title: format!("[Wikipedia] {}", summary.title),
            snippet: truncate_chars(&summary.extract, 400),
            source_type: SourceType::Journal,
            score: None,
        }))
    }

    async fn search_web(&self, query: &str) -> Result<Vec<AcademicSource>> {
        let Some(search) = &self.config.web_search else {
            return Ok(Vec::new());
        };

        #[derive(Deserialize)]
        struct SearchResponse {
            #[serde(default)]
            results: Vec<SearchResult>,
        }

        #[derive(Deserialize)]
        struct SearchResult {
            title: String,
            url: String,
            #[serde(default)]
            content: String,
            #[serde(default)]
            score: Option<f64>,
        }

        let response = self
            .client
            .post(&search.endpoint)
            .json(&serde_json::json!({
                "api_key": search.api_key,
                "query": query,
                "max_results": 5,
            }))
            .send()
            .await
            .map_err(|e| quorum_llm::Error::Network(e.to_string()))?;

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| quorum_llm::Error::InvalidResponse(e.to_string()))?;

        Ok(parsed
            .results
            .into_iter()
            .map(|r| AcademicSource {
                title: format!("[Web] {}", r.title),
                url: r.url,
                snippet: truncate_chars(&r.content, 300),
                source_type: SourceType::Web,
                score: r.score,
            })
            .collect())
    }

    /// Multi-step investigative search: broad fetch, keyword expansion
    /// through a fast model, targeted follow-ups, URL-deduplicated merge.
    #[instrument(skip(self, generator))]
    pub async fn deep_search(
        &self,
        query: &str,
        persona_key: &str,
        generator: &dyn Generator,
    ) -> Vec<AcademicSource> {
        let initial = self.fetch_sources(query, persona_key).await;
        if initial.is_empty() {
            return initial;
        }

        let all_text: String = initial
            .iter()
            .map(|s| s.snippet.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let prompt = format!(
            "Analyze these research snippets and list 3-5 deeper search terms useful for \
             \"{query}\":\n\n{}",
            truncate_chars(&all_text, 1000)
        );
        let keywords = match generator
            .generate(
                prompt,
                GenerateOptions {
                    prefer_fast: true,
                    ..Default::default()
                },
            )
            .await
        {
            Ok(response) => clean_keywords(&response),
            Err(error) => {
                warn!(%error, "Keyword expansion failed, keeping initial sources");
                return initial;
            }
        };
        debug!(?keywords, "Deep search keywords discovered");

        let mut merged = initial;
        let mut seen: std::collections::HashSet<String> =
            merged.iter().map(|s| s.url.clone()).collect();
        for keyword in keywords {
            for mut source in self.fetch_sources(&keyword, persona_key).await {
                if seen.insert(source.url.clone()) {
                    source.title = format!("[Deep] {}", source.title);
                    merged.push(source);
                }
            }
        }
        merged.truncate(DEEP_SEARCH_LIMIT);
        merged
    }
}

#[async_trait::async_trait]
impl SourceProvider for ResearchIntegrator {
    #[instrument(skip(self))]
    async fn fetch_sources(&self, query: &str, persona_key: &str) -> Vec<AcademicSource> {
        let databases = databases_for(persona_key);
        debug!(?databases, "Librarian searching for sources");

        let mut results = Vec::new();
        self.search_local_index(query, &mut results).await;

        let lower = query.to_lowercase();
        if databases.contains(&"arXiv") || lower.contains("paper") || lower.contains("study") {
            match self.search_arxiv(query).await {
                Ok(sources) => results.extend(sources),
                Err(error) => warn!(%error, "arXiv search failed"),
            }
        }

        if persona_key == "historian" || lower.contains("history") || lower.contains("biography") {
            match self.search_wikipedia(query).await {
                Ok(Some(source)) => results.push(source),
                Ok(None) => {}
                Err(error) => warn!(%error, "Wikipedia search failed"),
            }
        }

        match self.search_web(query).await {
            Ok(sources) => results.extend(sources),
            Err(error) => warn!(%error, "Web search failed"),
        }

        if results.len() < MIN_RESULTS {
            results.push(AcademicSource {
                title: format!("Academic research on {query}"),
                url: "https://scholar.google.com".to_string(),
                snippet: format!("Recent findings regarding {query} from {}.", databases[0]),
                source_type: SourceType::Journal,
                score: None,
            });
        }

        results
    }
}

/// Format sources for prompt inclusion, each wrapped in a delimited block
/// so retrieved text cannot masquerade as instructions.
#[must_use]
pub fn format_for_prompt(sources: &[AcademicSource]) -> String {
    if sources.is_empty() {
        return "No external sources found.".to_string();
    }
    sources
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let n = i + 1;
            format!(
                "[SOURCE_{n}]\nTitle: {}\nURL: {}\nType: {:?}\nRelevance: {}\nInfo: {}\n[/SOURCE_{n}]",
                s.title,
                s.url,
                s.source_type,
                s.score.map_or_else(|| "N/A".to_string(), |v| format!("{v:.2}")),
                s.snippet,
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

lazy_static! {
    static ref ARXIV_ENTRY: Regex = Regex::new(
        r"(?s)<entry>.*?<id>(?P<id>.*?)</id>.*?<title>(?P<title>.*?)</title>.*?<summary>(?P<summary>.*?)</summary>"
    )
    .expect("invalid arxiv pattern");
    static ref KEYWORD_PREFIX: Regex =
        Regex::new(r"^\s*(\d+\.|\*|-)\s*").expect("invalid keyword pattern");
}

fn parse_arxiv_feed(body: &str) -> Vec<AcademicSource> {
    ARXIV_ENTRY
        .captures_iter(body)
        .take(3)
        .map(|captures| {
            let clean = |s: &str| s.replace('\n', " ").trim().to_string();
            AcademicSource {
                title: clean(&captures["title"]),
                url: clean(&captures["id"]),
                snippet: truncate_chars(&clean(&captures["summary"]), 300),
                source_type: SourceType::Preprint,
                score: None,
            }
        })
        .collect()
}

fn clean_keywords(response: &str) -> Vec<String> {
    response
        .split(['\n', ','])
        .map(|k| KEYWORD_PREFIX.replace(k, "").trim().to_string())
        .filter(|k| k.len() > 3 && k.len() < 40)
        .take(2)
        .collect()
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max).collect();
        format!("{truncated}...")
    }
}

fn urlencode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct FixedIndex(Vec<AcademicSource>);

    #[async_trait::async_trait]
    impl SourceIndex for FixedIndex {
        async fn search(&self, _query: &str, _limit: usize) -> crate::error::Result<Vec<AcademicSource>> {
            Ok(self.0.clone())
        }
    }

    struct KeywordGenerator;

    #[async_trait::async_trait]
    impl Generator for KeywordGenerator {
        async fn generate(
            &self,
            _prompt: String,
            _options: GenerateOptions,
        ) -> crate::error::Result<String> {
            Ok("1. deeper term one\n2. deeper term two".to_string())
        }
    }

    struct FailingGenerator;

    #[async_trait::async_trait]
    impl Generator for FailingGenerator {
        async fn generate(
            &self,
            _prompt: String,
            _options: GenerateOptions,
        ) -> crate::error::Result<String> {
            Err(Error::TaskFailed("down".to_string()))
        }
    }

    fn library_source(title: &str, url: &str) -> AcademicSource {
        AcademicSource {
            title: title.to_string(),
            url: url.to_string(),
            snippet: "indexed snippet".to_string(),
            source_type: SourceType::Book,
            score: Some(0.7),
        }
    }

    #[test]
    fn test_parse_arxiv_feed() {
        let feed = r"<feed>
<entry>
<id>http://arxiv.org/abs/1234.5678</id>
<title>Photosynthesis
 at Scale</title>
<summary>A study of
light harvesting.</summary>
</entry>
<entry>
<id>http://arxiv.org/abs/9999.0001</id>
<title>Second Paper</title>
<summary>More findings.</summary>
</entry>
</feed>";
        let sources = parse_arxiv_feed(feed);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].title, "Photosynthesis  at Scale");
        assert_eq!(sources[0].url, "http://arxiv.org/abs/1234.5678");
        assert_eq!(sources[0].source_type, SourceType::Preprint);
    }

    #[test]
    fn test_clean_keywords() {
        let keywords = clean_keywords("1. chlorophyll absorption\n- light spectra\nok\nsomething far too long to be a useful keyword for searching");
        assert_eq!(keywords, vec!["chlorophyll absorption", "light spectra"]);
    }

    #[tokio::test]
    async fn test_offline_fetch_adds_synthetic_fallback() {
        let integrator = ResearchIntegrator::new(ResearchConfig::offline());
        let sources = integrator.fetch_sources("tidal power", "economist").await;
        assert_eq!(sources.len(), 1);
        assert!(sources[0].title.contains("tidal power"));
        assert!(sources[0].snippet.contains("NBER"));
    }

    #[test]
    fn test_format_for_prompt_wraps_sources() {
        let sources = vec![AcademicSource {
            title: "T".to_string(),
            url: "u".to_string(),
            snippet: "s".to_string(),
            source_type: SourceType::Web,
            score: Some(0.5),
        }];
        let formatted = format_for_prompt(&sources);
        assert!(formatted.starts_with("[SOURCE_1]"));
        assert!(formatted.contains("[/SOURCE_1]"));
        assert!(formatted.contains("Relevance: 0.50"));
    }

    #[tokio::test]
    async fn test_local_index_results_are_included() {
        let index = FixedIndex(vec![
            library_source("[Library] Notes", "local://doc/1"),
            library_source("[Library] Summary", "local://doc/2"),
        ]);
        let integrator =
            ResearchIntegrator::new(ResearchConfig::offline()).with_index(Arc::new(index));

        let sources = integrator.fetch_sources("cell division", "biologist").await;
        // Two indexed hits plus the synthetic fallback that tops the list
        // up to the minimum.
        assert_eq!(sources.len(), 3);
        assert!(sources.iter().any(|s| s.url == "local://doc/1"));
    }

    #[tokio::test]
    async fn test_deep_search_dedupes_followup_results() {
        let integrator = ResearchIntegrator::new(ResearchConfig::offline());
        // Offline fetches always produce the same synthetic scholar URL,
        // so the keyword follow-ups must collapse into the initial result.
        let merged = integrator
            .deep_search("quantum dots", "mathematician", &KeywordGenerator)
            .await;
        assert_eq!(merged.len(), 1);
        assert!(merged[0].title.contains("quantum dots"));
    }

    #[tokio::test]
    async fn test_deep_search_keeps_initial_results_when_expansion_fails() {
        let integrator = ResearchIntegrator::new(ResearchConfig::offline());
        let merged = integrator
            .deep_search("quantum dots", "mathematician", &FailingGenerator)
            .await;
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn test_databases_for_unknown_persona() {
        assert_eq!(databases_for("poet"), &["Google Scholar"]);
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(urlencode("a b/c"), "a%20b%2Fc");
    }
}
