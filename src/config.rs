use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where index data is stored
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// Root of the codebase indexed for code retrieval
    pub codebase_dir: PathBuf,
    /// Directory of documentation pages for the knowledge index
    pub docs_dir: Option<PathBuf>,
    /// Directory holding capture (HAR) files referenced by ticket attachments
    pub captures_dir: PathBuf,
    /// LLM provider configuration (embeddings + reasoning)
    pub llm: LlmConfig,
    pub tickets: TicketSourceConfig,
    pub logs: LogSearchConfig,
    pub pipeline: PipelineConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" or "openai"
    pub provider: String,
    /// Base URL for the LLM API
    pub base_url: String,
    /// Model name for synthesis
    pub chat_model: String,
    /// Model name for embeddings
    pub embedding_model: String,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
    /// Expected embedding width; vectors of another width are rejected. 0 disables the check
    pub embedding_dim: usize,
}

/// Ticket source (Freshdesk v2 REST API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketSourceConfig {
    /// e.g. "https://support.freshdesk.com"
    pub base_url: String,
    pub api_key: Option<String>,
}

/// Log search backend (OpenSearch-compatible `_msearch`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSearchConfig {
    /// Host used for correlation-key searches
    pub base_url: String,
    /// Regional log hosts by pod name ("us", "in", "eu", "au"). Dashboard
    /// links are only followed when their host is one of these.
    pub pod_urls: BTreeMap<String, String>,
    /// Index pattern searched, e.g. "freshservice*"
    pub index: String,
    /// Session cookie sent as `Cookie` header, if the backend needs one
    pub session_cookie: Option<String>,
    /// Maximum hits requested per key
    pub max_hits_per_key: usize,
}

/// Bounds applied by the investigation pipelines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub ticket_fetch_timeout_secs: u64,
    pub log_search_timeout_secs: u64,
    pub retrieval_timeout_secs: u64,
    pub synthesis_timeout_secs: u64,
    pub capture_load_timeout_secs: u64,
    /// Code chunks retrieved per investigation
    pub code_top_k: usize,
    /// Documentation chunks retrieved per code query
    pub doc_top_k: usize,
    /// Log evidence kept after ranking
    pub log_top_n: usize,
    /// Padding around capture timestamps when deriving the search window
    pub window_padding_mins: i64,
    /// How far before ticket creation to search when no capture timestamps exist
    pub window_lookback_hours: i64,
    /// Concurrent investigations accepted by the HTTP service
    pub max_concurrent_investigations: usize,
}

/// Retry policy for collaborator calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:9100".to_string(),
            codebase_dir: PathBuf::from("./codebase"),
            docs_dir: None,
            captures_dir: PathBuf::from("./captures"),
            llm: LlmConfig::default(),
            tickets: TicketSourceConfig::default(),
            logs: LogSearchConfig::default(),
            pipeline: PipelineConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            chat_model: "llama3.2".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            api_key: None,
            embedding_dim: 768,
        }
    }
}

impl Default for TicketSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://support.freshdesk.com".to_string(),
            api_key: None,
        }
    }
}

impl Default for LogSearchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://logs.haystack.es".to_string(),
            pod_urls: BTreeMap::from([
                ("us".to_string(), "https://logs.haystack.es".to_string()),
                ("in".to_string(), "https://logs-in.haystack.es".to_string()),
                ("eu".to_string(), "https://logs-euc.haystack.es".to_string()),
                ("au".to_string(), "https://logs-au.haystack.es".to_string()),
            ]),
            index: "freshservice*".to_string(),
            session_cookie: None,
            max_hits_per_key: 2000,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ticket_fetch_timeout_secs: 30,
            log_search_timeout_secs: 30,
            retrieval_timeout_secs: 20,
            synthesis_timeout_secs: 180,
            capture_load_timeout_secs: 15,
            code_top_k: 10,
            doc_top_k: 5,
            log_top_n: 25,
            window_padding_mins: 30,
            window_lookback_hours: 24,
            max_concurrent_investigations: 4,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
        }
    }
}

impl PipelineConfig {
    pub fn ticket_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.ticket_fetch_timeout_secs)
    }

    pub fn log_search_timeout(&self) -> Duration {
        Duration::from_secs(self.log_search_timeout_secs)
    }

    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_secs(self.retrieval_timeout_secs)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_secs)
    }

    pub fn capture_load_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_load_timeout_secs)
    }
}

impl LogSearchConfig {
    pub fn base_url_for(&self, pod: &str) -> Option<&str> {
        self.pod_urls.get(pod).map(|u| u.trim_end_matches('/'))
    }

    /// Base URL serving `host`, if it is the default host or a known pod.
    pub fn base_url_for_host(&self, host: &str) -> Option<&str> {
        std::iter::once(&self.base_url)
            .chain(self.pod_urls.values())
            .map(|u| u.trim_end_matches('/'))
            .find(|u| host_of(u).is_some_and(|h| h.eq_ignore_ascii_case(host)))
    }
}

fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url).ok()?.host_str().map(str::to_string)
}

/// `us=https://logs.example,in=https://logs-in.example`
fn parse_pod_urls(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (pod, url) = pair.split_once('=')?;
            let (pod, url) = (pod.trim(), url.trim());
            (!pod.is_empty() && !url.is_empty()).then(|| (pod.to_string(), url.to_string()))
        })
        .collect()
}

fn env_parse<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(val) = std::env::var(name) {
        if let Ok(v) = val.parse() {
            *target = v;
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("SIFRA_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("SIFRA_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(dir) = std::env::var("SIFRA_CODEBASE_DIR") {
            config.codebase_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("SIFRA_DOCS_DIR") {
            config.docs_dir = Some(PathBuf::from(dir));
        }
        if let Ok(dir) = std::env::var("SIFRA_CAPTURES_DIR") {
            config.captures_dir = PathBuf::from(dir);
        }

        // LLM
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_CHAT_MODEL") {
            config.llm.chat_model = model;
        }
        if let Ok(model) = std::env::var("LLM_EMBEDDING_MODEL") {
            config.llm.embedding_model = model;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }
        env_parse("LLM_EMBEDDING_DIM", &mut config.llm.embedding_dim);

        // Ticket source
        if let Ok(url) = std::env::var("SIFRA_TICKETS_BASE_URL") {
            config.tickets.base_url = url;
        }
        if let Ok(key) = std::env::var("SIFRA_TICKETS_API_KEY") {
            config.tickets.api_key = Some(key);
        }

        // Log search
        if let Ok(url) = std::env::var("SIFRA_LOGS_BASE_URL") {
            config.logs.base_url = url;
        }
        if let Ok(index) = std::env::var("SIFRA_LOGS_INDEX") {
            config.logs.index = index;
        }
        if let Ok(cookie) = std::env::var("SIFRA_LOGS_SESSION_COOKIE") {
            config.logs.session_cookie = Some(cookie);
        }
        env_parse("SIFRA_LOGS_MAX_HITS", &mut config.logs.max_hits_per_key);
        if let Ok(raw) = std::env::var("SIFRA_LOGS_POD_URLS") {
            let pods = parse_pod_urls(&raw);
            if !pods.is_empty() {
                config.logs.pod_urls = pods;
            }
        }
        // A pod name selects the host used for key searches
        if let Ok(pod) = std::env::var("SIFRA_LOGS_POD") {
            if let Some(url) = config.logs.base_url_for(&pod) {
                config.logs.base_url = url.to_string();
            }
        }

        // Pipeline bounds
        let p = &mut config.pipeline;
        env_parse("SIFRA_TICKET_FETCH_TIMEOUT_SECS", &mut p.ticket_fetch_timeout_secs);
        env_parse("SIFRA_LOG_SEARCH_TIMEOUT_SECS", &mut p.log_search_timeout_secs);
        env_parse("SIFRA_RETRIEVAL_TIMEOUT_SECS", &mut p.retrieval_timeout_secs);
        env_parse("SIFRA_SYNTHESIS_TIMEOUT_SECS", &mut p.synthesis_timeout_secs);
        env_parse("SIFRA_CAPTURE_LOAD_TIMEOUT_SECS", &mut p.capture_load_timeout_secs);
        env_parse("SIFRA_CODE_TOP_K", &mut p.code_top_k);
        env_parse("SIFRA_DOC_TOP_K", &mut p.doc_top_k);
        env_parse("SIFRA_LOG_TOP_N", &mut p.log_top_n);
        env_parse("SIFRA_WINDOW_PADDING_MINS", &mut p.window_padding_mins);
        env_parse("SIFRA_WINDOW_LOOKBACK_HOURS", &mut p.window_lookback_hours);
        env_parse(
            "SIFRA_MAX_CONCURRENT_INVESTIGATIONS",
            &mut p.max_concurrent_investigations,
        );

        env_parse("SIFRA_RETRY_MAX_ATTEMPTS", &mut config.retry.max_attempts);
        env_parse("SIFRA_RETRY_BACKOFF_MS", &mut config.retry.initial_backoff_ms);
        config.retry.max_attempts = config.retry.max_attempts.clamp(1, 5);

        config
    }

    pub fn code_index_path(&self) -> PathBuf {
        self.data_dir.join("code_vectors.json")
    }

    pub fn doc_index_path(&self) -> PathBuf {
        self.data_dir.join("doc_vectors.json")
    }
}
