use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    },
    Client,
};
use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{answer_cache::AnswerCacheEntry, quota_counter::QuotaCounter, usage_record::UsageRecord},
    },
    utils::{config::AppConfig, token_count},
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::{Match, RetrievalRequest, Retriever};

/// System instruction enforcing grounding and the refusal rule.
const GROUNDING_SYSTEM_PROMPT: &str = "You answer questions strictly from the numbered context \
blocks provided. Cite the blocks supporting each claim with their bracketed number, like [1]. \
If the context does not contain the answer, say you do not know instead of inventing one.";

#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub retrieval: RetrievalRequest,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub in_tokens: i64,
    pub out_tokens: i64,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub answer: String,
    pub citations: Vec<Match>,
    pub usage: Usage,
    pub cached: bool,
}

/// One streamed answer frame. Every stream ends with exactly one terminal
/// frame: `Done` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerEvent {
    Chunk(String),
    Done { citations: Vec<Match>, usage: Usage },
    Error(String),
}

pub type AnswerEventStream = Pin<Box<dyn Stream<Item = AnswerEvent> + Send>>;

/// Composes grounded prompts from retrieval output, calls the configured
/// LLM (sync or streaming), extracts citations, and caches answers by
/// request fingerprint.
pub struct AnswerOrchestrator {
    db: Arc<SurrealDbClient>,
    retriever: Arc<Retriever>,
    client: Client<OpenAIConfig>,
    provider: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    cache_ttl_secs: u64,
}

impl AnswerOrchestrator {
    pub fn from_config(
        db: Arc<SurrealDbClient>,
        retriever: Arc<Retriever>,
        cfg: &AppConfig,
    ) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_base(&cfg.llm_base_url);
        if let Some(key) = &cfg.llm_api_key {
            openai_config = openai_config.with_api_key(key);
        }

        Self {
            db,
            retriever,
            client: Client::with_config(openai_config),
            provider: cfg.llm_provider.clone(),
            model: cfg.llm_model.clone(),
            temperature: cfg.llm_temperature,
            max_tokens: cfg.llm_max_tokens,
            timeout: Duration::from_secs(cfg.llm_timeout_secs.max(1)),
            cache_ttl_secs: cfg.answer_cache_ttl_secs,
        }
    }

    /// Non-streaming answer: cache lookup, retrieval, one LLM call.
    /// Retrieval failure short-circuits before any LLM traffic.
    #[instrument(skip_all, fields(tenant_id))]
    pub async fn answer(
        &self,
        tenant_id: &str,
        request: &AnswerRequest,
    ) -> Result<Answer, AppError> {
        let fp = self.request_fingerprint(tenant_id, request);

        if let Some(entry) =
            AnswerCacheEntry::get_fresh(&self.db, &fp, tenant_id, self.cache_ttl_secs).await?
        {
            debug!(fingerprint = %fp, "answer served from cache");
            return Ok(cached_answer(entry));
        }

        let retrieval = self.retriever.retrieve(tenant_id, &request.retrieval).await?;
        let user_message = build_user_message(&retrieval.matches, &request.retrieval.query);
        let chat_request = self.chat_request(&user_message, request, false)?;

        let started = Instant::now();
        let response = tokio::time::timeout(self.timeout, self.client.chat().create(chat_request))
            .await
            .map_err(|_| {
                AppError::LlmTimeout(format!("no completion within {:?}", self.timeout))
            })?
            .map_err(|e| AppError::LlmUnavailable(e.to_string()))?;
        let latency_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::LlmUnavailable("completion carried no content".into()))?;

        let usage = response
            .usage
            .map(|u| Usage {
                in_tokens: i64::from(u.prompt_tokens),
                out_tokens: i64::from(u.completion_tokens),
            })
            .unwrap_or_else(|| estimate_usage(&user_message, &text));

        let citations = extract_citations(&text, &retrieval.matches);

        self.store_cache(tenant_id, &fp, &text, &citations, usage).await;
        self.account(tenant_id, "answer", usage, latency_ms).await;

        Ok(Answer {
            answer: text,
            citations,
            usage,
            cached: false,
        })
    }

    /// Streaming answer. The returned stream yields `Chunk` frames as
    /// tokens arrive and terminates with exactly one `Done` or `Error`.
    /// Cache hits replay as a single chunk. Partial output before a
    /// mid-stream failure is never cached.
    #[instrument(skip_all, fields(tenant_id))]
    pub async fn answer_stream(
        &self,
        tenant_id: &str,
        request: &AnswerRequest,
    ) -> Result<AnswerEventStream, AppError> {
        let fp = self.request_fingerprint(tenant_id, request);

        if let Some(entry) =
            AnswerCacheEntry::get_fresh(&self.db, &fp, tenant_id, self.cache_ttl_secs).await?
        {
            debug!(fingerprint = %fp, "streamed answer served from cache");
            return Ok(replay_stream(cached_answer(entry)));
        }

        let retrieval = self.retriever.retrieve(tenant_id, &request.retrieval).await?;
        let user_message = build_user_message(&retrieval.matches, &request.retrieval.query);
        let chat_request = self.chat_request(&user_message, request, true)?;

        let started = Instant::now();
        let llm_stream = tokio::time::timeout(
            self.timeout,
            self.client.chat().create_stream(chat_request),
        )
        .await
        .map_err(|_| AppError::LlmTimeout(format!("no stream within {:?}", self.timeout)))?
        .map_err(|e| AppError::LlmUnavailable(e.to_string()))?;

        let db = Arc::clone(&self.db);
        let tenant = tenant_id.to_string();
        let provider = self.provider.clone();
        let model = self.model.clone();
        let matches = retrieval.matches;

        let stream = async_stream::stream! {
            let mut llm_stream = llm_stream;
            let mut accumulated = String::new();

            while let Some(item) = llm_stream.next().await {
                match item {
                    Ok(chunk) => {
                        let delta = chunk
                            .choices
                            .first()
                            .and_then(|choice| choice.delta.content.clone());
                        if let Some(delta) = delta {
                            if !delta.is_empty() {
                                accumulated.push_str(&delta);
                                yield AnswerEvent::Chunk(delta);
                            }
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "LLM stream failed mid-answer");
                        yield AnswerEvent::Error(err.to_string());
                        return;
                    }
                }
            }

            let latency_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
            let usage = estimate_usage(&user_message, &accumulated);
            let citations = extract_citations(&accumulated, &matches);

            store_cache_entry(&db, &tenant, &fp, &accumulated, &citations, usage, &model).await;
            account_usage(
                &db,
                &tenant,
                "answer_stream",
                &provider,
                &model,
                usage,
                latency_ms,
            )
            .await;

            yield AnswerEvent::Done { citations, usage };
        };

        Ok(stream.boxed())
    }

    fn request_fingerprint(&self, tenant_id: &str, request: &AnswerRequest) -> String {
        fingerprint(
            tenant_id,
            &request.retrieval.query,
            request.retrieval.top_k,
            request.retrieval.rerank,
            request.retrieval.max_ctx_tokens,
            &self.model,
        )
    }

    fn chat_request(
        &self,
        user_message: &str,
        request: &AnswerRequest,
        stream: bool,
    ) -> Result<CreateChatCompletionRequest, AppError> {
        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(GROUNDING_SYSTEM_PROMPT).into(),
                ChatCompletionRequestUserMessage::from(user_message).into(),
            ])
            .temperature(request.temperature.unwrap_or(self.temperature))
            .max_tokens(request.max_tokens.unwrap_or(self.max_tokens))
            .stream(stream)
            .build()?;
        Ok(chat_request)
    }

    async fn store_cache(
        &self,
        tenant_id: &str,
        fp: &str,
        answer: &str,
        citations: &[Match],
        usage: Usage,
    ) {
        store_cache_entry(&self.db, tenant_id, fp, answer, citations, usage, &self.model).await;
    }

    async fn account(&self, tenant_id: &str, endpoint: &str, usage: Usage, latency_ms: i64) {
        account_usage(
            &self.db,
            tenant_id,
            endpoint,
            &self.provider,
            &self.model,
            usage,
            latency_ms,
        )
        .await;
    }
}

fn cached_answer(entry: AnswerCacheEntry) -> Answer {
    let citations: Vec<Match> = serde_json::from_value(entry.citations).unwrap_or_default();
    Answer {
        answer: entry.answer,
        citations,
        usage: Usage {
            in_tokens: entry.in_tokens,
            out_tokens: entry.out_tokens,
        },
        cached: true,
    }
}

/// Replay a cached answer over the streaming surface: one chunk, one done.
fn replay_stream(answer: Answer) -> AnswerEventStream {
    let stream = async_stream::stream! {
        yield AnswerEvent::Chunk(answer.answer.clone());
        yield AnswerEvent::Done {
            citations: answer.citations,
            usage: answer.usage,
        };
    };
    stream.boxed()
}

async fn store_cache_entry(
    db: &SurrealDbClient,
    tenant_id: &str,
    fp: &str,
    answer: &str,
    citations: &[Match],
    usage: Usage,
    model: &str,
) {
    let now = Utc::now();
    let entry = AnswerCacheEntry {
        id: fp.to_string(),
        created_at: now,
        updated_at: now,
        tenant_id: tenant_id.to_string(),
        answer: answer.to_string(),
        citations: serde_json::to_value(citations).unwrap_or_default(),
        in_tokens: usage.in_tokens,
        out_tokens: usage.out_tokens,
        model: model.to_string(),
    };
    if let Err(err) = AnswerCacheEntry::put(db, entry).await {
        warn!(error = %err, "failed to cache answer");
    }
}

async fn account_usage(
    db: &SurrealDbClient,
    tenant_id: &str,
    endpoint: &str,
    provider: &str,
    model: &str,
    usage: Usage,
    latency_ms: i64,
) {
    if let Err(err) = UsageRecord::record(
        db,
        tenant_id,
        endpoint,
        provider,
        model,
        usage.in_tokens,
        usage.out_tokens,
        latency_ms,
    )
    .await
    {
        warn!(error = %err, "failed to record usage");
    }

    let now = Utc::now();
    let day_key = QuotaCounter::day_key(tenant_id, now);
    let expires = now + chrono::Duration::days(2);
    if let Err(err) = QuotaCounter::increment(
        db,
        &day_key,
        usage.in_tokens + usage.out_tokens,
        expires,
    )
    .await
    {
        warn!(error = %err, "failed to count tokens against the daily quota");
    }
}

/// Deterministic request fingerprint for cache keying.
pub fn fingerprint(
    tenant_id: &str,
    query: &str,
    top_k: usize,
    rerank: bool,
    max_ctx_tokens: usize,
    model: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update(b"|");
    hasher.update(normalize_query(query).as_bytes());
    hasher.update(b"|");
    hasher.update(format!("{top_k}|{rerank}|{max_ctx_tokens}|{model}").as_bytes());
    format!("{:x}", hasher.finalize())
}

fn normalize_query(query: &str) -> String {
    query.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Numbered context blocks aligned with match order, query last.
pub fn build_user_message(matches: &[Match], query: &str) -> String {
    let mut message = String::from("Context:\n");

    if matches.is_empty() {
        message.push_str("(no context available)\n");
    }
    for (index, m) in matches.iter().enumerate() {
        let breadcrumbs = m.breadcrumbs.join(" > ");
        if breadcrumbs.is_empty() {
            message.push_str(&format!("[{}]\n{}\n\n", index + 1, m.snippet));
        } else {
            message.push_str(&format!("[{}] {}\n{}\n\n", index + 1, breadcrumbs, m.snippet));
        }
    }

    message.push_str("Question:\n");
    message.push_str(query);
    message
}

/// Matches referenced by `[i]` markers in the answer, de-duplicated in
/// first-occurrence order. An answer without markers cites everything it
/// was shown.
pub fn extract_citations(answer: &str, matches: &[Match]) -> Vec<Match> {
    let mut cited: Vec<Match> = Vec::new();
    let mut seen = vec![false; matches.len()];

    let bytes = answer.as_bytes();
    let mut position = 0;
    while let Some(open) = answer[position..].find('[').map(|o| o + position) {
        let Some(close) = answer[open + 1..].find(']').map(|c| c + open + 1) else {
            break;
        };
        let inner = &answer[open + 1..close];
        if !inner.is_empty() && inner.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(number) = inner.parse::<usize>() {
                if number >= 1 && number <= matches.len() {
                    let index = number - 1;
                    if let (Some(flag), Some(m)) = (seen.get_mut(index), matches.get(index)) {
                        if !*flag {
                            *flag = true;
                            cited.push(m.clone());
                        }
                    }
                }
            }
        }
        position = close + 1;
        if position >= bytes.len() {
            break;
        }
    }

    if cited.is_empty() {
        return matches.to_vec();
    }
    cited
}

fn estimate_usage(user_message: &str, answer: &str) -> Usage {
    let prompt_tokens = token_count::count_tokens(GROUNDING_SYSTEM_PROMPT)
        .and_then(|system| Ok(system + token_count::count_tokens(user_message)?))
        .unwrap_or(0);
    let completion_tokens = token_count::count_tokens(answer).unwrap_or(0);
    Usage {
        in_tokens: i64::try_from(prompt_tokens).unwrap_or(0),
        out_tokens: i64::try_from(completion_tokens).unwrap_or(0),
    }
}
