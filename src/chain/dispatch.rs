//! Continuation dispatchers.

use crate::config::DispatchConfig;
use crate::error::{Error, Result};
use crate::types::Invocation;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Fire-and-forget trigger for the next unit of execution
///
/// Called exactly once per turn. Implementations must not retry; a failure is
/// reported to the orchestrator, which stalls the chain.
#[async_trait]
pub trait ContinuationDispatcher: Send + Sync {
    /// Hand `invocation` off for later execution
    async fn dispatch(&self, invocation: Invocation) -> Result<()>;
}

/// Dispatches onto the in-process invocation queue consumed by a [`super::ChainRunner`]
#[derive(Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::Sender<Invocation>,
}

impl ChannelDispatcher {
    /// Create a dispatcher feeding `tx`
    pub fn new(tx: mpsc::Sender<Invocation>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ContinuationDispatcher for ChannelDispatcher {
    async fn dispatch(&self, invocation: Invocation) -> Result<()> {
        try_enqueue(&self.tx, invocation)
    }
}

/// Non-blocking send onto the invocation queue
///
/// Never waits for capacity: a turn holding a runner permit while blocked on a
/// full queue would stop the runner from draining it.
pub(crate) fn try_enqueue(tx: &mpsc::Sender<Invocation>, invocation: Invocation) -> Result<()> {
    tx.try_send(invocation).map_err(|e| match e {
        mpsc::error::TrySendError::Full(inv) => Error::Dispatch(format!(
            "invocation queue is full ({} for task {})",
            inv.target(),
            inv.task_id()
        )),
        mpsc::error::TrySendError::Closed(inv) => Error::Dispatch(format!(
            "invocation queue is closed ({} for task {})",
            inv.target(),
            inv.task_id()
        )),
    })
}

/// Dispatches by POSTing the invocation to the process or finalize endpoint
pub struct HttpDispatcher {
    client: reqwest::Client,
    process_url: String,
    finalize_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpDispatcher {
    /// Create a dispatcher from the dispatch configuration
    ///
    /// Both URLs must be set and parse as absolute URLs.
    pub fn from_config(config: &DispatchConfig) -> Result<Self> {
        let process_url = required_url(config.process_url.as_deref(), "dispatch.process_url")?;
        let finalize_url = required_url(config.finalize_url.as_deref(), "dispatch.finalize_url")?;

        Ok(Self {
            client: reqwest::Client::new(),
            process_url,
            finalize_url,
            api_key: config.api_key.clone(),
            timeout: config.timeout,
        })
    }
}

fn required_url(value: Option<&str>, key: &str) -> Result<String> {
    let value = value.ok_or_else(|| Error::Config {
        message: format!("{} is required for http dispatch", key),
        key: Some(key.to_string()),
    })?;
    url::Url::parse(value).map_err(|e| Error::Config {
        message: format!("invalid {}: {}", key, e),
        key: Some(key.to_string()),
    })?;
    Ok(value.to_string())
}

#[async_trait]
impl ContinuationDispatcher for HttpDispatcher {
    async fn dispatch(&self, invocation: Invocation) -> Result<()> {
        let request = match &invocation {
            Invocation::Process(body) => self.client.post(&self.process_url).json(body),
            Invocation::Finalize(body) => self.client.post(&self.finalize_url).json(body),
        };
        let mut request = request.timeout(self.timeout);
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }

        let response = request.send().await.map_err(|e| {
            Error::Dispatch(format!(
                "{} request for task {} failed: {}",
                invocation.target(),
                invocation.task_id(),
                e
            ))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Dispatch(format!(
                "{} endpoint returned status {}: {}",
                invocation.target(),
                status,
                body
            )));
        }

        tracing::debug!(
            task_id = invocation.task_id().0,
            target = invocation.target(),
            "continuation delivered"
        );
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FinalizeInvocation, Identity, JobType, ProcessInvocation, TaskId};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn process(index: u32) -> Invocation {
        Invocation::Process(ProcessInvocation {
            task_id: TaskId(5),
            sub_task_index: index,
            job_type: JobType::ExportBlocks,
            identity: Identity::user("u-1", "Ada"),
        })
    }

    fn finalize() -> Invocation {
        Invocation::Finalize(FinalizeInvocation {
            task_id: TaskId(5),
            job_type: JobType::ExportBlocks,
            identity: Identity::user("u-1", "Ada"),
        })
    }

    fn http_config(server: &MockServer) -> DispatchConfig {
        DispatchConfig {
            mode: crate::config::DispatchMode::Http,
            process_url: Some(format!("{}/invoke/process", server.uri())),
            finalize_url: Some(format!("{}/invoke/finalize", server.uri())),
            timeout: Duration::from_secs(5),
            api_key: Some("secret".to_string()),
        }
    }

    #[tokio::test]
    async fn channel_dispatcher_enqueues() {
        let (tx, mut rx) = mpsc::channel(4);
        let dispatcher = ChannelDispatcher::new(tx);

        dispatcher.dispatch(process(1)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), process(1));
    }

    #[tokio::test]
    async fn channel_dispatcher_fails_when_full() {
        let (tx, _rx) = mpsc::channel(1);
        let dispatcher = ChannelDispatcher::new(tx);

        dispatcher.dispatch(process(1)).await.unwrap();
        let result = dispatcher.dispatch(process(2)).await;
        assert!(matches!(result, Err(Error::Dispatch(msg)) if msg.contains("full")));
    }

    #[tokio::test]
    async fn channel_dispatcher_fails_when_closed() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let dispatcher = ChannelDispatcher::new(tx);

        let result = dispatcher.dispatch(finalize()).await;
        assert!(matches!(result, Err(Error::Dispatch(msg)) if msg.contains("closed")));
    }

    #[tokio::test]
    async fn http_dispatcher_posts_to_target_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/invoke/process"))
            .and(header("X-Api-Key", "secret"))
            .and(body_partial_json(serde_json::json!({
                "task_id": 5,
                "sub_task_index": 3,
                "type": "export_blocks",
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/invoke/finalize"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = HttpDispatcher::from_config(&http_config(&server)).unwrap();
        dispatcher.dispatch(process(3)).await.unwrap();
        dispatcher.dispatch(finalize()).await.unwrap();
    }

    #[tokio::test]
    async fn http_dispatcher_treats_non_2xx_as_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = HttpDispatcher::from_config(&http_config(&server)).unwrap();
        let result = dispatcher.dispatch(process(0)).await;
        assert!(matches!(result, Err(Error::Dispatch(msg)) if msg.contains("503")));
    }

    #[test]
    fn http_dispatcher_requires_urls() {
        let config = DispatchConfig {
            mode: crate::config::DispatchMode::Http,
            process_url: Some("not a url".to_string()),
            finalize_url: None,
            ..Default::default()
        };
        assert!(matches!(
            HttpDispatcher::from_config(&config),
            Err(Error::Config { .. })
        ));
    }
}
