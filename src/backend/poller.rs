//! Submit-then-poll client with a bounded retry budget
//!
//! A poll that hits a network error or any backend status error counts
//! against the budget the same way a "not ready" reply does. Only a
//! malformed payload ends the request at once. Nothing here waits longer than
//! `interval * max_retries` plus request time.

use super::client::ConversationBackend;
use super::types::{AudioAsset, PollReply};
use crate::config::PollingConfig;
use crate::error::{VoiceError, VoiceResult};
use std::sync::Arc;
use std::time::Duration;

/// An outstanding response-generation request
#[derive(Debug, Clone)]
pub struct PollRequest {
    pub session_id: String,
    /// Correlation id from the submit acknowledgement, if any
    pub request_id: Option<String>,
    /// Polls issued so far; never exceeds the poller's `max_retries`
    pub attempt: u32,
    pub interval: Duration,
}

/// State of a request after one poll
#[derive(Debug, Clone)]
pub enum PollStatus {
    Pending,
    Completed(AudioAsset),
}

/// Bounded poller over a [`ConversationBackend`]
#[derive(Clone)]
pub struct ResponsePoller {
    backend: Arc<dyn ConversationBackend>,
    interval: Duration,
    max_retries: u32,
}

impl ResponsePoller {
    pub fn new(backend: Arc<dyn ConversationBackend>, config: &PollingConfig) -> Self {
        Self {
            backend,
            interval: config.interval(),
            max_retries: config.max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Submit `text` for generation; a failure here means no polling at all
    pub async fn submit(&self, session_id: &str, text: &str) -> VoiceResult<PollRequest> {
        let ack = self.backend.submit_response(session_id, text).await?;
        tracing::info!(
            "Submitted response request for session {} (request {:?})",
            session_id,
            ack.request_id
        );
        Ok(PollRequest {
            session_id: session_id.to_string(),
            request_id: ack.request_id,
            attempt: 0,
            interval: self.interval,
        })
    }

    /// Issue one poll, advancing the attempt counter
    pub async fn poll(&self, request: &mut PollRequest) -> VoiceResult<PollStatus> {
        if request.attempt >= self.max_retries {
            return Err(VoiceError::TimeoutExceeded {
                attempts: request.attempt,
            });
        }
        request.attempt += 1;

        match self.backend.poll_response(&request.session_id).await {
            Ok(PollReply::Completed(asset)) => {
                tracing::info!(
                    "Response ready after {} poll(s): \"{}\"",
                    request.attempt,
                    asset.text
                );
                Ok(PollStatus::Completed(asset))
            }
            Ok(PollReply::Pending) => {
                tracing::debug!("Poll {}/{}: pending", request.attempt, self.max_retries);
                Ok(PollStatus::Pending)
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    "Poll {}/{} failed, will retry: {}",
                    request.attempt,
                    self.max_retries,
                    e
                );
                Ok(PollStatus::Pending)
            }
            Err(e) => Err(e),
        }
    }

    /// Wait one interval before each poll until completion or exhaustion
    pub async fn poll_until_complete(&self, request: &mut PollRequest) -> VoiceResult<AudioAsset> {
        while request.attempt < self.max_retries {
            tokio::time::sleep(request.interval).await;
            if let PollStatus::Completed(asset) = self.poll(request).await? {
                return Ok(asset);
            }
        }

        tracing::warn!(
            "Response not ready after {} polls, giving up",
            request.attempt
        );
        Err(VoiceError::TimeoutExceeded {
            attempts: request.attempt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::{SessionGreeting, SubmitAck};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend whose poll replies come from a script, then stay pending
    #[derive(Default)]
    struct ScriptedBackend {
        polls: AtomicU32,
        replies: Mutex<VecDeque<VoiceResult<PollReply>>>,
        fail_submit: bool,
    }

    #[async_trait]
    impl ConversationBackend for ScriptedBackend {
        async fn start_session(&self) -> VoiceResult<SessionGreeting> {
            unreachable!()
        }
        async fn transcribe(&self, _wav: Vec<u8>) -> VoiceResult<String> {
            unreachable!()
        }
        async fn get_filler(&self) -> VoiceResult<AudioAsset> {
            unreachable!()
        }
        async fn submit_response(&self, _session_id: &str, _text: &str) -> VoiceResult<SubmitAck> {
            if self.fail_submit {
                return Err(VoiceError::Network("connection refused".into()));
            }
            Ok(SubmitAck {
                request_id: Some("r1".into()),
            })
        }
        async fn poll_response(&self, _session_id: &str) -> VoiceResult<PollReply> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .pop_front()
                .unwrap_or(Ok(PollReply::Pending))
        }
        async fn get_response(&self, _session_id: &str, _text: &str) -> VoiceResult<AudioAsset> {
            unreachable!()
        }
        async fn fetch_audio(&self, _session_id: &str) -> VoiceResult<Vec<u8>> {
            unreachable!()
        }
        async fn end_session(&self, _session_id: &str) -> VoiceResult<()> {
            Ok(())
        }
    }

    fn poller(backend: Arc<ScriptedBackend>) -> ResponsePoller {
        ResponsePoller::new(backend, &PollingConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_pending_stops_after_max_retries() {
        let backend = Arc::new(ScriptedBackend::default());
        let poller = poller(backend.clone());

        let started = tokio::time::Instant::now();
        let mut request = poller.submit("s1", "hello").await.unwrap();
        let result = poller.poll_until_complete(&mut request).await;

        assert!(matches!(result, Err(VoiceError::TimeoutExceeded { attempts: 30 })));
        assert_eq!(backend.polls.load(Ordering::SeqCst), 30);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_errors_count_toward_budget() {
        let backend = Arc::new(ScriptedBackend::default());
        {
            let mut replies = backend.replies.lock();
            replies.push_back(Err(VoiceError::Network("reset".into())));
            replies.push_back(Err(VoiceError::Backend {
                status: 503,
                message: "busy".into(),
            }));
            replies.push_back(Ok(PollReply::Completed(AudioAsset::new(vec![1, 2], "done"))));
        }
        let poller = poller(backend.clone());

        let mut request = poller.submit("s1", "hello").await.unwrap();
        let asset = poller.poll_until_complete(&mut request).await.unwrap();

        assert_eq!(asset.text, "done");
        assert_eq!(request.attempt, 3);
        assert_eq!(request.request_id.as_deref(), Some("r1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_retried_until_completion() {
        let backend = Arc::new(ScriptedBackend::default());
        {
            let mut replies = backend.replies.lock();
            replies.push_back(Err(VoiceError::Backend {
                status: 404,
                message: "no such request yet".into(),
            }));
            replies.push_back(Ok(PollReply::Completed(AudioAsset::new(vec![7], "late"))));
        }
        let poller = poller(backend.clone());

        let mut request = poller.submit("s1", "hello").await.unwrap();
        let asset = poller.poll_until_complete(&mut request).await.unwrap();

        assert_eq!(asset.text, "late");
        assert_eq!(backend.polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_is_terminal() {
        let backend = Arc::new(ScriptedBackend::default());
        backend
            .replies
            .lock()
            .push_back(Err(VoiceError::MalformedPayload("not json".into())));
        let poller = poller(backend.clone());

        let mut request = poller.submit("s1", "hello").await.unwrap();
        let result = poller.poll_until_complete(&mut request).await;

        assert!(matches!(result, Err(VoiceError::MalformedPayload(_))));
        assert_eq!(backend.polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_submit_failure_issues_no_polls() {
        let backend = Arc::new(ScriptedBackend {
            fail_submit: true,
            ..Default::default()
        });
        let poller = poller(backend.clone());

        assert!(poller.submit("s1", "hello").await.is_err());
        assert_eq!(backend.polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_poll_refuses_past_budget() {
        let backend = Arc::new(ScriptedBackend::default());
        let poller = poller(backend.clone());
        let mut request = PollRequest {
            session_id: "s1".into(),
            request_id: None,
            attempt: 30,
            interval: Duration::from_millis(500),
        };

        assert!(matches!(
            poller.poll(&mut request).await,
            Err(VoiceError::TimeoutExceeded { attempts: 30 })
        ));
        assert_eq!(backend.polls.load(Ordering::SeqCst), 0);
    }
}
