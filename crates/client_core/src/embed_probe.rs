//! Header-based stand-in for the embedded frame's load/error signals.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, CONTENT_SECURITY_POLICY, X_FRAME_OPTIONS},
    Client,
};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::frame_loader::{AttemptId, FrameLoader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Embeddable,
    Refused(String),
}

#[async_trait]
pub trait EmbedProbe: Send + Sync {
    async fn probe(&self, address: &str) -> ProbeOutcome;
}

pub struct HttpEmbedProbe {
    http: Client,
}

impl HttpEmbedProbe {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl EmbedProbe for HttpEmbedProbe {
    async fn probe(&self, address: &str) -> ProbeOutcome {
        match self.http.get(address).send().await {
            // An error page still renders inside a frame, so only the framing
            // headers decide.
            Ok(response) => match framing_refusal(response.headers()) {
                Some(reason) => ProbeOutcome::Refused(reason),
                None => ProbeOutcome::Embeddable,
            },
            Err(err) => ProbeOutcome::Refused(format!("request failed: {err}")),
        }
    }
}

/// Returns why a response with these headers cannot be shown in a frame
/// hosted on another origin.
pub fn framing_refusal(headers: &HeaderMap) -> Option<String> {
    for value in headers.get_all(X_FRAME_OPTIONS) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        let normalized = value.trim().to_ascii_lowercase();
        if normalized == "deny" || normalized == "sameorigin" {
            return Some(format!("X-Frame-Options: {}", value.trim()));
        }
    }

    for value in headers.get_all(CONTENT_SECURITY_POLICY) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for directive in value.split(';') {
            let mut tokens = directive.split_whitespace();
            if !tokens
                .next()
                .is_some_and(|name| name.eq_ignore_ascii_case("frame-ancestors"))
            {
                continue;
            }
            let restrictive = tokens.all(|source| {
                source.eq_ignore_ascii_case("'none'") || source.eq_ignore_ascii_case("'self'")
            });
            if restrictive {
                return Some(format!("Content-Security-Policy: {}", directive.trim()));
            }
        }
    }

    None
}

/// Runs `probe` for one frame attempt and reports the result to `loader`.
/// The loader's countdown still bounds the attempt; a late result is ignored.
pub fn attach_probe(
    loader: &FrameLoader,
    attempt: AttemptId,
    address: impl Into<String>,
    probe: Arc<dyn EmbedProbe>,
) -> JoinHandle<()> {
    let loader = loader.clone();
    let address = address.into();
    tokio::spawn(async move {
        match probe.probe(&address).await {
            ProbeOutcome::Embeddable => {
                loader.signal_loaded(attempt);
            }
            ProbeOutcome::Refused(reason) => {
                debug!(attempt = attempt.get(), %address, %reason, "embed refused");
                loader.signal_error(attempt);
            }
        }
    })
}

#[cfg(test)]
#[path = "tests/embed_probe_tests.rs"]
mod tests;
