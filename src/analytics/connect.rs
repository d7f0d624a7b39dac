//! Connection strategies for the analytical store.
//!
//! The store may be reachable at two configured endpoints (`addr` and
//! `alternate_addr`), over TLS or plaintext. [`strategies`] turns the
//! configuration into an ordered list; [`resolve`] tries each entry once and
//! keeps the first client that opens and answers a liveness probe.
//!
//! Order: primary over TLS, alternate over TLS, primary plaintext, alternate
//! plaintext. Plaintext entries exist only when TLS is off, or when TLS is on
//! and `allow_plaintext` is set.

use std::fmt;
use std::future::Future;

use anyhow::{anyhow, Result};

use crate::config::{AnalyticsConfig, EndpointMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Primary,
    Alternate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tls,
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectStrategy {
    pub endpoint: Endpoint,
    pub transport: Transport,
}

impl fmt::Display for ConnectStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endpoint = match self.endpoint {
            Endpoint::Primary => "primary",
            Endpoint::Alternate => "alternate",
        };
        let transport = match self.transport {
            Transport::Tls => "tls",
            Transport::Plain => "plain",
        };
        write!(f, "{}+{}", endpoint, transport)
    }
}

const ALL: [ConnectStrategy; 4] = [
    ConnectStrategy {
        endpoint: Endpoint::Primary,
        transport: Transport::Tls,
    },
    ConnectStrategy {
        endpoint: Endpoint::Alternate,
        transport: Transport::Tls,
    },
    ConnectStrategy {
        endpoint: Endpoint::Primary,
        transport: Transport::Plain,
    },
    ConnectStrategy {
        endpoint: Endpoint::Alternate,
        transport: Transport::Plain,
    },
];

/// Ordered strategy list for `cfg`. May be empty.
pub fn strategies(cfg: &AnalyticsConfig) -> Vec<ConnectStrategy> {
    let has_alternate = cfg
        .alternate_addr
        .as_deref()
        .is_some_and(|a| !a.trim().is_empty());

    ALL.into_iter()
        .filter(|s| match s.transport {
            Transport::Tls => cfg.tls,
            Transport::Plain => !cfg.tls || cfg.allow_plaintext,
        })
        .filter(|s| match (cfg.endpoint, s.endpoint) {
            (EndpointMode::Primary, Endpoint::Alternate) => false,
            (EndpointMode::Alternate, Endpoint::Primary) => false,
            (_, Endpoint::Alternate) => has_alternate,
            (_, Endpoint::Primary) => true,
        })
        .collect()
}

/// Base URL for `strategy`, e.g. `https://ch.internal:8443`.
pub fn url_for(cfg: &AnalyticsConfig, strategy: ConnectStrategy) -> Option<String> {
    let addr = match strategy.endpoint {
        Endpoint::Primary => cfg.addr.as_str(),
        Endpoint::Alternate => cfg.alternate_addr.as_deref()?,
    };
    let scheme = match strategy.transport {
        Transport::Tls => "https",
        Transport::Plain => "http",
    };
    Some(format!("{}://{}", scheme, addr.trim()))
}

/// Tries every strategy in order. `open` must build the client and probe it;
/// the first `Ok` wins. When all fail, the last error is returned annotated
/// with its strategy number.
pub async fn resolve<C, F, Fut>(
    cfg: &AnalyticsConfig,
    mut open: F,
) -> Result<(C, ConnectStrategy)>
where
    F: FnMut(ConnectStrategy, String) -> Fut,
    Fut: Future<Output = Result<C>>,
{
    let list = strategies(cfg);
    if list.is_empty() {
        return Err(anyhow!(
            "no connection strategy enabled (tls = {}, allow_plaintext = {})",
            cfg.tls,
            cfg.allow_plaintext
        ));
    }

    let mut last_err = None;
    for (i, strategy) in list.into_iter().enumerate() {
        let Some(url) = url_for(cfg, strategy) else {
            continue;
        };
        match open(strategy, url.clone()).await {
            Ok(client) => {
                tracing::info!(strategy = %strategy, url = %url, "analytical store connected");
                return Ok((client, strategy));
            }
            Err(e) => {
                tracing::warn!(strategy = %strategy, url = %url, error = %format!("{:#}", e), "connection attempt failed");
                last_err = Some(e.context(format!("strategy {} ({})", i + 1, strategy)));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("no usable connection strategy")))
}
