//! Lightweight URL checks using HEAD requests.

use std::sync::Arc;

use http::Method;
use url::Url;

use crate::cookies::CookieSet;
use crate::request::RequestSpec;
use crate::transport::{Connection, ConnectionError, ConnectionExecutor, Connector};
use crate::user_agents::{UserAgentCatalog, UserAgentProvider};

/// Checks reachability and content type of URLs without downloading them.
#[derive(Clone)]
pub struct UrlProbe {
    executor: ConnectionExecutor,
}

impl UrlProbe {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let user_agents: Arc<dyn UserAgentProvider> = Arc::new(UserAgentCatalog::builtin());
        Self {
            executor: ConnectionExecutor::new(connector, user_agents),
        }
    }

    pub fn with_executor(executor: ConnectionExecutor) -> Self {
        Self { executor }
    }

    /// `true` when a HEAD request without redirects answers 200.
    pub async fn exists(&self, url: &Url) -> Result<bool, ConnectionError> {
        let mut connection = self.head(url).await?;
        Ok(connection.response_code().await? == 200)
    }

    /// `Content-Type` reported for a HEAD request without redirects.
    pub async fn content_type(&self, url: &Url) -> Result<Option<String>, ConnectionError> {
        let mut connection = self.head(url).await?;
        connection.response_code().await?;
        Ok(connection
            .response_header_values("Content-Type")
            .into_iter()
            .next())
    }

    /// Whether the transport can open a connection for `url` at all.
    pub async fn is_valid(&self, url: &Url) -> bool {
        match self.executor.connector().open(url).await {
            Ok(_) => true,
            Err(err) => {
                log::debug!("{url} is not openable: {err}");
                false
            }
        }
    }

    async fn head(&self, url: &Url) -> Result<Box<dyn Connection>, ConnectionError> {
        let mut spec = RequestSpec::new();
        spec.url(url.clone())
            .method(Method::HEAD)
            .follow_redirects(false);
        self.executor.build(&mut spec, &CookieSet::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryConnector, ScriptedResponse};

    fn probe(connector: &MemoryConnector) -> UrlProbe {
        UrlProbe::new(Arc::new(connector.clone()))
    }

    #[tokio::test]
    async fn exists_requires_plain_200() {
        let connector = MemoryConnector::new();
        connector
            .push_response(ScriptedResponse::new(200, ""))
            .push_response(ScriptedResponse::new(301, "").with_header("Location", "/elsewhere"));
        let probe = probe(&connector);
        let url = Url::parse("http://example.com/doc").unwrap();

        assert!(probe.exists(&url).await.unwrap());
        assert!(!probe.exists(&url).await.unwrap());

        let sent = connector.sent_requests();
        assert_eq!(sent[0].method, Some(Method::HEAD));
        assert!(!sent[0].follow_redirects);
        assert!(!sent[0].do_output);
    }

    #[tokio::test]
    async fn reports_content_type_header() {
        let connector = MemoryConnector::new();
        connector.push_response(ScriptedResponse::new(200, "").with_header("content-type", "text/csv"));
        let url = Url::parse("http://example.com/data.csv").unwrap();
        assert_eq!(
            probe(&connector).content_type(&url).await.unwrap().as_deref(),
            Some("text/csv")
        );
    }

    #[tokio::test]
    async fn validity_follows_connector() {
        let connector = MemoryConnector::new();
        connector.push_response(ScriptedResponse::new(200, ""));
        let probe = probe(&connector);
        let url = Url::parse("http://example.com/").unwrap();
        assert!(probe.is_valid(&url).await);
        assert!(!probe.is_valid(&url).await);
    }
}
