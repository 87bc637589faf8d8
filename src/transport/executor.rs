//! Turns a [`RequestSpec`] into a configured, body-written [`Connection`].

use std::sync::Arc;

use super::{Connection, ConnectionError, Connector};
use crate::cookies::CookieSet;
use crate::request::RequestSpec;
use crate::user_agents::UserAgentProvider;

const USER_AGENT: &str = "User-Agent";
const CONTENT_TYPE: &str = "Content-Type";

/// Opens and prepares connections for request specs.
#[derive(Clone)]
pub struct ConnectionExecutor {
    connector: Arc<dyn Connector>,
    user_agents: Arc<dyn UserAgentProvider>,
}

impl ConnectionExecutor {
    pub fn new(connector: Arc<dyn Connector>, user_agents: Arc<dyn UserAgentProvider>) -> Self {
        Self {
            connector,
            user_agents,
        }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::clone(&self.connector)
    }

    /// Open a connection for `spec`, apply its settings, inject `cookies` and
    /// write the body. The spec is marked consumed before anything else, so
    /// the next mutation starts a fresh header/body set even if this fails.
    pub async fn build(
        &self,
        spec: &mut RequestSpec,
        cookies: &CookieSet,
    ) -> Result<Box<dyn Connection>, ConnectionError> {
        spec.mark_consumed();
        let url = spec.get_url().cloned().ok_or(ConnectionError::MissingUrl)?;
        let mut connection = self.connector.open(&url).await?;

        let body = spec.body_buffer();
        let has_output = body.has_output();
        connection.set_do_output(has_output);
        connection.set_do_input(true);

        let mode = spec.streaming_mode();
        log::trace!("streaming mode for {url}: {mode:?}");
        connection.set_streaming_mode(mode);
        if let Some(timeout) = spec.get_read_timeout() {
            connection.set_read_timeout(timeout);
        }
        if let Some(timeout) = spec.get_connect_timeout() {
            connection.set_connect_timeout(timeout);
        }
        connection.set_follow_redirects(spec.is_follow_redirects());

        let wants_agent = spec.is_random_user_agent() || spec.is_mobile_user_agent();
        if wants_agent && spec.header_value(USER_AGENT).is_none() {
            let agent = self
                .user_agents
                .user_agent(url.host_str(), spec.is_mobile_user_agent());
            log::debug!("using user agent {agent} for {url}");
            connection.set_request_header(USER_AGENT, &agent)?;
        }

        for (name, value) in spec.get_headers() {
            connection.set_request_header(name, value)?;
        }
        if has_output && connection.request_header(CONTENT_TYPE).is_none() {
            if let Some(content_type) = body.content_type() {
                connection.set_request_header(CONTENT_TYPE, &content_type)?;
            }
        }

        if let Some(method) = spec.get_method() {
            if !connection.is_http() {
                return Err(ConnectionError::MethodNotSupported {
                    method: method.to_string(),
                    scheme: url.scheme().to_string(),
                });
            }
            connection.set_method(method)?;
        }

        spec.get_cookie_processor()
            .inject(connection.as_mut(), cookies)?;

        if has_output {
            let mut sink = connection.output_stream()?;
            let written = body.serialize(&mut *sink).await;
            drop(sink);
            written?;
        }

        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Charset;
    use crate::transport::{MemoryConnector, ScriptedResponse, StreamingMode};
    use crate::user_agents::FixedUserAgent;
    use http::Method;
    use std::time::Duration;
    use url::Url;

    fn executor(connector: &MemoryConnector) -> ConnectionExecutor {
        ConnectionExecutor::new(
            Arc::new(connector.clone()),
            Arc::new(FixedUserAgent("agent/1.0".into())),
        )
    }

    fn spec(url: &str) -> RequestSpec {
        let mut spec = RequestSpec::new();
        spec.url(Url::parse(url).unwrap());
        spec
    }

    #[tokio::test]
    async fn get_without_body_sets_no_output() {
        let connector = MemoryConnector::new();
        connector.push_response(ScriptedResponse::new(200, ""));
        let mut spec = spec("http://example.com/");
        spec.read_timeout(Duration::from_secs(2)).follow_redirects(false);

        drop(executor(&connector).build(&mut spec, &CookieSet::new()).await.unwrap());

        let sent = &connector.sent_requests()[0];
        assert!(!sent.do_output);
        assert!(sent.do_input);
        assert_eq!(sent.method, None);
        assert_eq!(sent.output_closes, 0);
        assert_eq!(sent.read_timeout, Some(Duration::from_secs(2)));
        assert_eq!(sent.connect_timeout, None);
        assert!(!sent.follow_redirects);
        assert_eq!(sent.header("User-Agent"), Some("agent/1.0"));
    }

    #[tokio::test]
    async fn params_are_written_with_content_type_and_closed_once() {
        let connector = MemoryConnector::new();
        connector.push_response(ScriptedResponse::new(200, ""));
        let mut spec = spec("http://example.com/login");
        spec.charset(Charset::Utf8)
            .params([("user", "a b"), ("pw", "x&y")], true)
            .unwrap();
        spec.fixed_length_streaming(20).chunked_streaming(8);

        drop(executor(&connector).build(&mut spec, &CookieSet::new()).await.unwrap());

        let sent = &connector.sent_requests()[0];
        assert!(sent.do_output);
        assert_eq!(sent.body_text(), "user=a+b&pw=x%26y");
        assert_eq!(sent.output_closes, 1);
        assert_eq!(sent.streaming, StreamingMode::FixedLength(20));
        assert_eq!(
            sent.header("Content-Type"),
            Some("application/x-www-form-urlencoded;charset=UTF-8")
        );
        assert_eq!(sent.header("Accept-Charset"), Some("UTF-8"));
    }

    #[tokio::test]
    async fn explicit_headers_win_and_cookies_are_injected() {
        let connector = MemoryConnector::new();
        connector.push_response(ScriptedResponse::new(200, ""));
        let mut spec = spec("https://example.com/");
        spec.user_agent("custom/2")
            .header("Content-Type", "text/plain")
            .multipart_field("k", "v")
            .method(Method::PUT);
        let cookies = ["sid=1"].into_iter().collect();

        drop(executor(&connector).build(&mut spec, &cookies).await.unwrap());

        let sent = &connector.sent_requests()[0];
        assert_eq!(sent.header("User-Agent"), Some("custom/2"));
        assert_eq!(sent.header("Content-Type"), Some("text/plain"));
        assert_eq!(sent.header("Cookie"), Some("sid=1"));
        assert_eq!(sent.method, Some(Method::PUT));
    }

    #[tokio::test]
    async fn method_on_non_http_connection_fails() {
        let connector = MemoryConnector::new();
        connector.push_response(ScriptedResponse::new(200, ""));
        let mut spec = spec("file:///tmp/data");
        spec.get();

        let result = executor(&connector).build(&mut spec, &CookieSet::new()).await;
        assert!(matches!(
            result,
            Err(ConnectionError::MethodNotSupported { ref scheme, .. }) if scheme == "file"
        ));
    }

    #[tokio::test]
    async fn no_agent_when_disabled() {
        let connector = MemoryConnector::new();
        connector.push_response(ScriptedResponse::new(200, ""));
        let mut spec = spec("http://example.com/");
        spec.random_user_agent(false);

        drop(executor(&connector).build(&mut spec, &CookieSet::new()).await.unwrap());
        assert_eq!(connector.sent_requests()[0].header("User-Agent"), None);
    }

    #[tokio::test]
    async fn missing_url_is_an_error() {
        let connector = MemoryConnector::new();
        let mut spec = RequestSpec::new();
        assert!(matches!(
            executor(&connector).build(&mut spec, &CookieSet::new()).await,
            Err(ConnectionError::MissingUrl)
        ));
        assert_eq!(connector.attempts(), 0);
    }
}
