use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use reqsession_rs::{
    FixedUserAgent, ReqwestConnector, ResponseError, Session, SessionError, TransientFailure,
    UrlProbe,
};
use url::Url;
use wiremock::matchers::{body_string, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CHALLENGE_PAGE: &str = "<html><head><script type=\"text/javascript\">\n  (function(){\n    setTimeout(function(){\n        var t,r,a,f,u=1;\n        t = document.createElement('div');\n        a = document.getElementById('jschl-answer');\n        a.value = (2*3)+4 + t.length;\n        f.submit();\n      }, 4000);\n  })();\n</script></head><body>\n<form id=\"challenge-form\" action=\"/cdn-cgi/l/chk_jschl\" method=\"get\">\n  <input type=\"hidden\" name=\"jschl_vc\" value=\"vc1\"/>\n  <input type=\"hidden\" name=\"pass\" value=\"p1\"/>\n</form></body></html>";

fn session() -> Session {
    Session::builder()
        .with_connector(Arc::new(ReqwestConnector::new()))
        .with_user_agents(Arc::new(FixedUserAgent("wire-agent".into())))
        .with_challenge_delay(Duration::ZERO)
        .build()
}

fn endpoint(server: &MockServer, route: &str) -> Url {
    Url::parse(&format!("{}{route}", server.uri())).unwrap()
}

#[tokio::test]
async fn form_login_then_cookie_authenticated_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(header("content-type", "application/x-www-form-urlencoded;charset=UTF-8"))
        .and(header("user-agent", "wire-agent"))
        .and(body_string("user=me&password=s%26cret"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "sid=42; Path=/; HttpOnly")
                .set_body_string("hello"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header("cookie", "sid=42"))
        .respond_with(ResponseTemplate::new(200).set_body_string("account"))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = session();
    session
        .request()
        .url(endpoint(&server, "/login"))
        .params([("user", "me"), ("password", "s&cret")], true)
        .unwrap();
    assert_eq!(session.bytes().await.unwrap(), b"hello");

    session.request().url(endpoint(&server, "/account"));
    let response = session.response().await.unwrap();
    assert_eq!(response.code(), 200);
    assert_eq!(response.message(), Some("OK"));
    assert_eq!(response.into_bytes().unwrap(), b"account");
}

#[tokio::test]
async fn error_statuses_come_back_with_their_body() {
    let server = MockServer::start().await;
    Mock::given(path("/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = Session::builder()
        .with_connector(Arc::new(ReqwestConnector::new()))
        .with_retries(3, Duration::ZERO)
        .build();
    let response = session.response_for(endpoint(&server, "/broken")).await.unwrap();
    assert_eq!(response.code(), 500);
    assert!(!response.is_success());
    assert_eq!(response.into_bytes().unwrap(), b"boom");
}

#[tokio::test]
async fn compressed_payload_is_decoded() {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"{\"items\":[1,2,3]}").unwrap();
    let server = MockServer::start().await;
    Mock::given(path("/data"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-encoding", "gzip")
                .set_body_bytes(encoder.finish().unwrap()),
        )
        .mount(&server)
        .await;

    let mut session = session();
    session.request().url(endpoint(&server, "/data"));
    assert_eq!(session.bytes().await.unwrap(), b"{\"items\":[1,2,3]}");
}

#[tokio::test]
async fn redirects_are_reported_when_not_followed() {
    let server = MockServer::start().await;
    Mock::given(path("/old"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/new"))
        .mount(&server)
        .await;
    Mock::given(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
        .mount(&server)
        .await;

    let mut session = session();
    session.request().url(endpoint(&server, "/old")).follow_redirects(false);
    let response = session.response().await.unwrap();
    assert_eq!(response.code(), 302);
    assert_eq!(response.header("Location"), Some("/new".to_string()));

    session.request().follow_redirects(true);
    assert_eq!(session.bytes().await.unwrap(), b"moved");
}

#[tokio::test]
async fn challenge_is_answered_over_the_wire() {
    let server = MockServer::start().await;
    let protected = endpoint(&server, "/protected");
    let answer = 10 + protected.host_str().unwrap().len();

    Mock::given(method("POST"))
        .and(path("/protected"))
        .and(header("referer", protected.as_str()))
        .and(body_string(format!("jschl_vc=vc1&pass=p1&jschl_answer={answer}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "cf_clearance=ok")
                .set_body_string("content"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/protected"))
        .respond_with(ResponseTemplate::new(403).set_body_string(CHALLENGE_PAGE))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = session();
    let response = session.response_for(protected).await.unwrap();
    assert_eq!(response.code(), 200);
    assert!(session.cookies().contains("cf_clearance=ok"));
}

#[tokio::test]
async fn multipart_fields_reach_the_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(header("content-type", "multipart/form-data; boundary=xyz"))
        .and(body_string_contains("Content-Disposition: form-data; name=\"note\""))
        .and(body_string_contains("--xyz--\r\n"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = session();
    session.request().url(endpoint(&server, "/upload")).chunked_streaming(8);
    session.request().body().boundary("xyz").multipart_field("note", "streamed in chunks");
    assert_eq!(session.response().await.unwrap().code(), 204);
}

#[tokio::test]
async fn refused_connections_fail_after_retries() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    let mut session = Session::builder()
        .with_connector(Arc::new(ReqwestConnector::new()))
        .with_retries(1, Duration::from_millis(10))
        .build();
    let url = Url::parse(&format!("http://{address}/")).unwrap();
    let err = session.response_for(url).await.unwrap_err();
    assert!(err.is_transient());
    assert!(matches!(
        &err,
        SessionError::Response(ResponseError::Io(source)) if source.kind() == io::ErrorKind::ConnectionRefused
    ));
}

#[tokio::test]
async fn url_checks_use_head_responses() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/report.pdf"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "application/pdf"))
        .mount(&server)
        .await;

    let probe = UrlProbe::new(Arc::new(ReqwestConnector::new()));
    let url = endpoint(&server, "/report.pdf");
    assert!(probe.exists(&url).await.unwrap());
    assert_eq!(
        probe.content_type(&url).await.unwrap().as_deref(),
        Some("application/pdf")
    );
    assert!(!probe.exists(&endpoint(&server, "/missing")).await.unwrap());
}
