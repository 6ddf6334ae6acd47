//! End-to-end tests for the STDIO transport
//!
//! Each test drives a real `tarnhelm serve` process over its pipes. Stdout
//! must carry one JSON-RPC message per line and nothing else.

use serde_json::{Value, json};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const READ_TIMEOUT: Duration = Duration::from_secs(20);

/// A running server. The child is killed when this is dropped.
struct Session {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: Lines<BufReader<ChildStderr>>,
}

impl Session {
    /// Start a server whose DoH endpoint is unreachable, so hostnames fall
    /// back to the system resolver and nothing leaves the machine.
    fn start(extra_args: &[&str]) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_tarnhelm"))
            .args(["serve", "--doh-endpoint", "http://127.0.0.1:9/dns-query"])
            .args(extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .expect("spawn tarnhelm");

        let stdin = child.stdin.take();
        let stdout = BufReader::new(child.stdout.take().unwrap()).lines();
        let stderr = BufReader::new(child.stderr.take().unwrap()).lines();

        Self {
            child,
            stdin,
            stdout,
            stderr,
        }
    }

    /// Start a server whose search endpoint is `upstream`
    fn with_search(upstream: &MockServer) -> Self {
        let endpoint = format!("{}/html", upstream.uri());
        Self::start(&["--search-endpoint", &endpoint])
    }

    async fn write_line(&mut self, line: &str) {
        let stdin = self.stdin.as_mut().expect("stdin still open");
        stdin.write_all(line.as_bytes()).await.unwrap();
        stdin.write_all(b"\n").await.unwrap();
        stdin.flush().await.unwrap();
    }

    async fn send(&mut self, message: Value) {
        self.write_line(&message.to_string()).await;
    }

    async fn raw_line(&mut self) -> String {
        timeout(READ_TIMEOUT, self.stdout.next_line())
            .await
            .expect("timed out waiting for stdout")
            .unwrap()
            .expect("stdout closed")
    }

    async fn next(&mut self) -> Value {
        let line = self.raw_line().await;
        serde_json::from_str(&line).unwrap_or_else(|e| panic!("non-JSON stdout line {line:?}: {e}"))
    }

    async fn call(&mut self, message: Value) -> Value {
        self.send(message).await;
        self.next().await
    }
}

fn request(id: Value, method: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method })
}

fn tool_call(id: u64, name: &str, arguments: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": { "name": name, "arguments": arguments }
    })
}

fn search_call(id: u64) -> Value {
    tool_call(id, "search", json!({ "query": "rust", "max_results": 3 }))
}

fn tool_text(response: &Value) -> &str {
    response["result"]["content"][0]["text"].as_str().unwrap()
}

const RESULTS_PAGE: &str = r#"<html><body>
    <div class="result">
        <h2 class="result__title"><a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F">Rust Programming Language</a></h2>
        <a class="result__snippet">A language empowering everyone.</a>
    </div>
</body></html>"#;

async fn search_upstream(delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(RESULTS_PAGE, "text/html")
                .set_delay(delay),
        )
        .mount(&server)
        .await;
    server
}

mod protocol_tests {
    use super::*;

    #[tokio::test]
    async fn test_handshake_and_tool_listing() {
        let mut session = Session::start(&[]);

        let init = session.call(request(json!(1), "initialize")).await;
        assert_eq!(init["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(init["result"]["serverInfo"]["name"], "tarnhelm");

        let list = session.call(request(json!(2), "tools/list")).await;
        let names: Vec<_> = list["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|tool| tool["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["search", "fetch_content"]);
    }

    #[tokio::test]
    async fn test_notifications_are_not_answered() {
        let mut session = Session::start(&[]);

        session
            .send(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
            .await;
        session
            .send(json!({ "jsonrpc": "2.0", "method": "initialized" }))
            .await;

        // The ping reply must be the very first line written.
        let ping = session.call(request(json!(7), "ping")).await;
        assert_eq!(ping["id"], 7);
        assert_eq!(ping["result"], json!({}));
    }

    #[tokio::test]
    async fn test_error_codes() {
        let mut session = Session::start(&[]);

        session.write_line("{not json").await;
        let malformed = session.next().await;
        assert_eq!(malformed["error"]["code"], -32700);
        assert!(malformed.get("id").is_none());

        let cases = [
            (request(json!(42), "resources/list"), -32601),
            (request(json!("abc"), "tools/call"), -32602),
            (tool_call(43, "visit_page", json!({})), -32601),
            (tool_call(44, "search", json!({ "max_results": 2 })), -32602),
        ];
        for (message, code) in cases {
            let id = message["id"].clone();
            let response = session.call(message).await;
            assert_eq!(response["id"], id);
            assert_eq!(response["error"]["code"], code, "{response}");
        }
    }

    #[tokio::test]
    async fn test_pending_requests_drain_on_eof() {
        let mut session = Session::start(&[]);

        session.send(request(json!(1), "ping")).await;
        session.stdin.take();

        assert_eq!(session.next().await["id"], 1);
        let status = timeout(READ_TIMEOUT, session.child.wait())
            .await
            .expect("server exits after EOF")
            .unwrap();
        assert!(status.success());
    }
}

mod tool_tests {
    use super::*;

    #[tokio::test]
    async fn test_search_renders_markdown() {
        let upstream = search_upstream(Duration::ZERO).await;
        let mut session = Session::with_search(&upstream);

        let response = session.call(search_call(100)).await;

        assert_eq!(response["result"]["isError"], false);
        let text = tool_text(&response);
        assert!(text.starts_with("# DuckDuckGo Search Results\n\nFound 1 results for: \"rust\""));
        assert!(text.contains("### Rust Programming Language\nA language empowering everyone."));
        assert!(text.contains("(https://www.rust-lang.org/)"));
    }

    #[tokio::test]
    async fn test_search_upstream_status_is_tool_error() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&upstream)
            .await;
        let mut session = Session::with_search(&upstream);

        let response = session.call(search_call(101)).await;

        assert!(response.get("error").is_none());
        assert_eq!(response["result"]["isError"], true);
        assert_eq!(
            tool_text(&response),
            "An error occurred while searching: status: 503"
        );
    }

    #[tokio::test]
    async fn test_fetch_content_returns_cleaned_text() {
        let page = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "<html><script>x</script><body>  Hello   World  </body></html>",
                "text/html",
            ))
            .mount(&page)
            .await;
        let mut session = Session::start(&[]);

        let url = format!("{}/page", page.uri());
        let response = session
            .call(tool_call(102, "fetch_content", json!({ "url": url })))
            .await;

        assert_eq!(response["result"]["isError"], false);
        assert_eq!(
            tool_text(&response),
            "Successfully fetched and parsed content (11 characters):\nHello World"
        );
    }

    #[tokio::test]
    async fn test_fetch_content_bad_url_is_tool_error() {
        let mut session = Session::start(&[]);

        let response = session
            .call(tool_call(103, "fetch_content", json!({ "url": "not-a-valid-url" })))
            .await;

        assert_eq!(response["result"]["isError"], true);
        assert!(tool_text(&response).starts_with("An error occurred while fetching content: Invalid URL"));
    }
}

mod scheduling_tests {
    use super::*;

    #[tokio::test]
    async fn test_slow_search_does_not_block_ping() {
        let upstream = search_upstream(Duration::from_secs(3)).await;
        let mut session = Session::with_search(&upstream);

        session.send(search_call(300)).await;
        let ping = session.call(request(json!(301), "ping")).await;
        assert_eq!(ping["id"], 301);

        let search = session.next().await;
        assert_eq!(search["id"], 300);
        assert_eq!(search["result"]["isError"], false);
    }

    #[tokio::test]
    async fn test_cancelled_request_gets_no_response() {
        let upstream = search_upstream(Duration::from_secs(3)).await;
        let mut session = Session::with_search(&upstream);

        session.send(search_call(400)).await;
        session
            .send(json!({
                "jsonrpc": "2.0",
                "method": "notifications/cancelled",
                "params": { "requestId": 400, "reason": "user" }
            }))
            .await;

        // Outlive the upstream delay; the ping must still be the first line.
        tokio::time::sleep(Duration::from_secs(4)).await;
        let ping = session.call(request(json!(401), "ping")).await;
        assert_eq!(ping["id"], 401);
    }
}

mod logging_tests {
    use super::*;

    #[tokio::test]
    async fn test_verbose_logs_stay_off_stdout() {
        let mut session = Session::start(&["--verbose"]);

        session.send(request(json!(1), "initialize")).await;
        let line = session.raw_line().await;
        assert!(!line.contains('\x1b'), "escape codes on stdout: {line:?}");
        let response: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(response["id"], 1);

        let log = timeout(READ_TIMEOUT, session.stderr.next_line())
            .await
            .expect("verbose mode logs to stderr")
            .unwrap();
        assert!(log.is_some());
    }

    #[tokio::test]
    async fn test_quiet_mode_still_answers() {
        let mut session = Session::start(&["--quiet"]);

        let response = session.call(request(json!(1), "ping")).await;
        assert_eq!(response["id"], 1);
    }
}
