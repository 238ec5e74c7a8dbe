//! Scripted client scenarios, one per interaction the relay supports.

use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail, ensure};
use bytes::Bytes;
use clap::ValueEnum;
use rand::Rng;
use relay_client::{ClientOptions, RelayClient};
use relay_protocol::AttachmentBuilder;
use relay_server::events::handlers::{TEST_NAMESPACE, binary_ack_test};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::testdata::{Pattern, compare_binary_data, generate_test_binary_data};

/// How long a scenario waits for any single reply.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Acked `customEvent`s sent by the burst scenario.
const BURST_SIZE: usize = 10;

/// Gap between burst sends.
const BURST_GAP: Duration = Duration::from_millis(5);

/// A scenario selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Acked `chatMessage`, then its broadcast echo.
    Chat,
    /// Acked `customEvent`.
    Custom,
    /// Concurrent acked `customEvent`s.
    AckBurst,
    /// `binaryEvent` from one client, verified on a second one.
    Binary,
    /// `binaryAckTest` with random bytes.
    BinaryAck,
    /// `heartbeat` answered to the sender.
    Heartbeat,
    /// `testEvent` in the test namespace.
    TestEvent,
    /// Every scenario above, in order.
    All,
}

impl Scenario {
    /// Name as typed on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Custom => "custom",
            Self::AckBurst => "ack-burst",
            Self::Binary => "binary",
            Self::BinaryAck => "binary-ack",
            Self::Heartbeat => "heartbeat",
            Self::TestEvent => "test-event",
            Self::All => "all",
        }
    }

    /// The concrete scenarios this selection runs.
    pub fn expand(self) -> Vec<Self> {
        match self {
            Self::All => vec![
                Self::Chat,
                Self::Custom,
                Self::AckBurst,
                Self::Binary,
                Self::BinaryAck,
                Self::Heartbeat,
                Self::TestEvent,
            ],
            single => vec![single],
        }
    }
}

/// Result of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    /// Scenario name.
    pub name: &'static str,
    /// Whether every check held.
    pub passed: bool,
    /// Summary on success, error chain on failure.
    pub detail: String,
    /// Wall time in milliseconds.
    pub duration_ms: u64,
}

/// Runs scenarios against one server.
#[derive(Debug, Clone)]
pub struct Driver {
    url: String,
    namespace: String,
}

impl Driver {
    /// Driver for the server at `url`, joining `namespace` unless a scenario
    /// needs a specific one.
    pub fn new(url: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            namespace: namespace.into(),
        }
    }

    /// Run `scenario` (expanded) and report each part.
    pub async fn run(&self, scenario: Scenario) -> Vec<ScenarioReport> {
        let mut reports = Vec::new();
        for part in scenario.expand() {
            let start = Instant::now();
            let outcome = self.run_one(part).await;
            let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
            let report = match outcome {
                Ok(detail) => {
                    info!(scenario = part.name(), duration_ms, "scenario passed");
                    ScenarioReport {
                        name: part.name(),
                        passed: true,
                        detail,
                        duration_ms,
                    }
                }
                Err(e) => {
                    warn!(scenario = part.name(), error = %e, "scenario failed");
                    ScenarioReport {
                        name: part.name(),
                        passed: false,
                        detail: format!("{e:#}"),
                        duration_ms,
                    }
                }
            };
            reports.push(report);
        }
        reports
    }

    async fn run_one(&self, scenario: Scenario) -> Result<String> {
        match scenario {
            Scenario::Chat => self.chat().await,
            Scenario::Custom => self.custom().await,
            Scenario::AckBurst => self.ack_burst().await,
            Scenario::Binary => self.binary().await,
            Scenario::BinaryAck => self.binary_ack().await,
            Scenario::Heartbeat => self.heartbeat().await,
            Scenario::TestEvent => self.test_event().await,
            Scenario::All => bail!("'all' is not a single scenario"),
        }
    }

    async fn connect(&self, namespace: &str) -> Result<RelayClient> {
        RelayClient::connect(&self.url, namespace, ClientOptions::default())
            .await
            .with_context(|| format!("failed to join {namespace} at {}", self.url))
    }

    async fn chat(&self) -> Result<String> {
        let mut client = self.connect(&self.namespace).await?;
        let text = "Hello from relay harness";
        let ack = client
            .emit_with_ack("chatMessage", vec![json!({ "message": text })], &[])
            .await
            .context("chatMessage ack")?;
        let ack = first(ack.args)?;
        ensure!(ack["status"] == "received", "unexpected ack: {ack}");

        let me = client.socket_id();
        loop {
            let echo = client.wait_for("chatMessage", REPLY_TIMEOUT).await?;
            if echo.data()["sender"] == me.as_str() {
                ensure!(echo.data()["message"] == text, "echo differs: {}", echo.data());
                break;
            }
        }
        client.disconnect().await;
        Ok(format!("ack {ack}, echo received"))
    }

    async fn custom(&self) -> Result<String> {
        let client = self.connect(&self.namespace).await?;
        let payload = json!({
            "timestamp": relay_core::now_iso(),
            "random": rand::rng().random::<f64>(),
            "message": "Custom event from relay harness",
        });
        let ack = client
            .emit_with_ack("customEvent", vec![payload], &[])
            .await
            .context("customEvent ack")?;
        let ack = first(ack.args)?;
        ensure!(ack["success"] == true, "unexpected ack: {ack}");
        client.disconnect().await;
        Ok(format!("ack {ack}"))
    }

    async fn ack_burst(&self) -> Result<String> {
        let client = self.connect(&self.namespace).await?;
        let start = Instant::now();
        let calls = (0..BURST_SIZE).map(|i| {
            let client = &client;
            async move {
                tokio::time::sleep(BURST_GAP * u32::try_from(i).unwrap_or(u32::MAX)).await;
                let payload = json!({
                    "testIndex": i,
                    "message": format!("ACK Test {i}"),
                    "timestamp": chrono::Utc::now().timestamp_millis(),
                });
                client.emit_with_ack("customEvent", vec![payload], &[]).await
            }
        });
        let results = futures::future::join_all(calls).await;
        let succeeded = results
            .iter()
            .filter(|r| {
                r.as_ref()
                    .is_ok_and(|ack| ack.first().is_some_and(|a| a["success"] == true))
            })
            .count();
        let failed = BURST_SIZE - succeeded;
        let summary = format!(
            "Total {BURST_SIZE}, Success {succeeded}, Failed {failed}, Duration {:.2}s",
            start.elapsed().as_secs_f64()
        );
        client.disconnect().await;
        ensure!(failed == 0, "{summary}");
        Ok(summary)
    }

    async fn binary(&self) -> Result<String> {
        let sender = self.connect(&self.namespace).await?;
        let mut receiver = self.connect(&self.namespace).await?;
        let expected = generate_test_binary_data(1024, Pattern::Sequential);

        let mut builder = AttachmentBuilder::new();
        let payload = json!({
            "binaryData": builder.attach(expected.clone()),
            "text": "testData: binary payload from relay harness",
            "timestamp": chrono::Utc::now().timestamp_millis(),
        });
        let ack = sender
            .emit_with_ack("binaryEvent", vec![payload], &builder.into_parts())
            .await
            .context("binaryEvent ack")?;
        let ack = first(ack.args)?;
        ensure!(ack["success"] == true, "unexpected ack: {ack}");
        ensure!(ack["receivedSize"] == 1024, "server saw {} bytes", ack["receivedSize"]);

        let echo = receiver.wait_for("binaryEvent", REPLY_TIMEOUT).await?;
        let received = echo
            .binary(&echo.data()["binaryData"])
            .context("echo carried no binary attachment")?;
        let comparison = compare_binary_data(received, &expected);
        ensure!(comparison.is_match(), "{comparison}");

        sender.disconnect().await;
        receiver.disconnect().await;
        Ok(format!("{} bytes echoed, {comparison}", received.len()))
    }

    async fn binary_ack(&self) -> Result<String> {
        let client = self.connect(&self.namespace).await?;
        let data = Bytes::from(generate_test_binary_data(512, Pattern::Random));

        let mut builder = AttachmentBuilder::new();
        let placeholder = builder.attach(data.clone());
        let payload = json!({
            "binaryData": placeholder.clone(),
            "text": "Binary ACK test from relay harness",
            "timestamp": chrono::Utc::now().timestamp_millis(),
        });
        let ack = client
            .emit_with_ack("binaryAckTest", vec![payload], &builder.into_parts())
            .await
            .context("binaryAckTest ack")?;
        let ack = first(ack.args)?;
        ensure!(ack["result"] == "success", "unexpected ack: {ack}");
        ensure!(ack["receivedSize"] == 512, "server saw {} bytes", ack["receivedSize"]);

        let expected = binary_ack_test::checksum(Some(&placeholder), &[data]);
        ensure!(
            ack["checksum"] == expected.as_str(),
            "checksum {} != {expected}",
            ack["checksum"]
        );
        client.disconnect().await;
        Ok(format!("ack {ack}"))
    }

    async fn heartbeat(&self) -> Result<String> {
        let mut client = self.connect(&self.namespace).await?;
        client.emit("heartbeat", vec![json!({ "timestamp": relay_core::now_iso() })])?;
        let beat = client.wait_for("heartbeat", REPLY_TIMEOUT).await?;
        ensure!(beat.data()["received"] == true, "unexpected reply: {}", beat.data());
        client.disconnect().await;
        Ok(format!("reply {}", beat.data()))
    }

    async fn test_event(&self) -> Result<String> {
        let client = self.connect(TEST_NAMESPACE).await?;
        let ack = client
            .emit_with_ack("testEvent", vec![json!({ "from": "relay harness" })], &[])
            .await
            .context("testEvent ack")?;
        let ack = first(ack.args)?;
        ensure!(ack["testResult"] == "passed", "unexpected ack: {ack}");
        client.disconnect().await;
        Ok(format!("ack {ack}"))
    }
}

fn first(args: Vec<Value>) -> Result<Value> {
    args.into_iter().next().context("ack carried no arguments")
}
