//! [`Container`] backed by Pebble's HTTP API on the container's unix socket.

use std::{path::PathBuf, process::Stdio, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{
    client::conn::http1,
    header::{CONTENT_TYPE, HOST},
    Method, Request, StatusCode,
};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::json;
use snafu::{ResultExt, Snafu};
use tokio::{io::AsyncWriteExt, net::UnixStream, process::Command};

use super::{Container, ExecOptions, ExecOutput, Layer};

const MULTIPART_BOUNDARY: &str = "pebble-push-boundary";
const CHANGE_WAIT_TIMEOUT: &str = "60s";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to connect to Pebble socket {socket:?}"))]
    Connect {
        source: std::io::Error,
        socket: PathBuf,
    },

    #[snafu(display("failed to establish HTTP connection with Pebble"))]
    Handshake { source: hyper::Error },

    #[snafu(display("failed to build Pebble request"))]
    BuildRequest { source: hyper::http::Error },

    #[snafu(display("failed to send Pebble request"))]
    SendRequest { source: hyper::Error },

    #[snafu(display("failed to read Pebble response"))]
    ReadBody { source: hyper::Error },

    #[snafu(display("failed to parse Pebble response"))]
    ParseResponse { source: serde_json::Error },

    #[snafu(display("failed to serialize Pebble layer"))]
    SerializeLayer { source: serde_yaml::Error },

    #[snafu(display("Pebble API responded with {status}: {message}"))]
    Api { status: u16, message: String },

    #[snafu(display("failed to {action} {path:?}: {message}"))]
    FileOperation {
        action: &'static str,
        path: String,
        message: String,
    },

    #[snafu(display("Pebble change {change} failed: {message}"))]
    ChangeFailed { change: String, message: String },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Snafu, Debug)]
pub enum ExecError {
    #[snafu(display("failed to spawn pebble exec"))]
    Spawn { source: std::io::Error },

    #[snafu(display("failed to pass stdin to the command"))]
    WriteStdin { source: std::io::Error },

    #[snafu(display("command exited with code {code}: {stderr}"))]
    Exited { code: i32, stderr: String },

    #[snafu(display("command was terminated by a signal: {stderr}"))]
    Terminated { stderr: String },

    #[snafu(display("command did not finish within {timeout:?}"))]
    Timeout { timeout: Duration },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    change: Option<String>,
}

#[derive(Deserialize)]
struct FileInfo {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct ServiceInfo {
    current: String,
}

#[derive(Deserialize)]
struct ChangeInfo {
    #[serde(default)]
    err: Option<String>,
}

pub struct PebbleClient {
    container: String,
    socket: PathBuf,
    pebble_binary: PathBuf,
}

impl PebbleClient {
    pub fn new(
        container: &str,
        socket: impl Into<PathBuf>,
        pebble_binary: impl Into<PathBuf>,
    ) -> Self {
        Self {
            container: container.to_string(),
            socket: socket.into(),
            pebble_binary: pebble_binary.into(),
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<Envelope> {
        let stream = UnixStream::connect(&self.socket)
            .await
            .with_context(|_| ConnectSnafu {
                socket: self.socket.clone(),
            })?;
        let (mut sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .context(HandshakeSnafu)?;
        tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::debug!(
                    error = &error as &dyn std::error::Error,
                    "Pebble connection closed with error"
                );
            }
        });

        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, "localhost")
            .header(CONTENT_TYPE, content_type)
            .body(Full::new(body))
            .context(BuildRequestSnafu)?;
        let response = sender.send_request(request).await.context(SendRequestSnafu)?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .context(ReadBodySnafu)?
            .to_bytes();
        parse_envelope(status, &body)
    }

    async fn get(&self, path: &str) -> Result<Envelope> {
        self.request(Method::GET, path, "application/json", Bytes::new())
            .await
    }

    async fn post_json(&self, path: &str, body: serde_json::Value) -> Result<Envelope> {
        self.request(
            Method::POST,
            path,
            "application/json",
            Bytes::from(body.to_string()),
        )
        .await
    }

    async fn wait_change(&self, change: &str) -> Result<()> {
        let envelope = self
            .get(&format!(
                "/v1/changes/{change}/wait?timeout={CHANGE_WAIT_TIMEOUT}"
            ))
            .await?;
        let info: ChangeInfo =
            serde_json::from_value(envelope.result).context(ParseResponseSnafu)?;
        match info.err {
            Some(message) if !message.is_empty() => ChangeFailedSnafu { change, message }.fail(),
            _ => Ok(()),
        }
    }
}

/// Turns a Pebble response into its envelope, surfacing error responses as [`Error::Api`].
fn parse_envelope(status: StatusCode, body: &[u8]) -> Result<Envelope> {
    let envelope: Envelope = serde_json::from_slice(body).context(ParseResponseSnafu)?;
    if status.is_success() {
        return Ok(envelope);
    }
    let message = envelope
        .result
        .get("message")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string();
    ApiSnafu {
        status: status.as_u16(),
        message,
    }
    .fail()
}

/// Pebble answers bulk file operations with one result per path, each optionally carrying an error.
fn check_file_results(action: &'static str, path: &str, result: &serde_json::Value) -> Result<()> {
    let failure = result
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|item| item.get("error"))
        .find_map(|error| error.get("message").and_then(serde_json::Value::as_str));
    match failure {
        Some(message) => FileOperationSnafu {
            action,
            path,
            message,
        }
        .fail(),
        None => Ok(()),
    }
}

fn push_body(path: &str, content: &[u8], make_dirs: bool) -> Bytes {
    let metadata = json!({
        "action": "write",
        "files": [{"path": path, "make-dirs": make_dirs, "permissions": "644"}],
    });
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(
        format!(
            "--{MULTIPART_BOUNDARY}\r\n\
             Content-Type: application/json\r\n\
             Content-Disposition: form-data; name=\"request\"\r\n\r\n\
             {metadata}\r\n\
             --{MULTIPART_BOUNDARY}\r\n\
             Content-Type: application/octet-stream\r\n\
             Content-Disposition: form-data; name=\"files\"; filename=\"{path}\"\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    Bytes::from(body)
}

fn exec_args(command: &[String], options: &ExecOptions) -> Vec<String> {
    let mut args = vec![
        "exec".to_string(),
        format!("--timeout={}s", options.timeout.as_secs()),
    ];
    if let Some(service) = &options.service_context {
        args.push(format!("--context={service}"));
    }
    args.extend(
        options
            .environment
            .iter()
            .map(|(key, value)| format!("--env={key}={value}")),
    );
    args.push("--".to_string());
    args.extend(command.iter().cloned());
    args
}

fn query(pairs: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

#[async_trait]
impl Container for PebbleClient {
    async fn can_connect(&self) -> bool {
        match self.get("/v1/system-info").await {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!(
                    container = %self.container,
                    error = &error as &dyn std::error::Error,
                    "cannot connect to Pebble"
                );
                false
            }
        }
    }

    async fn is_dir(&self, path: &str) -> Result<bool> {
        let query = query(&[("action", "list"), ("path", path), ("itself", "true")]);
        match self.get(&format!("/v1/files?{query}")).await {
            Ok(envelope) => {
                let files: Vec<FileInfo> =
                    serde_json::from_value(envelope.result).context(ParseResponseSnafu)?;
                Ok(files.first().is_some_and(|file| file.kind == "directory"))
            }
            Err(Error::Api { status: 404, .. }) => Ok(false),
            Err(error) => Err(error),
        }
    }

    async fn make_dir(&self, path: &str, make_parents: bool) -> Result<()> {
        let envelope = self
            .post_json(
                "/v1/files",
                json!({
                    "action": "make-dirs",
                    "dirs": [{"path": path, "make-parents": make_parents}],
                }),
            )
            .await?;
        check_file_results("create directory", path, &envelope.result)
    }

    async fn push(&self, path: &str, content: &[u8], make_dirs: bool) -> Result<()> {
        let envelope = self
            .request(
                Method::POST,
                "/v1/files",
                &format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
                push_body(path, content, make_dirs),
            )
            .await?;
        check_file_results("write", path, &envelope.result)
    }

    async fn remove_path(&self, path: &str) -> Result<()> {
        let envelope = self
            .post_json(
                "/v1/files",
                json!({"action": "remove", "paths": [{"path": path}]}),
            )
            .await?;
        check_file_results("remove", path, &envelope.result)
    }

    async fn add_layer(&self, label: &str, layer: &Layer, combine: bool) -> Result<()> {
        let layer = layer.to_yaml().context(SerializeLayerSnafu)?;
        self.post_json(
            "/v1/layers",
            json!({
                "action": "add",
                "label": label,
                "combine": combine,
                "format": "yaml",
                "layer": layer,
            }),
        )
        .await
        .map(drop)
    }

    async fn replan(&self) -> Result<()> {
        let envelope = self
            .post_json("/v1/services", json!({"action": "replan", "services": []}))
            .await?;
        match envelope.change {
            Some(change) => self.wait_change(&change).await,
            None => Ok(()),
        }
    }

    async fn service_is_running(&self, service: &str) -> Result<bool> {
        let envelope = self
            .get(&format!("/v1/services?{}", query(&[("names", service)])))
            .await?;
        let services: Vec<ServiceInfo> =
            serde_json::from_value(envelope.result).context(ParseResponseSnafu)?;
        Ok(services.first().is_some_and(|info| info.current == "active"))
    }

    async fn exec(
        &self,
        command: &[String],
        options: &ExecOptions,
    ) -> Result<ExecOutput, ExecError> {
        let mut child = Command::new(&self.pebble_binary)
            .env("PEBBLE_SOCKET", &self.socket)
            .args(exec_args(command, options))
            .stdin(if options.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(SpawnSnafu)?;
        if let (Some(input), Some(mut pipe)) = (&options.stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .context(WriteStdinSnafu)?;
        }

        // pebble enforces the timeout itself, this only guards against a hung client
        let deadline = options.timeout + Duration::from_secs(5);
        let output = tokio::time::timeout(deadline, child.wait_with_output())
            .await
            .map_err(|_| ExecError::Timeout {
                timeout: options.timeout,
            })?
            .context(SpawnSnafu)?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        match output.status.code() {
            Some(0) => Ok(ExecOutput { stdout, stderr }),
            Some(code) => ExitedSnafu { code, stderr }.fail(),
            None => TerminatedSnafu { stderr }.fail(),
        }
    }
}
