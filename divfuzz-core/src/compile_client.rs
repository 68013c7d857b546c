use crate::error::{FuzzError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct CompileRequest<'a> {
    #[serde(rename = "sourcePath")]
    source_path: &'a str,
}

#[derive(Deserialize)]
struct CompileResponse {
    success: bool,
    #[serde(default)]
    message: String,
    #[serde(rename = "classPath", default)]
    class_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompileOutcome {
    pub success: bool,
    pub message: String,
    pub class_path: Option<String>,
}

/// Capability boundary around the out-of-process compile service: everything above this trait
/// talks in terms of source files and compiled class paths, never HTTP.
pub trait CompileClient: Send + Sync {
    fn compile(&self, source_path: &Path) -> Result<CompileOutcome>;
}

/// `reqwest`-blocking implementation that POSTs a source path to a long-lived compile service and
/// reuses the underlying connection pool across calls.
pub struct HttpCompileClient {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpCompileClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/compile", base_url.into().trim_end_matches('/')),
        })
    }
}

impl CompileClient for HttpCompileClient {
    fn compile(&self, source_path: &Path) -> Result<CompileOutcome> {
        let source_path = source_path.to_str().ok_or_else(|| {
            FuzzError::InvalidInput(format!("non-UTF8 source path: {source_path:?}"))
        })?;

        let response = self
            .client
            .post(&self.endpoint)
            .json(&CompileRequest { source_path })
            .send()?;

        if !response.status().is_success() {
            return Err(FuzzError::CompileFailed(format!(
                "compile service returned status {}",
                response.status()
            )));
        }

        let body: CompileResponse = response.json()?;
        Ok(CompileOutcome {
            success: body.success,
            message: body.message,
            class_path: body.class_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_utf8_path_is_rejected_before_any_request() {
        #[cfg(unix)]
        {
            use std::ffi::OsStr;
            use std::os::unix::ffi::OsStrExt;
            let bad = OsStr::from_bytes(&[0x66, 0x6f, 0x80, 0x6f]);
            let client = HttpCompileClient::new("http://127.0.0.1:1").unwrap();
            let err = client.compile(Path::new(bad)).unwrap_err();
            assert!(matches!(err, FuzzError::InvalidInput(_)));
        }
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        let client = HttpCompileClient::new("http://localhost:9999/").unwrap();
        assert_eq!(client.endpoint, "http://localhost:9999/compile");
    }
}
