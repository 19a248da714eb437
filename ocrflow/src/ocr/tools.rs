use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

pub const TESSERACT_PROG: &str = if cfg!(windows) {
    "tesseract.exe"
} else {
    "tesseract"
};

pub const IMAGEMAGICK_PROG: &str = if cfg!(windows) {
    "convert.exe"
} else {
    "convert"
};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Joins a configured tool directory and a program name. An empty directory
/// leaves the bare program name for `PATH` lookup.
pub fn resolve_tool(dir: &str, program: &str) -> String {
    if dir.trim().is_empty() {
        program.to_string()
    } else {
        Path::new(dir).join(program).to_string_lossy().into_owned()
    }
}

/// Decides whether an external tool is usable at a given path.
#[async_trait]
pub trait ToolProbe: Send + Sync {
    async fn probe(&self, program: &str) -> bool;
}

/// Runs `<program> --version` and treats any launch that is not a shell-style
/// "not found"/"not executable" exit as present.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandProbe;

#[async_trait]
impl ToolProbe for CommandProbe {
    async fn probe(&self, program: &str) -> bool {
        let child = Command::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                debug!(program, error = %e, "Tool probe could not launch");
                return false;
            }
        };

        match tokio::time::timeout(PROBE_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => !matches!(status.code(), Some(126) | Some(127)),
            Ok(Err(e)) => {
                debug!(program, error = %e, "Tool probe wait failed");
                false
            }
            Err(_) => {
                warn!(program, "Tool probe timed out");
                let _ = child.kill().await;
                false
            }
        }
    }
}

/// Memoized tool presence, keyed by the resolved executable path.
///
/// Each path is probed at most once for the lifetime of the cache; concurrent
/// callers for the same path wait on the same probe. Entries never expire, so
/// a tool installed or removed later is not noticed.
pub struct ToolAvailabilityCache {
    probe: Arc<dyn ToolProbe>,
    entries: Mutex<HashMap<String, Arc<OnceCell<bool>>>>,
}

impl ToolAvailabilityCache {
    pub fn new(probe: Arc<dyn ToolProbe>) -> Self {
        Self {
            probe,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn check_available(&self, program: &str) -> bool {
        let cell = {
            let mut entries = match self.entries.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(entries.entry(program.to_string()).or_default())
        };

        *cell
            .get_or_init(|| async {
                let available = self.probe.probe(program).await;
                if available {
                    info!(program, "External tool available");
                } else {
                    warn!(program, "External tool not available");
                }
                available
            })
            .await
    }
}

impl Default for ToolAvailabilityCache {
    fn default() -> Self {
        Self::new(Arc::new(CommandProbe))
    }
}

impl std::fmt::Debug for ToolAvailabilityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let known = self.entries.lock().map(|e| e.len()).unwrap_or_default();
        f.debug_struct("ToolAvailabilityCache")
            .field("known_paths", &known)
            .finish()
    }
}
