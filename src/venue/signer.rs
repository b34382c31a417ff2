// =============================================================================
// Signed-operation adapter — subprocess signer
// =============================================================================
//
// The engine never signs venue requests itself. All signed operations are
// delegated to a signer executable that accepts subcommands
//
//   balance | positions | orderbook COIN DEPTH
//   | order COIN SIDE SIZE (market | limit PRICE)
//   | trigger COIN SIDE SIZE (sl | tp) PRICE
//   | cancel COIN OID | cancel_all [COIN] | open_orders | close_all
//
// and prints a single line of JSON:
//
//   { "status": "ok",  "data": ... }
//   { "status": "err", "code": N, "msg": "..." }
//
// Operations are serialized per agent key so concurrent analysis loops never
// interleave nonces for the same agent. A native SDK implementation can
// replace the subprocess behind the same trait.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::types::AgentCredential;

use super::error::{VenueError, VenueResult};

/// Executes one signed venue operation. `args` is the subcommand followed by
/// its operands; agent-key arguments are prefixed by the implementation.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn run(&self, agent: Option<&AgentCredential>, args: &[String]) -> VenueResult<Value>;
}

/// Production signer shelling out to the configured executable.
pub struct SubprocessSigner {
    program: String,
    /// One lock per agent key; the empty key covers the default credentials.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SubprocessSigner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, agent: Option<&AgentCredential>) -> Arc<tokio::sync::Mutex<()>> {
        let key = agent.map(|a| a.agent_address.clone()).unwrap_or_default();
        self.locks.lock().entry(key).or_default().clone()
    }
}

#[async_trait]
impl Signer for SubprocessSigner {
    async fn run(&self, agent: Option<&AgentCredential>, args: &[String]) -> VenueResult<Value> {
        let guard = self.lock_for(agent);
        let _serialized = guard.lock().await;

        let mut cmd = Command::new(&self.program);
        if let Some(agent) = agent {
            cmd.arg("--agent-key").arg(&agent.agent_key);
            cmd.arg("--agent-address").arg(&agent.agent_address);
        }
        cmd.args(args);
        cmd.kill_on_drop(true);

        debug!(subcommand = args.first().map(String::as_str).unwrap_or(""), "signer invoked");

        let output = tokio::time::timeout(std::time::Duration::from_secs(30), cmd.output())
            .await
            .map_err(|_| VenueError::Timeout)?
            .map_err(|e| VenueError::Transport(format!("signer spawn failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = ?output.status.code(), "signer exited nonzero");
            return Err(VenueError::Transport(format!(
                "signer exit {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .next()
            .ok_or_else(|| VenueError::InvalidResponse("empty signer output".into()))?;

        let body: Value = serde_json::from_str(line)
            .map_err(|e| VenueError::InvalidResponse(format!("signer output: {e}")))?;

        classify_response(body)
    }
}

impl std::fmt::Debug for SubprocessSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubprocessSigner")
            .field("program", &self.program)
            .finish()
    }
}

/// Map the signer's status envelope onto the venue error taxonomy.
fn classify_response(body: Value) -> VenueResult<Value> {
    match body["status"].as_str() {
        Some("ok") => Ok(body["data"].clone()),
        Some("err") => {
            let code = body["code"].as_i64().unwrap_or(0);
            let msg = body["msg"].as_str().unwrap_or("unknown").to_string();
            Err(match code {
                401 | 403 => VenueError::Unauthorized(msg),
                429 => VenueError::RateLimited,
                _ => VenueError::Venue { code, msg },
            })
        }
        _ => Err(VenueError::InvalidResponse(
            "signer output missing status".into(),
        )),
    }
}

// =============================================================================
// Scripted mock for tests
// =============================================================================
#[cfg(test)]
pub mod mock {
    use std::collections::{HashMap, VecDeque};

    use super::*;

    /// Test signer returning scripted responses per subcommand, recording
    /// every invocation.
    #[derive(Default)]
    pub struct MockSigner {
        responses: Mutex<HashMap<String, VecDeque<VenueResult<Value>>>>,
        pub calls: Mutex<Vec<Vec<String>>>,
    }

    impl MockSigner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue `result` for the next invocation of `subcommand`.
        pub fn script(&self, subcommand: &str, result: VenueResult<Value>) {
            self.responses
                .lock()
                .entry(subcommand.to_string())
                .or_default()
                .push_back(result);
        }

        /// How many times `subcommand` has been invoked.
        pub fn call_count(&self, subcommand: &str) -> usize {
            self.calls
                .lock()
                .iter()
                .filter(|args| args.first().map(String::as_str) == Some(subcommand))
                .count()
        }
    }

    #[async_trait]
    impl Signer for MockSigner {
        async fn run(
            &self,
            _agent: Option<&AgentCredential>,
            args: &[String],
        ) -> VenueResult<Value> {
            self.calls.lock().push(args.to_vec());
            let sub = args.first().cloned().unwrap_or_default();
            if let Some(queue) = self.responses.lock().get_mut(&sub) {
                if let Some(result) = queue.pop_front() {
                    return result;
                }
            }
            Ok(Value::Null)
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_ok_unwraps_data() {
        let data = classify_response(json!({ "status": "ok", "data": { "px": "1.5" } })).unwrap();
        assert_eq!(data["px"], "1.5");
    }

    #[test]
    fn classify_error_codes() {
        assert!(matches!(
            classify_response(json!({ "status": "err", "code": 401, "msg": "bad key" })),
            Err(VenueError::Unauthorized(_))
        ));
        assert!(matches!(
            classify_response(json!({ "status": "err", "code": 429, "msg": "slow down" })),
            Err(VenueError::RateLimited)
        ));
        assert!(matches!(
            classify_response(json!({ "status": "err", "code": 7, "msg": "bad order" })),
            Err(VenueError::Venue { code: 7, .. })
        ));
    }

    #[test]
    fn classify_rejects_missing_status() {
        assert!(matches!(
            classify_response(json!({ "px": "1.5" })),
            Err(VenueError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn mock_signer_scripts_and_records() {
        use mock::MockSigner;

        let signer = MockSigner::new();
        signer.script("balance", Ok(json!({ "accountValue": "1000" })));

        let out = signer
            .run(None, &["balance".to_string()])
            .await
            .unwrap();
        assert_eq!(out["accountValue"], "1000");
        assert_eq!(signer.call_count("balance"), 1);

        // Unscripted calls return null, not an error.
        let out = signer.run(None, &["positions".to_string()]).await.unwrap();
        assert!(out.is_null());
    }
}
