//! Reserved control phrases and UI artifact stripping

use serde::{Deserialize, Serialize};

/// UI chrome that leaks into extracted text ("show reasoning" toggles)
pub const DEFAULT_ARTIFACTS: &[&str] = &["Show thoughts", "显示思路"];

/// Literal phrases used for control-plane signalling inside message text.
/// All matches are exact and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyPhrases {
    /// Substring anywhere in a message ends the run
    pub termination: String,
    /// Prefix: reviewer approved, or executor forwarding that approval
    pub accept: String,
    /// Prefix: reviewer rejected the patch
    pub reject: String,
    /// Prefix: coordinator published a plan
    pub plan_created: String,
}

impl Default for SafetyPhrases {
    fn default() -> Self {
        Self {
            termination: "TASK_COMPLETED_SUCCESSFULLY".to_string(),
            accept: "PATCH_ACCEPT".to_string(),
            reject: "PATCH_REJECT".to_string(),
            plan_created: "PLAN_CREATED".to_string(),
        }
    }
}

impl SafetyPhrases {
    #[must_use]
    pub fn is_termination(&self, text: &str) -> bool {
        !self.termination.is_empty() && text.contains(&self.termination)
    }
}

/// Remove every artifact label and trim surrounding whitespace.
///
/// Removal repeats until no label remains, so `strip(strip(x)) == strip(x)`
/// even when deleting one label splices another together.
#[must_use]
pub fn strip_artifacts<S: AsRef<str>>(raw: &str, artifacts: &[S]) -> String {
    let mut text = raw.to_string();
    loop {
        let before = text.len();
        for artifact in artifacts {
            let artifact = artifact.as_ref();
            if !artifact.is_empty() {
                text = text.replace(artifact, "");
            }
        }
        if text.len() == before {
            break;
        }
    }
    text.trim().to_string()
}
