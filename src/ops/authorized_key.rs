//! Authorized-key operation: manages individual entries in a user's
//! `~/.ssh/authorized_keys`.

use std::path::PathBuf;

use base64::Engine as _;

use super::{ActionResult, Operation, SpecExt};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::plan::{ActionData, Host};

const OP: &str = "authorized_key";

struct UserRecord {
    home: PathBuf,
    uid: u32,
    gid: u32,
}

fn get_user(name: &str) -> Result<UserRecord> {
    let entry = nix::unistd::User::from_name(name)
        .map_err(|e| Error::operation_execution(OP, format!("user lookup failed: {e}")))?
        .ok_or_else(|| Error::operation_execution(OP, format!("user '{name}' does not exist")))?;
    Ok(UserRecord {
        home: entry.dir,
        uid: entry.uid.as_raw(),
        gid: entry.gid.as_raw(),
    })
}

/// Keys are accepted either verbatim (`ssh-...`) or base64-wrapped, which is
/// how they often travel through inventory pipelines.
fn normalize_key(raw: &str) -> String {
    let text = raw.trim();
    if text.starts_with("ssh-") {
        return text.to_string();
    }
    if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(text) {
        if let Ok(inner) = String::from_utf8(decoded) {
            let inner = inner.trim();
            if !inner.is_empty() {
                return inner.to_string();
            }
        }
    }
    text.to_string()
}

/// Splits an authorized_keys file into unique, trimmed, non-empty lines.
fn split_keys(content: &str) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || seen.iter().any(|k| k == line) {
            continue;
        }
        seen.push(line.to_string());
    }
    seen
}

pub struct AuthorizedKeyOperation {
    user: String,
    key: String,
    present: bool,
}

impl AuthorizedKeyOperation {
    pub fn from_spec(spec: &ActionData) -> Result<Self> {
        let user = spec.require_str(OP, "user")?;
        let key = normalize_key(&spec.require_str(OP, "key")?);
        let present = match spec.get_str("state").as_deref() {
            None | Some("present") => true,
            Some("absent") => false,
            Some(other) => {
                return Err(Error::operation_args(
                    OP,
                    format!("state must be 'present' or 'absent', got '{other}'"),
                ))
            }
        };
        Ok(Self { user, key, present })
    }
}

impl Operation for AuthorizedKeyOperation {
    fn apply(&self, host: &Host, executor: &dyn Executor) -> Result<ActionResult> {
        let record = get_user(&self.user)?;
        let ssh_dir = record.home.join(".ssh");
        let auth_file = ssh_dir.join("authorized_keys");

        let existing = executor.read_file(&auth_file)?.unwrap_or_default();
        let mut keys = split_keys(&existing);

        let (changed, detail) = if self.present {
            if keys.iter().any(|k| k == &self.key) {
                (false, "noop")
            } else {
                keys.push(self.key.clone());
                (true, "added")
            }
        } else {
            let before = keys.len();
            keys.retain(|k| k != &self.key);
            if keys.len() == before {
                (false, "noop")
            } else {
                (true, "removed")
            }
        };

        if changed && !executor.dry_run() {
            let content = if keys.is_empty() {
                String::new()
            } else {
                keys.join("\n") + "\n"
            };
            executor.write_file(&auth_file, &content, Some(0o600))?;
            executor.set_ownership(&auth_file, Some(record.uid), Some(record.gid))?;
            executor.ensure_directory(&ssh_dir, Some(0o700))?;
            executor.set_ownership(&ssh_dir, Some(record.uid), Some(record.gid))?;
        }
        Ok(ActionResult::from_change(&host.name, OP, changed, detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(value: serde_json::Value) -> ActionData {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn requires_user_and_key() {
        assert!(AuthorizedKeyOperation::from_spec(&spec(json!({"user": "deploy"}))).is_err());
        assert!(AuthorizedKeyOperation::from_spec(&spec(json!({"key": "ssh-ed25519 AAA"})))
            .is_err());
    }

    #[test]
    fn normalizes_base64_wrapped_keys() {
        let plain = "ssh-ed25519 AAAAC3Nza comment";
        assert_eq!(normalize_key(plain), plain);
        assert_eq!(normalize_key("  ssh-rsa AAAB  "), "ssh-rsa AAAB");

        let wrapped = base64::engine::general_purpose::STANDARD.encode(plain);
        assert_eq!(normalize_key(&wrapped), plain);

        // Not valid base64: taken verbatim.
        assert_eq!(normalize_key("not base64!"), "not base64!");
    }

    #[test]
    fn split_keys_dedupes_and_trims() {
        let content = "ssh-rsa AAA\n\n  ssh-rsa AAA  \nssh-ed25519 BBB\n";
        assert_eq!(split_keys(content), vec!["ssh-rsa AAA", "ssh-ed25519 BBB"]);
    }

    #[test]
    fn unknown_user_fails_at_apply() {
        let op = AuthorizedKeyOperation::from_spec(&spec(json!({
            "user": "no-such-user-zz",
            "key": "ssh-ed25519 AAA",
        })))
        .unwrap();
        let err = op
            .apply(
                &Host::new("local"),
                &crate::executor::LocalExecutor::new(true),
            )
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
