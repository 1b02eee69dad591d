use sha1::{Digest, Sha1};
use std::fmt;
use std::sync::Arc;

const ACQUIRE_SCRIPT: &str = r#"
  -- Return 0 if an entry already exists.
  for i, key in ipairs(KEYS) do
    if redis.call("exists", key) == 1 then
      return 0
    end
  end

  -- Create an entry for each provided key.
  for i, key in ipairs(KEYS) do
    redis.call("set", key, ARGV[1], "PX", ARGV[2])
  end

  -- Return the number of entries added.
  return #KEYS
"#;

const EXTEND_SCRIPT: &str = r#"
  -- Return 0 if an entry exists with a *different* lock value.
  for i, key in ipairs(KEYS) do
    if redis.call("get", key) ~= ARGV[1] then
      return 0
    end
  end

  -- Update the entry for each provided key.
  for i, key in ipairs(KEYS) do
    redis.call("set", key, ARGV[1], "PX", ARGV[2])
  end

  -- Return the number of entries updated.
  return #KEYS
"#;

const RELEASE_SCRIPT: &str = r#"
  local count = 0
  for i, key in ipairs(KEYS) do
    -- Only remove entries for *this* lock value.
    if redis.call("get", key) == ARGV[1] then
      redis.pcall("del", key)
      count = count + 1
    end
  end

  -- Return the number of entries removed.
  return count
"#;

/// The three atomic primitives a node must provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptKind {
    /// Set every key to the token with a TTL, only if none of them exist.
    Acquire,
    /// Refresh the TTL of every key, only if all of them hold the token.
    Extend,
    /// Delete each key that holds the token.
    Release,
}

impl ScriptKind {
    pub fn label(&self) -> &'static str {
        match self {
            ScriptKind::Acquire => "acquire",
            ScriptKind::Extend => "extend",
            ScriptKind::Release => "release",
        }
    }

    fn default_body(&self) -> &'static str {
        match self {
            ScriptKind::Acquire => ACQUIRE_SCRIPT,
            ScriptKind::Extend => EXTEND_SCRIPT,
            ScriptKind::Release => RELEASE_SCRIPT,
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A script body together with the SHA-1 digest nodes cache it under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    kind: ScriptKind,
    body: String,
    digest: String,
}

impl Script {
    pub fn new(kind: ScriptKind, body: impl Into<String>) -> Self {
        let body = body.into();
        let digest = digest_hex(&body);
        Self { kind, body, digest }
    }

    pub fn kind(&self) -> ScriptKind {
        self.kind
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// Scripts used by a coordinator. Shared read-only across all lock attempts.
#[derive(Debug, Clone)]
pub struct ScriptSet {
    acquire: Arc<Script>,
    extend: Arc<Script>,
    release: Arc<Script>,
}

impl ScriptSet {
    /// Builds a set whose bodies are rewritten by `modifier`.
    ///
    /// The modifier receives the built-in body and returns the body to use;
    /// digests are computed from the returned text.
    pub fn customized<F>(modifier: F) -> Self
    where
        F: Fn(ScriptKind, &str) -> String,
    {
        let build =
            |kind: ScriptKind| Arc::new(Script::new(kind, modifier(kind, kind.default_body())));
        Self {
            acquire: build(ScriptKind::Acquire),
            extend: build(ScriptKind::Extend),
            release: build(ScriptKind::Release),
        }
    }

    pub fn get(&self, kind: ScriptKind) -> &Arc<Script> {
        match kind {
            ScriptKind::Acquire => &self.acquire,
            ScriptKind::Extend => &self.extend,
            ScriptKind::Release => &self.release,
        }
    }
}

impl Default for ScriptSet {
    fn default() -> Self {
        Self::customized(|_, body| body.to_string())
    }
}

fn digest_hex(body: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_matches_sha1_hex() {
        // sha1("") is a well-known constant.
        assert_eq!(digest_hex(""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        let script = Script::new(ScriptKind::Release, "return 1");
        assert_eq!(script.digest().len(), 40);
        assert_eq!(script.digest(), digest_hex("return 1"));
    }

    #[test]
    fn default_set_uses_builtin_bodies() {
        let set = ScriptSet::default();
        assert!(set.get(ScriptKind::Acquire).body().contains("exists"));
        assert!(set.get(ScriptKind::Extend).body().contains("~= ARGV[1]"));
        assert!(set.get(ScriptKind::Release).body().contains("pcall(\"del\""));
        assert_ne!(
            set.get(ScriptKind::Acquire).digest(),
            set.get(ScriptKind::Release).digest()
        );
    }

    #[test]
    fn customized_set_recomputes_digest() {
        let default = ScriptSet::default();
        let custom = ScriptSet::customized(|kind, body| match kind {
            ScriptKind::Extend => format!("-- patched\n{body}"),
            _ => body.to_string(),
        });

        assert_eq!(
            custom.get(ScriptKind::Acquire).digest(),
            default.get(ScriptKind::Acquire).digest()
        );
        assert_ne!(
            custom.get(ScriptKind::Extend).digest(),
            default.get(ScriptKind::Extend).digest()
        );
        assert!(custom.get(ScriptKind::Extend).body().starts_with("-- patched"));
        assert_eq!(custom.get(ScriptKind::Extend).kind(), ScriptKind::Extend);
    }
}
