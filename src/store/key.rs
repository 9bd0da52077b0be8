//! Counter key generation and handling.

/// What kind of identifier a key is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Email,
    Ip,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Email => "email",
            Scope::Ip => "ip",
        }
    }
}

/// Which entity namespace a key lives in.
///
/// The same `CounterKey` can address a window counter, a distinct set and a
/// ban at once; the kind keeps them apart in the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Window,
    Distinct,
    Ban,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Window => "window",
            EntryKind::Distinct => "distinct",
            EntryKind::Ban => "ban",
        }
    }
}

/// A key that identifies one tracked entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// Whether `identifier` is an email or an IP
    pub scope: Scope,
    /// The protected action
    pub action: String,
    /// The email address or IP string
    pub identifier: String,
}

impl CounterKey {
    /// Create a new counter key.
    pub fn new(scope: Scope, action: &str, identifier: &str) -> Self {
        Self {
            scope,
            action: action.to_string(),
            identifier: identifier.to_string(),
        }
    }

    /// Key for per-email counters.
    pub fn email(action: &str, email: &str) -> Self {
        Self::new(Scope::Email, action, email)
    }

    /// Key for per-IP sets and bans.
    pub fn ip(action: &str, ip: &str) -> Self {
        Self::new(Scope::Ip, action, ip)
    }

    /// Convert to a backing-store key string.
    /// Format: "{prefix}|{kind}|{scope}|{len}:{action}|{len}:{identifier}"
    ///
    /// Action and identifier are length-prefixed since either may contain `|`.
    pub fn to_store_key(&self, prefix: &str, kind: EntryKind) -> String {
        format!(
            "{}|{}|{}|{}:{}|{}:{}",
            prefix,
            kind.as_str(),
            self.scope.as_str(),
            self.action.len(),
            self.action,
            self.identifier.len(),
            self.identifier
        )
    }
}

impl std::fmt::Display for CounterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}={}", self.action, self.scope.as_str(), self.identifier)
    }
}
