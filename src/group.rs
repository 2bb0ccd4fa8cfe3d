//! Consumer group identities.
//!
//! A group is identified by a name plus an optional generation version.
//! Offsets are committed per `(topic, group, partition)`, so two versions of
//! the same group name track progress independently.

use tracing::warn;

/// Version number marking a [`GroupId`] as unversioned.
pub const UNVERSIONED: u32 = 0;

/// A consumer group identity `(name, version)`.
///
/// Version `0` means "unversioned". The legacy wire form `<name>-v<N>` is
/// parsed once on ingress by [`GroupId::resolve`]; the parsed form is the
/// only representation carried internally.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupId {
    name: String,
    version: u32,
}

impl GroupId {
    /// Build a group identity from already-canonical parts.
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Canonicalize a wire-level `(group, group_version)` pair.
    ///
    /// An explicit non-zero version wins. Otherwise the group string is
    /// checked for the legacy `<name>-v<N>` suffix form; a successful parse
    /// is logged as a warning since callers are expected to migrate to the
    /// explicit version field.
    pub fn resolve(group: &str, group_version: u32) -> Self {
        if group_version != UNVERSIONED {
            return Self::new(group, group_version);
        }

        match parse_legacy(group) {
            Some((name, version)) => {
                warn!(group, name, version, "parsed legacy versioned group name");
                Self { name, version }
            }
            None => Self::new(group, UNVERSIONED),
        }
    }

    /// The group name without any version suffix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The group generation, `0` if unversioned.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn is_versioned(&self) -> bool {
        self.version != UNVERSIONED
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_versioned() {
            write!(f, "{}-v{}", self.name, self.version)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// Parse the legacy `<name>-v<digits>` form with digits >= 1.
fn parse_legacy(group: &str) -> Option<(String, u32)> {
    let idx = group.rfind("-v")?;
    let (name, suffix) = group.split_at(idx);
    let digits = &suffix[2..];

    if name.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let version: u32 = digits.parse().ok()?;
    if version == UNVERSIONED {
        return None;
    }

    Some((name.to_string(), version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_explicit_version() {
        assert_eq!(GroupId::resolve("my-group", 7), GroupId::new("my-group", 7));

        // an explicit version suppresses legacy parsing entirely
        assert_eq!(
            GroupId::resolve("my-group-v3", 7),
            GroupId::new("my-group-v3", 7)
        );
    }

    #[test]
    fn resolve_legacy_suffix() {
        for (group, name, version) in [
            ("my-group-v3", "my-group", 3),
            ("a-v1", "a", 1),
            ("nested-v2-v4", "nested-v2", 4),
            ("g-v4294967295", "g", u32::MAX),
        ] {
            assert_eq!(GroupId::resolve(group, 0), GroupId::new(name, version));
        }
    }

    #[test]
    fn resolve_plain_names() {
        for group in [
            "plain",
            "x-v0",
            "x-v",
            "-v3",
            "x-vabc",
            "x-v1x",
            "g-v99999999999999999999",
        ] {
            assert_eq!(GroupId::resolve(group, 0), GroupId::new(group, 0));
        }
    }

    #[test]
    fn display_round_trips() {
        assert_eq!(GroupId::new("g", 0).to_string(), "g");
        assert_eq!(GroupId::new("g", 3).to_string(), "g-v3");
    }
}
