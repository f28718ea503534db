// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Workspace argument resolution.
//!
//! Most commands take a single optional argument naming the workspace to act
//! on. The argument is interpreted by shape:
//!
//! 1. Nothing at all means the current working directory.
//! 2. Anything with a path separator is a path, made absolute.
//! 3. Anything with a `:` is a `spec:tag` reference (or `spec@sha256:...`).
//! 4. Anything else is looked up in the index: a global workspace by that
//!    name, then a local one, then a registered server whose reference is the
//!    next argument.

use crate::{
    error::{Error, Result},
    store::{Index, Workspace},
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Component, Path, PathBuf, MAIN_SEPARATOR},
    str::FromStr,
};

/// Tag part of a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    /// Human version name.
    Name(String),

    /// OCI digest, forwarded as-is to whoever pulls it.
    Digest(String),
}

impl Display for Tag {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Name(name) => write!(fmt, ":{name}"),
            Self::Digest(digest) => write!(fmt, "@{digest}"),
        }
    }
}

/// Reference to a specific version of a spec, e.g., `data-science:v1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub spec: String,
    pub tag: Tag,
}

impl Reference {
    /// Version name, if the reference is not a digest reference.
    pub fn tag_name(&self) -> Option<&str> {
        match &self.tag {
            Tag::Name(name) => Some(name),
            Tag::Digest(_) => None,
        }
    }
}

impl Display for Reference {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}{}", self.spec, self.tag)
    }
}

impl FromStr for Reference {
    type Err = Error;

    /// Parse `spec:tag` or `spec@sha256:<hex>`.
    ///
    /// The tag is split at the __last__ `:`, so `spec:a:b` yields spec `spec:a`
    /// and tag `b`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| Error::malformed(format!("reference {value:?}"), reason);

        if let Some((spec, digest)) = value.split_once('@') {
            if spec.is_empty() {
                return Err(malformed("missing spec name"));
            }
            if !digest.starts_with("sha256:") || digest.len() == "sha256:".len() {
                return Err(malformed("digest references must look like @sha256:<hex>"));
            }

            return Ok(Self {
                spec: spec.to_string(),
                tag: Tag::Digest(digest.to_string()),
            });
        }

        let (spec, tag) = value
            .rsplit_once(':')
            .ok_or_else(|| malformed("expected spec:tag"))?;
        if spec.is_empty() {
            return Err(malformed("missing spec name"));
        }
        if tag.is_empty() {
            return Err(malformed("missing tag"));
        }

        Ok(Self {
            spec: spec.to_string(),
            tag: Tag::Name(tag.to_string()),
        })
    }
}

/// What a user-supplied argument resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Current working directory.
    Cwd(PathBuf),

    /// Explicit path, made absolute.
    Path(PathBuf),

    /// Workspace tracked under the given name.
    Tracked(Workspace),

    /// `spec:tag` reference.
    Reference(Reference),

    /// Reference on a registered server named by short name.
    Server { url: String, reference: Reference },
}

/// Kind of a resolved argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Cwd,
    Path,
    TrackedName,
    TagRef,
}

/// Resolved argument plus the arguments it did not consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub target: Target,
    pub rest: Vec<String>,
}

impl Resolution {
    pub fn kind(&self) -> TargetKind {
        match self.target {
            Target::Cwd(_) => TargetKind::Cwd,
            Target::Path(_) => TargetKind::Path,
            Target::Tracked(_) => TargetKind::TrackedName,
            Target::Reference(_) | Target::Server { .. } => TargetKind::TagRef,
        }
    }

    /// Local directory the argument designates, if any.
    pub fn dir(&self) -> Option<&Path> {
        match &self.target {
            Target::Cwd(path) | Target::Path(path) => Some(path),
            Target::Tracked(workspace) => Some(&workspace.path),
            Target::Reference(_) | Target::Server { .. } => None,
        }
    }
}

/// Resolve user-supplied argument against the index.
///
/// `rest` holds the arguments following `arg`; a server short name consumes
/// the first of them as its reference.
///
/// # Errors
///
/// - Return [`Error::Malformed`] if a reference cannot be parsed.
/// - Return [`Error::NotFound`] if a bare name matches nothing.
pub fn resolve(arg: Option<&str>, rest: &[String], index: &Index, cwd: &Path) -> Result<Resolution> {
    let rest = rest.to_vec();
    let arg = match arg {
        None | Some("") => {
            return Ok(Resolution {
                target: Target::Cwd(cwd.to_path_buf()),
                rest,
            })
        }
        Some(arg) => arg,
    };

    if is_path_like(arg) {
        return Ok(Resolution {
            target: Target::Path(absolutize(cwd, arg)),
            rest,
        });
    }

    if arg.contains(':') {
        return Ok(Resolution {
            target: Target::Reference(arg.parse()?),
            rest,
        });
    }

    if let Some(workspace) = index.find_by_name(arg) {
        return Ok(Resolution {
            target: Target::Tracked(workspace.clone()),
            rest,
        });
    }

    if let Some(url) = index.servers.get(arg) {
        let mut rest = rest.into_iter();
        let reference = rest
            .next()
            .ok_or_else(|| {
                Error::malformed(
                    format!("arguments for server {arg:?}"),
                    "expected a spec:tag reference after the server name",
                )
            })?
            .parse()?;

        return Ok(Resolution {
            target: Target::Server {
                url: url.clone(),
                reference,
            },
            rest: rest.collect(),
        });
    }

    Err(Error::not_found("workspace", arg))
}

/// Check that a name proposed for creation is usable.
///
/// # Errors
///
/// - Return [`Error::Malformed`] if the name is empty, or contains a path
///   separator or a `:`.
pub fn validate_name(name: &str) -> Result<()> {
    let malformed = |reason: &str| Error::malformed(format!("name {name:?}"), reason);

    if name.is_empty() {
        return Err(malformed("name must not be empty"));
    }

    if name.contains(['/', '\\']) {
        return Err(malformed("name must not contain path separators"));
    }

    if name.contains(':') {
        return Err(malformed("name must not contain ':'"));
    }

    Ok(())
}

fn is_path_like(arg: &str) -> bool {
    arg == "." || arg == ".." || arg.contains('/') || arg.contains(MAIN_SEPARATOR)
}

/// Join path onto base and normalize `.` and `..` components lexically.
pub fn absolutize(base: &Path, path: impl AsRef<Path>) -> PathBuf {
    let joined = base.join(path.as_ref());
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ErrorKind, store::WorkspaceKind};
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    fn index() -> Index {
        let mut index = Index::new();
        index
            .add_workspace(Workspace::new(
                "data-science",
                "/home/u/projects/data-science",
                WorkspaceKind::Local,
            ))
            .unwrap();
        index
            .add_workspace(Workspace::new(
                "data-science",
                "/data/nebi/envs/0b5d6f2c",
                WorkspaceKind::Global,
            ))
            .unwrap();
        index
            .add_workspace(Workspace::new("web", "/home/u/web", WorkspaceKind::Local))
            .unwrap();
        index.add_server("work", "https://nebi.example.org").unwrap();
        index
    }

    #[test]
    fn empty_argument_is_cwd() {
        let result = resolve(None, &[], &index(), Path::new("/home/u")).unwrap();
        assert_eq!(result.kind(), TargetKind::Cwd);
        assert_eq!(result.dir(), Some(Path::new("/home/u")));

        let result = resolve(Some(""), &[], &index(), Path::new("/home/u")).unwrap();
        assert_eq!(result.kind(), TargetKind::Cwd);
    }

    #[test]
    fn global_name_wins_over_local_name() {
        let result = resolve(Some("data-science"), &[], &index(), Path::new("/home/u")).unwrap();
        assert_eq!(result.kind(), TargetKind::TrackedName);
        assert_eq!(result.dir(), Some(Path::new("/data/nebi/envs/0b5d6f2c")));
    }

    #[test]
    fn explicit_path_ignores_names() {
        let result = resolve(
            Some("./data-science"),
            &[],
            &index(),
            Path::new("/home/u/projects"),
        )
        .unwrap();
        assert_eq!(result.kind(), TargetKind::Path);
        assert_eq!(result.dir(), Some(Path::new("/home/u/projects/data-science")));
    }

    #[test]
    fn local_name_resolves_to_its_path() {
        let result = resolve(Some("web"), &[], &index(), Path::new("/tmp")).unwrap();
        assert_eq!(result.dir(), Some(Path::new("/home/u/web")));
    }

    #[test]
    fn tag_reference_splits_at_last_colon() {
        let result = resolve(Some("spec:a:b"), &[], &index(), Path::new("/")).unwrap();
        assert_eq!(
            result.target,
            Target::Reference(Reference {
                spec: "spec:a".into(),
                tag: Tag::Name("b".into()),
            })
        );
    }

    #[test]
    fn digest_reference_splits_at_at_sign() {
        let reference: Reference = "ds@sha256:abc123".parse().unwrap();
        assert_eq!(reference.spec, "ds");
        assert_eq!(reference.tag, Tag::Digest("sha256:abc123".into()));
        assert_eq!(reference.tag_name(), None);
        assert_eq!(reference.to_string(), "ds@sha256:abc123");
    }

    #[test]
    fn server_name_consumes_next_argument() {
        let rest = vec!["data-science:v2".to_string(), "extra".to_string()];
        let result = resolve(Some("work"), &rest, &index(), Path::new("/")).unwrap();

        assert_eq!(
            result.target,
            Target::Server {
                url: "https://nebi.example.org".into(),
                reference: "data-science:v2".parse().unwrap(),
            }
        );
        assert_eq!(result.rest, vec!["extra".to_string()]);

        let err = resolve(Some("work"), &[], &index(), Path::new("/")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[test]
    fn unknown_name_is_not_found() {
        let err = resolve(Some("nope"), &[], &index(), Path::new("/")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test_case("spec:", ErrorKind::Malformed; "missing tag")]
    #[test_case(":tag", ErrorKind::Malformed; "missing spec")]
    #[test_case("@sha256:abc", ErrorKind::Malformed; "digest without spec")]
    #[test_case("spec@md5:abc", ErrorKind::Malformed; "unsupported digest")]
    #[test]
    fn bad_references(value: &str, expect: ErrorKind) {
        std::assert_eq!(value.parse::<Reference>().unwrap_err().kind(), expect);
    }

    #[test_case("foo", true; "plain")]
    #[test_case("data-science_2", true; "punctuation")]
    #[test_case("", false; "empty")]
    #[test_case("foo/bar", false; "slash")]
    #[test_case("foo\\bar", false; "backslash")]
    #[test_case("foo:bar", false; "colon")]
    #[test]
    fn name_validation(name: &str, valid: bool) {
        std::assert_eq!(validate_name(name).is_ok(), valid);
        if !valid {
            std::assert_eq!(validate_name(name).unwrap_err().kind(), ErrorKind::Malformed);
        }
    }

    #[test]
    fn absolutize_normalizes_dots() {
        assert_eq!(
            absolutize(Path::new("/a/b"), "../c/./d"),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(absolutize(Path::new("/a"), "/abs"), PathBuf::from("/abs"));
    }
}
