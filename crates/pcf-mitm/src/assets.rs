//! Sandboxed static file resolution
//!
//! All reads are bounded by the serving root: the canonicalized target must
//! be a proper descendant of the canonicalized root, which defends against
//! `..` traversal as well as symlink escapes.

use std::path::{Component, Path, PathBuf};

/// Cache-control header value attached to every successfully served asset.
pub const NO_STORE: &str = "no-cache, no-store, must-revalidate";

/// Resolution outcome for an asset path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetStatus {
  /// File found inside the sandbox
  Ok,
  /// File missing
  NotFound,
  /// Path escapes the serving root
  Forbidden,
}

/// A resolved asset: status, body bytes, and content type.
#[derive(Debug)]
pub struct ResolvedAsset {
  /// Resolution status
  pub status: AssetStatus,
  /// File contents (empty unless `status` is `Ok`)
  pub bytes: Vec<u8>,
  /// Content type for the response
  pub content_type: &'static str,
}

impl ResolvedAsset {
  fn not_found() -> Self {
    Self {
      status: AssetStatus::NotFound,
      bytes: Vec::new(),
      content_type: "text/plain",
    }
  }

  fn forbidden() -> Self {
    Self {
      status: AssetStatus::Forbidden,
      bytes: Vec::new(),
      content_type: "text/plain",
    }
  }
}

/// Resolves relative asset paths against a serving root.
#[derive(Debug, Clone)]
pub struct AssetResolver {
  root: PathBuf,
}

impl AssetResolver {
  /// Create a resolver rooted at the given serving directory.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// The configured serving root.
  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Resolve a relative asset path.
  ///
  /// Returns `Forbidden` when the canonicalized target is not a proper
  /// descendant of the canonicalized root, `NotFound` when the file is
  /// missing, and the file bytes otherwise. `.js` files with an existing
  /// `<file>.map` sibling get a `sourceMappingURL` hint appended so the
  /// browser loads source maps through the same interception path.
  pub async fn resolve(&self, relative: &str) -> ResolvedAsset {
    let root = match tokio::fs::canonicalize(&self.root).await {
      Ok(root) => root,
      Err(e) => {
        tracing::warn!("serving root {} is unreadable: {}", self.root.display(), e);
        return ResolvedAsset::not_found();
      }
    };

    let absolute = match tokio::fs::canonicalize(root.join(relative)).await {
      Ok(absolute) => absolute,
      // Canonicalization fails on missing files; a lexical walk still
      // distinguishes traversal attempts from plain 404s.
      Err(_) => {
        return if escapes_lexically(relative) {
          ResolvedAsset::forbidden()
        } else {
          ResolvedAsset::not_found()
        };
      }
    };

    if absolute == root || !absolute.starts_with(&root) {
      return ResolvedAsset::forbidden();
    }

    let mut bytes = match tokio::fs::read(&absolute).await {
      Ok(bytes) => bytes,
      Err(_) => return ResolvedAsset::not_found(),
    };

    let content_type = if relative.ends_with(".map") {
      "application/json"
    } else {
      "application/javascript"
    };

    if relative.ends_with(".js") {
      let sibling = PathBuf::from(format!("{}.map", absolute.display()));
      if tokio::fs::try_exists(&sibling).await.unwrap_or(false) {
        bytes.extend_from_slice(format!("\n//# sourceMappingURL={relative}.map\n").as_bytes());
      }
    }

    ResolvedAsset {
      status: AssetStatus::Ok,
      bytes,
      content_type,
    }
  }
}

/// Lexical sandbox check for paths that cannot be canonicalized: any walk
/// that leaves the root (or restarts from an absolute prefix) escapes.
fn escapes_lexically(relative: &str) -> bool {
  let mut depth: i64 = 0;
  for component in Path::new(relative).components() {
    match component {
      Component::ParentDir => {
        depth -= 1;
        if depth < 0 {
          return true;
        }
      }
      Component::Normal(_) => depth += 1,
      Component::CurDir => {}
      Component::RootDir | Component::Prefix(_) => return true,
    }
  }
  false
}

#[cfg(test)]
mod tests {
  use super::*;

  async fn scratch_root(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("pcf-mitm-assets-{name}"));
    if dir.exists() {
      tokio::fs::remove_dir_all(&dir).await.ok();
    }
    tokio::fs::create_dir_all(&dir).await.unwrap();
    dir
  }

  #[tokio::test]
  async fn serves_existing_file() {
    let root = scratch_root("ok").await;
    tokio::fs::write(root.join("bundle.js"), b"console.log(1);").await.unwrap();

    let resolved = AssetResolver::new(&root).resolve("bundle.js").await;
    assert_eq!(resolved.status, AssetStatus::Ok);
    assert_eq!(resolved.content_type, "application/javascript");
    assert_eq!(resolved.bytes, b"console.log(1);");
  }

  #[tokio::test]
  async fn missing_file_is_not_found() {
    let root = scratch_root("missing").await;
    let resolved = AssetResolver::new(&root).resolve("nope.js").await;
    assert_eq!(resolved.status, AssetStatus::NotFound);
  }

  #[tokio::test]
  async fn traversal_to_existing_file_is_forbidden() {
    let root = scratch_root("traversal-existing").await;
    tokio::fs::write(root.parent().unwrap().join("pcf-mitm-outside.txt"), b"secret")
      .await
      .unwrap();

    let resolved = AssetResolver::new(&root).resolve("../pcf-mitm-outside.txt").await;
    assert_eq!(resolved.status, AssetStatus::Forbidden);
  }

  #[tokio::test]
  async fn traversal_to_missing_file_is_forbidden() {
    let root = scratch_root("traversal-missing").await;
    let resolved = AssetResolver::new(&root).resolve("../../does/not/exist").await;
    assert_eq!(resolved.status, AssetStatus::Forbidden);
  }

  #[tokio::test]
  async fn absolute_paths_are_forbidden() {
    let root = scratch_root("absolute").await;
    let resolved = AssetResolver::new(&root).resolve("/etc/passwd").await;
    assert_eq!(resolved.status, AssetStatus::Forbidden);
  }

  #[tokio::test]
  async fn dotdot_inside_root_is_allowed() {
    let root = scratch_root("inside").await;
    tokio::fs::create_dir_all(root.join("sub")).await.unwrap();
    tokio::fs::write(root.join("bundle.js"), b"x").await.unwrap();

    let resolved = AssetResolver::new(&root).resolve("sub/../bundle.js").await;
    assert_eq!(resolved.status, AssetStatus::Ok);
  }

  #[tokio::test]
  async fn map_files_are_json() {
    let root = scratch_root("map").await;
    tokio::fs::write(root.join("bundle.js.map"), b"{}").await.unwrap();

    let resolved = AssetResolver::new(&root).resolve("bundle.js.map").await;
    assert_eq!(resolved.status, AssetStatus::Ok);
    assert_eq!(resolved.content_type, "application/json");
  }

  #[tokio::test]
  async fn source_map_hint_is_appended_when_sibling_exists() {
    let root = scratch_root("hint").await;
    tokio::fs::write(root.join("bundle.js"), b"var a=1;").await.unwrap();
    tokio::fs::write(root.join("bundle.js.map"), b"{}").await.unwrap();

    let resolved = AssetResolver::new(&root).resolve("bundle.js").await;
    let body = String::from_utf8(resolved.bytes).unwrap();
    assert!(body.starts_with("var a=1;"));
    assert!(body.ends_with("\n//# sourceMappingURL=bundle.js.map\n"));
  }

  #[tokio::test]
  async fn no_hint_without_sibling() {
    let root = scratch_root("no-hint").await;
    tokio::fs::write(root.join("bundle.js"), b"var a=1;").await.unwrap();

    let resolved = AssetResolver::new(&root).resolve("bundle.js").await;
    assert_eq!(resolved.bytes, b"var a=1;");
  }
}
