//! File-based KEK resolver for `CareVault`.
//!
//! Each KEK path names a key file inside one key directory. Suitable for
//! development, tests and single-host deployments; production setups
//! should prefer a KMS-backed resolver.

#![warn(clippy::pedantic, clippy::nursery)]

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use carevault::domain::{Domain, KekPaths};
use carevault::error::KeyProviderError;
use carevault::kek::KekResolver;
use rand::{rngs::OsRng, RngCore};
use secrecy::SecretVec;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Size of a KEK in bytes.
pub const KEK_SIZE: usize = 32;

/// File-based KEK resolver.
///
/// Keys are stored in the key directory with the following structure:
/// ```text
/// keys/
/// ├── kek-general.key    (32 bytes, base64 text or raw, 0600 permissions)
/// ├── kek-contact.key
/// ├── kek-clinical.key
/// └── kek-financial.key
/// ```
///
/// The KEK path is the file name relative to the key directory, e.g.
/// `KEK_CLINICAL_PATH=kek-clinical.key`.
#[derive(Debug, Clone)]
pub struct FileKeyResolver {
    key_dir: PathBuf,
}

impl FileKeyResolver {
    /// Creates a resolver over an existing key directory.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::BackendUnavailable` if the directory
    /// does not exist.
    pub fn new(key_dir: impl Into<PathBuf>) -> Result<Self, KeyProviderError> {
        let key_dir = key_dir.into();
        if !key_dir.is_dir() {
            return Err(KeyProviderError::BackendUnavailable(format!(
                "key directory does not exist: {}",
                key_dir.display()
            )));
        }
        Ok(Self { key_dir })
    }

    /// Returns the key directory.
    #[must_use]
    pub fn key_dir(&self) -> &Path {
        &self.key_dir
    }

    /// File name used by [`FileKeyResolver::init`] for a domain's KEK.
    #[must_use]
    pub fn file_name(domain: Domain) -> String {
        format!("kek-{domain}.key")
    }

    /// Creates `key_dir` if needed and writes one fresh KEK per domain.
    ///
    /// Existing key files are never overwritten. Returns the KEK paths to
    /// configure for the new keys.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::Io` if the directory cannot be created or
    /// a key file already exists or cannot be written.
    pub fn init(key_dir: impl AsRef<Path>) -> Result<KekPaths, KeyProviderError> {
        let key_dir = key_dir.as_ref();
        std::fs::create_dir_all(key_dir)?;

        let mut paths = KekPaths::default();
        for domain in Domain::ALL {
            let name = Self::file_name(domain);
            let mut key = Zeroizing::new([0u8; KEK_SIZE]);
            OsRng.fill_bytes(&mut key[..]);
            let encoded = Zeroizing::new(STANDARD.encode(&key[..]));
            write_new_key_file(&key_dir.join(&name), encoded.as_bytes())?;
            paths = paths.with(domain, name);
        }

        info!(dir = %key_dir.display(), "initialized key directory");
        Ok(paths)
    }

    fn locate(&self, kek_path: &str) -> Result<PathBuf, KeyProviderError> {
        let relative = Path::new(kek_path);
        let plain = !kek_path.is_empty()
            && relative.components().all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(KeyProviderError::KekNotFound(format!(
                "KEK path must be a file name inside the key directory: {kek_path:?}"
            )));
        }
        Ok(self.key_dir.join(relative))
    }
}

#[cfg(unix)]
fn write_new_key_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file =
        std::fs::OpenOptions::new().write(true).create_new(true).mode(0o600).open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_new_key_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut file = std::fs::OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(contents)
}

/// Accepts base64 text decoding to 32 bytes, or exactly 32 raw bytes.
///
/// Content that reads as base64 is always decoded, so a short base64 key
/// is rejected rather than taken as 32 raw ASCII bytes.
fn parse_key(contents: &[u8]) -> Result<SecretVec<u8>, String> {
    let decoded = std::str::from_utf8(contents)
        .ok()
        .and_then(|text| STANDARD.decode(text.trim()).ok())
        .map(Zeroizing::new);
    match decoded {
        Some(key) if key.len() == KEK_SIZE => Ok(SecretVec::new(key.to_vec())),
        Some(key) => Err(format!("decodes to {} bytes, expected {KEK_SIZE}", key.len())),
        None if contents.len() == KEK_SIZE => Ok(SecretVec::new(contents.to_vec())),
        None => Err("not 32 raw bytes or base64".to_string()),
    }
}

#[async_trait]
impl KekResolver for FileKeyResolver {
    async fn resolve_key(&self, kek_path: &str) -> Result<SecretVec<u8>, KeyProviderError> {
        let file = self.locate(kek_path)?;
        let contents = match tokio::fs::read(&file).await {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(KeyProviderError::KekNotFound(kek_path.to_string()));
            }
            Err(e) => return Err(KeyProviderError::Io(e)),
        };
        debug!(kek_path, "resolved KEK from file");
        parse_key(&contents)
            .map_err(|msg| KeyProviderError::InvalidKek(format!("{kek_path}: {msg}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    #[test]
    fn test_new_requires_directory() {
        let result = FileKeyResolver::new("/definitely/not/a/key/dir");
        assert!(matches!(result, Err(KeyProviderError::BackendUnavailable(_))));
    }

    #[test]
    fn test_init_writes_four_keys() {
        let dir = TempDir::new().unwrap();
        let paths = FileKeyResolver::init(dir.path()).unwrap();

        assert!(paths.validate().is_ok());
        for domain in Domain::ALL {
            assert_eq!(paths.path(domain).unwrap(), FileKeyResolver::file_name(domain));
            assert!(dir.path().join(FileKeyResolver::file_name(domain)).is_file());
        }
    }

    #[test]
    fn test_init_never_overwrites() {
        let dir = TempDir::new().unwrap();
        FileKeyResolver::init(dir.path()).unwrap();
        let result = FileKeyResolver::init(dir.path());
        assert!(matches!(result, Err(KeyProviderError::Io(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_key_files_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        FileKeyResolver::init(dir.path()).unwrap();
        let meta = std::fs::metadata(dir.path().join("kek-clinical.key")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_resolve_base64_and_raw_keys() {
        let dir = TempDir::new().unwrap();
        FileKeyResolver::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("raw.key"), [7u8; KEK_SIZE]).unwrap();
        let resolver = FileKeyResolver::new(dir.path()).unwrap();

        let key = resolver.resolve_key("kek-general.key").await.unwrap();
        assert_eq!(key.expose_secret().len(), KEK_SIZE);

        let raw = resolver.resolve_key("raw.key").await.unwrap();
        assert_eq!(raw.expose_secret(), &vec![7u8; KEK_SIZE]);
    }

    #[tokio::test]
    async fn test_resolve_rejects_bad_keys() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("short.key"), STANDARD.encode([1u8; 16])).unwrap();
        let resolver = FileKeyResolver::new(dir.path()).unwrap();

        let result = resolver.resolve_key("short.key").await;
        assert!(matches!(result, Err(KeyProviderError::InvalidKek(_))));

        // 24-byte key whose base64 text is exactly 32 characters long
        let encoded = STANDARD.encode([2u8; 24]);
        assert_eq!(encoded.len(), KEK_SIZE);
        std::fs::write(dir.path().join("ascii.key"), encoded).unwrap();
        let result = resolver.resolve_key("ascii.key").await;
        assert!(matches!(result, Err(KeyProviderError::InvalidKek(_))));

        let result = resolver.resolve_key("missing.key").await;
        assert!(matches!(result, Err(KeyProviderError::KekNotFound(_))));

        let result = resolver.resolve_key("../escape.key").await;
        assert!(matches!(result, Err(KeyProviderError::KekNotFound(_))));
    }

    #[tokio::test]
    async fn test_wrap_unwrap_through_files() {
        let dir = TempDir::new().unwrap();
        FileKeyResolver::init(dir.path()).unwrap();
        let resolver = FileKeyResolver::new(dir.path()).unwrap();
        let dek = SecretVec::new(vec![42u8; 32]);

        let wrapped = resolver.wrap_dek("kek-financial.key", &dek).await.unwrap();
        assert_eq!(wrapped.len(), 60);

        let unwrapped = resolver.unwrap_dek("kek-financial.key", &wrapped).await.unwrap();
        assert_eq!(unwrapped.expose_secret(), dek.expose_secret());

        let result = resolver.unwrap_dek("kek-clinical.key", &wrapped).await;
        assert!(matches!(result, Err(KeyProviderError::UnwrapFailed(_))));
    }
}
