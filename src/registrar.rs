//! Publishing listen addresses under a logical service URL.
//!
//! A [`Registrar`] records that a server is reachable at a concrete address
//! under a logical name, so clients can discover it. Two implementations are
//! provided: an in-process [`MemoryRegistrar`] and a directory-backed
//! [`FileRegistrar`] addressed by `file:///path` URLs.

use std::{
    fs,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use dashmap::DashMap;
use log::{debug, warn};
use thiserror::Error;
use url::Url;

/// Errors raised while registering a server.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistrationError {
    /// No registrar was configured and none could be derived from the URL.
    #[error("no registrar configured")]
    NoRegistrar,
    /// The registry URL could not be parsed.
    #[error("invalid registry url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    /// No registrar implementation handles the URL scheme.
    #[error("unsupported registry scheme `{0}`")]
    UnsupportedScheme(String),
    /// The server has no listening transport to publish.
    #[error("server has no listening address to register")]
    NoLocalAddress,
    /// The backing store could not be updated.
    #[error("registry I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Publishes server addresses to a discovery backend.
///
/// `unregister` withdraws everything this registrar published and must be
/// safe to call repeatedly.
#[cfg_attr(test, mockall::automock)]
pub trait Registrar: Send + Sync {
    /// Publish `address` under `logical_url`.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistrationError`] if the backend rejects the entry.
    fn register(&self, logical_url: &str, address: &str) -> Result<(), RegistrationError>;

    /// Withdraw every entry published by this registrar.
    fn unregister(&self);
}

/// Shared in-process directory of logical URL to published addresses.
pub type Directory = Arc<DashMap<String, Vec<String>>>;

/// Registrar keeping entries in an in-process [`Directory`].
///
/// Several registrars may share one directory; each withdraws only its own
/// entries.
#[derive(Debug, Default)]
pub struct MemoryRegistrar {
    directory: Directory,
    published: Mutex<Vec<(String, String)>>,
}

impl MemoryRegistrar {
    /// Create a registrar publishing into `directory`.
    #[must_use]
    pub fn new(directory: Directory) -> Self {
        Self {
            directory,
            published: Mutex::default(),
        }
    }

    /// Directory this registrar publishes into.
    #[must_use]
    pub fn directory(&self) -> &Directory { &self.directory }

    /// Addresses currently published under `logical_url`.
    #[must_use]
    pub fn lookup(&self, logical_url: &str) -> Vec<String> {
        self.directory
            .get(logical_url)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

impl Registrar for MemoryRegistrar {
    fn register(&self, logical_url: &str, address: &str) -> Result<(), RegistrationError> {
        let mut addresses = self.directory.entry(logical_url.to_owned()).or_default();
        if !addresses.iter().any(|a| a == address) {
            addresses.push(address.to_owned());
        }
        drop(addresses);
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((logical_url.to_owned(), address.to_owned()));
        debug!("registered: logical_url={logical_url}, address={address}");
        Ok(())
    }

    fn unregister(&self) {
        let published =
            std::mem::take(&mut *self.published.lock().unwrap_or_else(PoisonError::into_inner));
        for (logical_url, address) in published {
            let now_empty = self.directory.get_mut(&logical_url).is_some_and(|mut entry| {
                entry.retain(|a| *a != address);
                entry.is_empty()
            });
            if now_empty {
                self.directory.remove_if(&logical_url, |_, addresses| addresses.is_empty());
            }
            debug!("unregistered: logical_url={logical_url}, address={address}");
        }
    }
}

/// Registrar writing one file per published address below a directory.
///
/// `file:///srv/registry` maps the logical name to that directory; each
/// address becomes a file named after it, containing the address.
#[derive(Debug)]
pub struct FileRegistrar {
    root: PathBuf,
    published: Mutex<Vec<PathBuf>>,
}

impl FileRegistrar {
    /// Create a registrar rooted at `root`.
    ///
    /// `file://` logical URLs name their own directory; any other logical
    /// URL is stored in a subdirectory of `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            published: Mutex::default(),
        }
    }

    /// Directory entries are written to.
    #[must_use]
    pub fn root(&self) -> &Path { &self.root }

    fn entry_path(dir: &Path, address: &str) -> PathBuf {
        let name: String = address
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        dir.join(name)
    }
}

/// Directory a `file://` logical URL refers to.
///
/// # Errors
///
/// Returns [`RegistrationError::InvalidUrl`] if the URL is not a local file
/// URL.
pub fn file_url_path(logical_url: &str) -> Result<PathBuf, RegistrationError> {
    let invalid = |reason: &str| RegistrationError::InvalidUrl {
        url: logical_url.to_owned(),
        reason: reason.to_owned(),
    };
    let url = Url::parse(logical_url).map_err(|e| invalid(&e.to_string()))?;
    if url.scheme() != "file" {
        return Err(RegistrationError::UnsupportedScheme(url.scheme().to_owned()));
    }
    url.to_file_path().map_err(|()| invalid("not a local path"))
}

impl Registrar for FileRegistrar {
    fn register(&self, logical_url: &str, address: &str) -> Result<(), RegistrationError> {
        let dir = match Url::parse(logical_url) {
            Ok(url) if url.scheme() == "file" => file_url_path(logical_url)?,
            _ => Self::entry_path(&self.root, logical_url),
        };
        fs::create_dir_all(&dir)?;
        let path = Self::entry_path(&dir, address);
        fs::write(&path, address)?;
        debug!("registered: logical_url={logical_url}, address={address}, path={}", path.display());
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path);
        Ok(())
    }

    fn unregister(&self) {
        let published =
            std::mem::take(&mut *self.published.lock().unwrap_or_else(PoisonError::into_inner));
        for path in published {
            match fs::remove_file(&path) {
                Ok(()) => debug!("unregistered: path={}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to remove registry entry: path={}, error={e}", path.display()),
            }
        }
    }
}

/// Build a registrar able to serve `logical_url`.
///
/// Only `file://` URLs can be served without explicit configuration.
///
/// # Errors
///
/// Returns [`RegistrationError::UnsupportedScheme`] for any other scheme and
/// [`RegistrationError::InvalidUrl`] if the URL does not parse.
pub fn registrar_for_url(logical_url: &str) -> Result<Arc<dyn Registrar>, RegistrationError> {
    let root = file_url_path(logical_url)?;
    Ok(Arc::new(FileRegistrar::new(root)))
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn directory() -> Directory { Directory::default() }

    #[rstest]
    fn memory_registrar_publishes_and_withdraws(directory: Directory) {
        let a = MemoryRegistrar::new(Arc::clone(&directory));
        let b = MemoryRegistrar::new(Arc::clone(&directory));
        a.register("svc://echo", "tcp://127.0.0.1:1").expect("register a");
        b.register("svc://echo", "tcp://127.0.0.1:2").expect("register b");
        a.register("svc://echo", "tcp://127.0.0.1:1").expect("re-register a");
        assert_eq!(
            a.lookup("svc://echo"),
            vec!["tcp://127.0.0.1:1".to_owned(), "tcp://127.0.0.1:2".to_owned()]
        );

        a.unregister();
        assert_eq!(b.lookup("svc://echo"), vec!["tcp://127.0.0.1:2".to_owned()]);
        a.unregister();

        b.unregister();
        assert!(directory.get("svc://echo").is_none());
    }

    #[rstest]
    #[case("zk://127.0.0.1:2181/wirecall/test", "unsupported")]
    #[case("::nope", "invalid registry url")]
    fn only_file_urls_have_a_default_registrar(#[case] url: &str, #[case] fragment: &str) {
        let err = registrar_for_url(url).err().expect("must fail");
        assert!(err.to_string().contains(fragment), "{err}");
    }

    #[test]
    fn entry_names_are_path_safe() {
        let path = FileRegistrar::entry_path(Path::new("/r"), "tcp://[::1]:80");
        assert_eq!(path, Path::new("/r/tcp______1__80"));
    }
}
