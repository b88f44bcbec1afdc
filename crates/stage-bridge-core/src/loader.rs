//! Binary module loading and instantiation.
//!
//! The [`ModuleLoader`] turns a location string into a live [`LoadedModule`]:
//!
//! 1. Resolve the location ([`ModuleSource`]: http(s) URL or local path)
//! 2. Fetch the bytes through the [`ModuleFetcher`] seam
//! 3. Validate the header and compile via Wasmtime
//! 4. Instantiate against an empty linker
//!
//! The compiled engine module is an opaque, self-contained artifact: the
//! loader never interprets its internals, and a module that imports host
//! functions fails instantiation. Exactly one attempt is made per call;
//! retry policy belongs to callers.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use url::Url;
use uuid::Uuid;
use wasmtime::{Linker, Module, Store};

use stage_bridge_common::{LoadError, LoaderConfig};

use crate::engine::BridgeEngine;
use crate::probe::CapabilityReport;

/// A resolved module location.
#[derive(Debug, Clone)]
pub enum ModuleSource {
    /// Fetch over http(s).
    Remote(Url),
    /// Read from the local filesystem.
    Local(PathBuf),
}

impl ModuleSource {
    /// Resolve a location string.
    ///
    /// `http`/`https` URLs become [`ModuleSource::Remote`]; `file` URLs and
    /// anything that does not parse as an absolute URL are treated as local
    /// paths.
    pub fn parse(location: &str) -> Self {
        match Url::parse(location) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Self::Remote(url),
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(Self::Local)
                .unwrap_or_else(|()| Self::Local(PathBuf::from(location))),
            _ => Self::Local(PathBuf::from(location)),
        }
    }

    /// The location as supplied by the caller, for error reporting.
    pub fn location(&self) -> String {
        match self {
            Self::Remote(url) => url.to_string(),
            Self::Local(path) => path.display().to_string(),
        }
    }
}

/// Transport seam for retrieving module bytes.
///
/// The default implementation covers http(s) and the filesystem; embedders
/// and tests substitute their own.
#[async_trait]
pub trait ModuleFetcher: Send + Sync {
    /// Retrieve the raw bytes at `source`. One attempt, no retries.
    async fn fetch(&self, source: &ModuleSource) -> Result<Vec<u8>, LoadError>;
}

/// Default fetcher: reqwest for remote locations, tokio for local files.
pub struct DefaultFetcher {
    http: reqwest::Client,
    config: LoaderConfig,
}

impl DefaultFetcher {
    /// Create a fetcher with the given loader configuration.
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn check_size(&self, location: &str, len: u64) -> Result<(), LoadError> {
        if len > self.config.max_module_bytes {
            return Err(LoadError::fetch_failed(
                location,
                format!(
                    "module is {len} bytes, exceeding the {} byte limit",
                    self.config.max_module_bytes
                ),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ModuleFetcher for DefaultFetcher {
    async fn fetch(&self, source: &ModuleSource) -> Result<Vec<u8>, LoadError> {
        let location = source.location();
        match source {
            ModuleSource::Remote(url) => {
                if !self.config.allow_network {
                    return Err(LoadError::fetch_failed(
                        location,
                        "network fetching is disabled",
                    ));
                }

                let response = self
                    .http
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(|e| LoadError::fetch_failed(&location, e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    return Err(LoadError::fetch_failed(
                        location,
                        format!("HTTP status {status}"),
                    ));
                }

                if let Some(len) = response.content_length() {
                    self.check_size(&location, len)?;
                }

                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| LoadError::fetch_failed(&location, e.to_string()))?;
                self.check_size(&location, bytes.len() as u64)?;

                Ok(bytes.to_vec())
            }
            ModuleSource::Local(path) => {
                let metadata = tokio::fs::metadata(path)
                    .await
                    .map_err(|e| LoadError::fetch_failed(&location, e.to_string()))?;
                self.check_size(&location, metadata.len())?;

                tokio::fs::read(path)
                    .await
                    .map_err(|e| LoadError::fetch_failed(&location, e.to_string()))
            }
        }
    }
}

/// Per-instance store context.
///
/// The engine module runs with no host imports, so this carries only
/// identification for tracing.
pub struct InstanceContext {
    /// The owning instance's identifier.
    pub instance_id: Uuid,
    created_at: Instant,
}

impl InstanceContext {
    fn new(instance_id: Uuid) -> Self {
        Self {
            instance_id,
            created_at: Instant::now(),
        }
    }

    /// Time since the store was created.
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}

/// A loaded, instantiated engine module.
///
/// Owns the compiled module, the live Wasmtime instance, and its store.
/// Dropping a `LoadedModule` releases the instance's linear memory.
pub struct LoadedModule {
    module: Module,
    instance: wasmtime::Instance,
    store: Mutex<Store<InstanceContext>>,
    content_hash: String,
    location: String,
}

impl LoadedModule {
    /// Invoke the module's exported entry function.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::InstantiationFailed`] if the export is missing,
    /// has the wrong signature, or traps.
    pub async fn start(&self, entry_point: &str) -> Result<(), LoadError> {
        let mut store = self.store.lock().await;

        let func = self
            .instance
            .get_typed_func::<(), ()>(&mut *store, entry_point)
            .map_err(|_| {
                LoadError::instantiation_failed(format!("entry point '{entry_point}' not found"))
            })?;

        func.call_async(&mut *store, ())
            .await
            .map_err(|e| LoadError::instantiation_failed(format!("entry point trapped: {e}")))?;

        debug!(entry_point, "Entry point returned");
        Ok(())
    }

    /// Get the compiled module.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Hash of the fetched bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// The location the module was loaded from.
    pub fn location(&self) -> &str {
        &self.location
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("content_hash", &self.content_hash)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

/// Fetches, compiles, and instantiates engine modules.
#[derive(Clone)]
pub struct ModuleLoader {
    engine: BridgeEngine,
    fetcher: Arc<dyn ModuleFetcher>,
}

impl ModuleLoader {
    /// Create a loader with the default http/filesystem fetcher.
    pub fn new(engine: BridgeEngine, config: LoaderConfig) -> Self {
        Self::with_fetcher(engine, Arc::new(DefaultFetcher::new(config)))
    }

    /// Create a loader with a custom fetcher.
    pub fn with_fetcher(engine: BridgeEngine, fetcher: Arc<dyn ModuleFetcher>) -> Self {
        Self { engine, fetcher }
    }

    /// Load and instantiate the module at `location`.
    ///
    /// Must not run without a supported capability report; callers gate on
    /// the report before fetching so an unsupported host never touches the
    /// network.
    ///
    /// # Errors
    ///
    /// - [`LoadError::Unsupported`] if the report verdict is unsupported
    /// - [`LoadError::FetchFailed`] if the bytes cannot be retrieved
    /// - [`LoadError::InstantiationFailed`] if the bytes are not a loadable
    ///   module on this engine
    #[instrument(skip(self, report, instance_id), fields(instance = %instance_id))]
    pub async fn load(
        &self,
        location: &str,
        instance_id: Uuid,
        report: &CapabilityReport,
    ) -> Result<LoadedModule, LoadError> {
        if !report.supported() {
            return Err(LoadError::Unsupported {
                missing: report.missing(),
            });
        }

        let start = Instant::now();
        let source = ModuleSource::parse(location);

        let bytes = self.fetcher.fetch(&source).await?;
        validate_wasm_header(&bytes)?;

        let module = Module::new(self.engine.inner(), &bytes)
            .map_err(|e| LoadError::instantiation_failed(format!("compilation failed: {e}")))?;
        let content_hash = compute_hash(&bytes);

        let mut store = Store::new(self.engine.inner(), InstanceContext::new(instance_id));
        let linker: Linker<InstanceContext> = Linker::new(self.engine.inner());
        let instance = linker
            .instantiate_async(&mut store, &module)
            .await
            .map_err(|e| LoadError::instantiation_failed(format!("instantiation failed: {e}")))?;

        info!(
            content_hash = %content_hash,
            bytes_len = bytes.len(),
            duration_ms = start.elapsed().as_millis(),
            "Module loaded"
        );

        Ok(LoadedModule {
            module,
            instance,
            store: Mutex::new(store),
            content_hash,
            location: location.to_string(),
        })
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader").finish_non_exhaustive()
    }
}

/// Validate the WebAssembly header (magic number).
fn validate_wasm_header(bytes: &[u8]) -> Result<(), LoadError> {
    if bytes.len() < 8 {
        return Err(LoadError::instantiation_failed(
            "invalid module: file too small",
        ));
    }

    // Check magic number: \0asm
    if &bytes[0..4] != b"\0asm" {
        return Err(LoadError::instantiation_failed(
            "invalid module: bad magic number",
        ));
    }

    Ok(())
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
