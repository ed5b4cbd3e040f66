//! The patch-and-install pipeline

use apkforge_archive::{extract, read_entry_bytes, repack, RepackPlan};
use apkforge_errors::Result;
use apkforge_events::{
    AppEvent, ArchiveEvent, EventEmitter, EventSender, GeneralEvent, PatchEvent, SigningEvent,
};
use apkforge_install::{InstallOutcome, InstallSession, InstallerBackend};
use apkforge_manifest::patch_identity;
use apkforge_net::{DownloadConfig, Downloader, NetClient};
use apkforge_signing::{sign, SigningIdentityStore};
use apkforge_types::PackageIdentity;
use std::fs;
use std::path::{Path, PathBuf};

const MANIFEST_ENTRY: &str = "AndroidManifest.xml";
const BASE_PART: &str = "base.apk";

/// Where the pipeline keeps its artifacts.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Per-attempt working directory; removed when the run finishes,
    /// successfully or not.
    pub work_dir: PathBuf,
    /// Directory the signed, installable part(s) are written to.
    pub parts_dir: PathBuf,
    /// Keystore file backing the signing identity.
    pub keystore_path: PathBuf,
    pub download: DownloadConfig,
}

/// One patch-and-install request.
#[derive(Debug, Clone)]
pub struct PatchRequest {
    /// Where to fetch the base package archive.
    pub base_url: String,
    /// Optional patch payload archive merged into the package.
    pub payload_url: Option<String>,
    pub identity: PackageIdentity,
    /// Ask the installer to skip interactive confirmation.
    pub silent: bool,
}

/// Orchestrates one installation request end to end.
pub struct PatchPipeline<'a, B: InstallerBackend> {
    backend: &'a B,
    downloader: Downloader,
    store: SigningIdentityStore,
    config: PipelineConfig,
    tx: EventSender,
}

impl<'a, B: InstallerBackend> PatchPipeline<'a, B> {
    /// Build a pipeline around an installer backend.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be initialized.
    pub fn new(backend: &'a B, config: PipelineConfig, tx: EventSender) -> Result<Self> {
        let downloader = Downloader::new(NetClient::with_defaults()?, config.download.clone());
        let store = SigningIdentityStore::new(&config.keystore_path);
        Ok(Self {
            backend,
            downloader,
            store,
            config,
            tx,
        })
    }

    /// Run the request to a terminal outcome.
    ///
    /// Stages run strictly in order, each gated on the previous stage's
    /// on-disk artifact. On failure the typed error is converted into
    /// user-facing log events here (and only here), partial artifacts
    /// are removed, and the error propagates to the caller.
    ///
    /// # Errors
    ///
    /// Any stage error, after cleanup.
    pub async fn run(&self, request: &PatchRequest) -> Result<InstallOutcome> {
        self.tx.emit_operation_started("patch-and-install");
        let result = self.execute(request).await;

        // The working directory never outlives the attempt.
        let _ = fs::remove_dir_all(&self.config.work_dir);

        match &result {
            Ok(_) => {
                self.tx.emit_operation_completed("patch-and-install", true);
            }
            Err(err) => {
                let _ = fs::remove_file(self.config.parts_dir.join(BASE_PART));
                self.tx.emit(AppEvent::General(GeneralEvent::Error {
                    message: "installation aborted".to_string(),
                    details: Some(err.to_string()),
                }));
                self.tx.emit_operation_failed("patch-and-install", err.to_string());
            }
        }
        result
    }

    async fn execute(&self, request: &PatchRequest) -> Result<InstallOutcome> {
        fs::create_dir_all(&self.config.work_dir)?;
        fs::create_dir_all(&self.config.parts_dir)?;

        // Download the base package; the downloader validates it before
        // reporting it usable.
        let base = self.config.work_dir.join("base.apk");
        self.downloader
            .fetch(&request.base_url, &base, &self.tx)
            .await?;

        // Download and extract the patch payload, when there is one.
        let payload_dir = match &request.payload_url {
            Some(url) => {
                let payload_archive = self.config.work_dir.join("payload.zip");
                self.downloader
                    .fetch(url, &payload_archive, &self.tx)
                    .await?;

                let payload_dir = self.config.work_dir.join("payload");
                self.tx.emit(AppEvent::Archive(ArchiveEvent::ExtractionStarted {
                    archive: payload_archive.display().to_string(),
                    target: payload_dir.display().to_string(),
                }));
                let entries = extract(&payload_archive, &payload_dir)?;
                self.tx.emit(AppEvent::Archive(ArchiveEvent::ExtractionCompleted {
                    archive: payload_archive.display().to_string(),
                    entries,
                }));
                Some(payload_dir)
            }
            None => None,
        };

        // Rewrite the manifest to the requested identity.
        self.tx.emit(AppEvent::Patch(PatchEvent::ManifestPatchStarted {
            source_package: request.identity.source_package.clone(),
            target_package: request.identity.target_package.clone(),
        }));
        let manifest = read_entry_bytes(&base, MANIFEST_ENTRY)?;
        let patched_manifest = patch_identity(&manifest, &request.identity)?;
        self.tx.emit(AppEvent::Patch(PatchEvent::ManifestPatchCompleted {
            target_package: request.identity.target_package.clone(),
        }));

        // Repack: substituted manifest plus payload entries.
        let mut plan = RepackPlan::new().replace(MANIFEST_ENTRY, patched_manifest);
        if let Some(dir) = &payload_dir {
            for (name, path) in collect_files(dir)? {
                plan = plan.add_file(name, path);
            }
        }
        let patched_package = self.config.work_dir.join("patched.apk");
        repack(&base, &patched_package, &plan)?;
        self.tx.emit(AppEvent::Patch(PatchEvent::Repacked {
            package: patched_package.display().to_string(),
        }));

        // Sign into the parts directory.
        let part = self.config.parts_dir.join(BASE_PART);
        let identity = self.store.get_or_create()?;
        self.tx.emit(AppEvent::Signing(SigningEvent::SigningStarted {
            package: patched_package.display().to_string(),
        }));
        sign(&patched_package, &part, &identity)?;
        self.tx.emit(AppEvent::Signing(SigningEvent::SigningCompleted {
            package: part.display().to_string(),
        }));

        // Hand the signed part(s) to the install session.
        InstallSession::new(self.backend, self.tx.clone())
            .install_parts(&[part], request.silent)
            .await
    }
}

/// Flatten a directory tree into `(archive entry name, file path)` pairs
/// with `/`-joined relative names.
fn collect_files(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<(String, PathBuf)>) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                walk(root, &path, out)?;
            } else {
                let name = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .iter()
                    .map(|seg| seg.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push((name, path));
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(root, root, &mut files)?;
    files.sort();
    Ok(files)
}
