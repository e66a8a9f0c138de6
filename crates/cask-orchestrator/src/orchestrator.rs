use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use cask_dispatch::{BlobDispatcher, DefaultBlobDispatcher, SharedDispatcher};
use cask_gc::{DocumentRepositories, GcConfig, GcCoordinator, TransactionManager};
use cask_provider::{BlobContext, BlobProvider, BlobUpdateContext, GcStats};
use cask_registry::{ProviderFactories, ProviderRegistry};
use cask_types::{Blob, BlobInfo, BlobKey, BlobRef, Document, MAIN_BLOB_XPATH};

use crate::config::CaskConfig;
use crate::error::{BlobError, BlobResult};

/// The blob orchestration façade.
///
/// Routes every blob operation to the provider chosen by the dispatcher,
/// keeps stored keys stable across repeated writes, migrates blobs when a
/// document change affects dispatch, and drives binaries garbage collection.
pub struct BlobOrchestrator {
    registry: Arc<ProviderRegistry>,
    dispatcher: SharedDispatcher,
    gc: GcCoordinator,
}

impl BlobOrchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        dispatcher: Arc<dyn BlobDispatcher>,
        repositories: Arc<dyn DocumentRepositories>,
        transactions: Arc<dyn TransactionManager>,
        gc_config: GcConfig,
    ) -> Self {
        let dispatcher = SharedDispatcher::new(dispatcher);
        let gc = GcCoordinator::new(
            Arc::clone(&registry),
            dispatcher.clone(),
            repositories,
            transactions,
            gc_config,
        );
        Self {
            registry,
            dispatcher,
            gc,
        }
    }

    /// Build from configuration. Every provider is instantiated and the
    /// dispatch table validated up front, so misconfiguration fails here
    /// rather than on first use.
    pub fn from_config(
        config: &CaskConfig,
        factories: ProviderFactories,
        repositories: Arc<dyn DocumentRepositories>,
        transactions: Arc<dyn TransactionManager>,
    ) -> BlobResult<Self> {
        let table = config.validate()?;
        let registry = ProviderRegistry::with_descriptors(factories, config.providers.iter().cloned())?;
        registry.all_instances()?;
        info!(
            providers = config.providers.len(),
            rules = table.rules().len(),
            "blob orchestrator configured"
        );
        Ok(Self::new(
            Arc::new(registry),
            Arc::new(DefaultBlobDispatcher::new(table)),
            repositories,
            transactions,
            config.gc.clone(),
        ))
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// The dispatcher currently in effect.
    pub fn dispatcher(&self) -> Arc<dyn BlobDispatcher> {
        self.dispatcher.current()
    }

    /// Replace the dispatcher. Operations already running keep the one they
    /// started with.
    pub fn set_dispatcher(&self, dispatcher: Arc<dyn BlobDispatcher>) {
        self.dispatcher.replace(dispatcher);
        info!("blob dispatcher replaced");
    }

    pub fn gc(&self) -> &GcCoordinator {
        &self.gc
    }

    // ---- Read / write ----

    /// Store `blob` for property `xpath` of `doc` and return the key to
    /// persist.
    ///
    /// A managed blob keeps its key when it lives in a non-transient
    /// provider outside the dispatcher's reach, or when dispatch still
    /// selects its current provider. Anything else is written to the
    /// dispatched provider.
    pub fn write_blob(&self, blob: &Blob, doc: &dyn Document, xpath: &str) -> BlobResult<String> {
        let dispatcher = self.dispatcher.current();
        self.store(dispatcher.as_ref(), blob, doc, xpath, false)
            .map(|stored| stored.key().to_string())
    }

    /// Content of the blob persisted as `info` in `doc`.
    pub fn read_blob(&self, info: &BlobInfo, doc: &dyn Document, xpath: &str) -> BlobResult<Bytes> {
        let provider_id = self.provider_for_key(&info.key, doc.repository_name())?;
        debug!(provider = %provider_id, key = %info.key, xpath = %xpath, "reading blob");
        let provider = self.registry.get(&provider_id)?;
        Ok(provider.read_blob(&info.with_local_key())?)
    }

    /// Resolve the provider of a persisted blob.
    pub fn read_blob_ref(&self, info: &BlobInfo, repository: &str) -> BlobResult<BlobRef> {
        let provider_id = self.provider_for_key(&info.key, repository)?;
        if !self.registry.contains(&provider_id) {
            return Err(BlobError::UnknownProvider(provider_id));
        }
        Ok(info.clone().into_ref(provider_id))
    }

    // ---- Document lifecycle ----

    /// Pin every blob of `doc` to a version. Returns how many were replaced.
    pub fn freeze_version(&self, doc: &mut dyn Document) -> BlobResult<usize> {
        let mut frozen = 0;
        for path in doc.blob_paths() {
            let Some(blob) = doc.blob(&path) else {
                continue;
            };
            let provider = self.registry.get(blob.provider_id())?;
            if let Some(version) = provider.freeze_version(&blob, &*doc)? {
                debug!(doc = %doc.id(), xpath = %path, key = %version.key(), "blob frozen");
                doc.set_blob(&path, version);
                frozen += 1;
            }
        }
        Ok(frozen)
    }

    /// React to property changes: when any changed path is read by a
    /// dispatch rule, every blob of `doc` is dispatched again and migrated
    /// if its provider changes. Returns how many blobs moved.
    pub fn notify_changes<I, S>(&self, doc: &mut dyn Document, changed_paths: I) -> BlobResult<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let dispatcher = self.dispatcher.current();
        let clause_paths = dispatcher.clause_paths();
        if !changed_paths
            .into_iter()
            .any(|path| clause_paths.contains(path.as_ref()))
        {
            return Ok(0);
        }

        let mut migrated = 0;
        for path in doc.blob_paths() {
            if self.redispatch(dispatcher.as_ref(), doc, &path)? {
                migrated += 1;
            }
        }
        Ok(migrated)
    }

    /// `doc` just became a record: dispatch its main blob again.
    pub fn notify_make_record(&self, doc: &mut dyn Document) -> BlobResult<bool> {
        let dispatcher = self.dispatcher.current();
        self.redispatch(dispatcher.as_ref(), doc, MAIN_BLOB_XPATH)
    }

    /// `doc` is a fresh copy. A main blob held by a record-mode provider is
    /// stored again for the copy so that removing the original never
    /// removes content the copy still references.
    pub fn notify_after_copy(&self, doc: &mut dyn Document) -> BlobResult<bool> {
        let Some(main) = doc.main_blob() else {
            return Ok(false);
        };
        if !self.registry.get(main.provider_id())?.is_record_mode() {
            return Ok(false);
        }
        let dispatcher = self.dispatcher.current();
        let copy = self.store(dispatcher.as_ref(), &Blob::Managed(main), &*doc, MAIN_BLOB_XPATH, true)?;
        debug!(doc = %doc.id(), key = %copy.key(), "record blob stored for copy");
        doc.set_blob(MAIN_BLOB_XPATH, copy);
        Ok(true)
    }

    /// `doc` is about to be removed: record-mode content goes with it.
    pub fn notify_before_remove(&self, doc: &dyn Document) -> BlobResult<()> {
        let Some(main) = doc.main_blob() else {
            return Ok(());
        };
        let provider = self.registry.get(main.provider_id())?;
        if !provider.is_record_mode() {
            return Ok(());
        }
        if doc.is_under_retention_or_legal_hold() {
            return Err(BlobError::RetentionViolation(format!(
                "document {} is under retention or legal hold",
                doc.id()
            )));
        }
        provider.delete_blob(&BlobUpdateContext::new(main.local_key(), doc))?;
        debug!(doc = %doc.id(), key = %main.key(), "record blob removed with document");
        Ok(())
    }

    pub fn notify_set_retain_until(
        &self,
        doc: &dyn Document,
        retain_until: Option<DateTime<Utc>>,
    ) -> BlobResult<()> {
        self.update_main_blob(doc, |ctx| ctx.with_retain_until(retain_until))
    }

    pub fn notify_set_legal_hold(&self, doc: &dyn Document, hold: bool) -> BlobResult<()> {
        self.update_main_blob(doc, |ctx| ctx.with_legal_hold(hold))
    }

    // ---- Garbage collection ----

    pub fn mark_referenced_binary(&self, key: &str, repository: &str) {
        self.gc.mark_referenced_binary(key, repository);
    }

    pub fn garbage_collect_binaries(&self, delete: bool) -> BlobResult<GcStats> {
        Ok(self.gc.run_cycle(delete)?)
    }

    pub fn is_binaries_garbage_collection_in_progress(&self) -> bool {
        self.gc.is_cycle_in_progress()
    }

    /// Close every provider.
    pub fn close(&self) {
        self.registry.close();
    }

    // ---- Internals ----

    /// The provider owning a persisted key: its prefix, or the read
    /// provider of `repository` for a bare key.
    fn provider_for_key(&self, key: &str, repository: &str) -> BlobResult<String> {
        let key = BlobKey::parse(key)?;
        Ok(match key.provider() {
            Some(provider) => provider.to_string(),
            None => self.dispatcher.current().resolve_for_read(repository),
        })
    }

    /// Write `blob` where `dispatcher` sends it, reusing its current key
    /// when allowed. `force` skips key reuse.
    fn store(
        &self,
        dispatcher: &dyn BlobDispatcher,
        blob: &Blob,
        doc: &dyn Document,
        xpath: &str,
        force: bool,
    ) -> BlobResult<BlobRef> {
        let target = dispatcher.resolve_for_write(doc, blob, xpath);
        if let (false, Some(current)) = (force, blob.as_managed()) {
            let transient = self.registry.get(current.provider_id())?.is_transient();
            let external = !dispatcher
                .provider_ids(doc.repository_name())
                .contains(current.provider_id());
            if !transient && (external || target.provider_id == current.provider_id()) {
                debug!(provider = %current.provider_id(), key = %current.key(), external, "blob key reused");
                return Ok(current.clone());
            }
        }

        let provider = self.registry.get(&target.provider_id)?;
        self.check_replace_allowed(provider.as_ref(), doc, xpath)?;

        let content = self.content_of(blob)?;
        let local = provider.write_blob(&BlobContext::new(&content, blob.metadata(), doc, xpath))?;
        let key = if target.add_prefix {
            BlobKey::prefixed(target.provider_id.as_str(), local).to_string()
        } else {
            local
        };
        debug!(provider = %target.provider_id, key = %key, xpath = %xpath, bytes = content.len(), "blob stored");

        let stored = match blob {
            Blob::New(new) => {
                let stored = BlobRef::new(key, target.provider_id)
                    .with_metadata(new.metadata.clone())
                    .with_length(content.len() as i64);
                match blob.digest() {
                    Some(digest) => stored.with_digest(digest),
                    None => stored,
                }
            }
            Blob::Managed(managed) => managed
                .rekeyed(key, target.provider_id)
                .with_length(content.len() as i64),
        };
        Ok(stored)
    }

    fn content_of(&self, blob: &Blob) -> BlobResult<Bytes> {
        match blob {
            Blob::New(new) => Ok(new.content.clone()),
            Blob::Managed(current) => {
                let provider = self.registry.get(current.provider_id())?;
                Ok(provider.read_blob(&current.info().with_local_key())?)
            }
        }
    }

    /// Writing the main content of a held document is refused when either
    /// the content being replaced or its replacement lives in record mode.
    fn check_replace_allowed(
        &self,
        target: &dyn BlobProvider,
        doc: &dyn Document,
        xpath: &str,
    ) -> BlobResult<()> {
        if xpath != MAIN_BLOB_XPATH || !doc.is_under_retention_or_legal_hold() {
            return Ok(());
        }
        let current_is_record = doc.main_blob().is_some_and(|main| {
            self.registry
                .get(main.provider_id())
                .is_ok_and(|provider| provider.is_record_mode())
        });
        if target.is_record_mode() || current_is_record {
            return Err(BlobError::RetentionViolation(format!(
                "cannot replace main content of document {} under retention or legal hold",
                doc.id()
            )));
        }
        Ok(())
    }

    /// Dispatch the blob at `xpath` again and move it if its provider
    /// changed. The old copy is deleted only from a record-mode provider,
    /// and only when the document is not held.
    fn redispatch(
        &self,
        dispatcher: &dyn BlobDispatcher,
        doc: &mut dyn Document,
        xpath: &str,
    ) -> BlobResult<bool> {
        let Some(current) = doc.blob(xpath) else {
            return Ok(false);
        };
        let stored = self.store(dispatcher, &Blob::Managed(current.clone()), &*doc, xpath, false)?;
        if stored.key() == current.key() && stored.provider_id() == current.provider_id() {
            return Ok(false);
        }

        info!(
            doc = %doc.id(),
            xpath = %xpath,
            from = %current.provider_id(),
            to = %stored.provider_id(),
            "blob migrated"
        );
        doc.set_blob(xpath, stored);

        let old = self.registry.get(current.provider_id())?;
        if old.is_record_mode() {
            if doc.is_under_retention_or_legal_hold() {
                warn!(doc = %doc.id(), key = %current.key(), "old record copy kept: document is held");
            } else {
                old.delete_blob(&BlobUpdateContext::new(current.local_key(), &*doc))?;
            }
        }
        Ok(true)
    }

    fn update_main_blob<F>(&self, doc: &dyn Document, change: F) -> BlobResult<()>
    where
        F: FnOnce(BlobUpdateContext) -> BlobUpdateContext,
    {
        let Some(main) = doc.main_blob() else {
            return Ok(());
        };
        let provider = self.registry.get(main.provider_id())?;
        let ctx = change(BlobUpdateContext::new(main.local_key(), doc));
        provider.update_blob(&ctx)?;
        Ok(())
    }
}

impl std::fmt::Debug for BlobOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobOrchestrator")
            .field("registry", &self.registry)
            .field("dispatcher", &self.dispatcher)
            .field("gc", &self.gc)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cask_dispatch::{DispatchDescriptor, DEFAULT_CLAUSE};
    use cask_gc::{InMemoryRepositories, InMemoryTransactionManager};
    use cask_provider::{InMemoryBlobProvider, MemoryStorages, ProviderProperties, ProviderResult};
    use cask_types::{ContentDigest, InMemoryDocument, NewBlob};

    struct Deployment {
        cask: BlobOrchestrator,
        storages: Arc<MemoryStorages>,
        repositories: Arc<InMemoryRepositories>,
    }

    fn deployment(toml: &str) -> Deployment {
        try_deployment(toml, ProviderFactories::with_defaults).unwrap()
    }

    fn try_deployment<F>(toml: &str, factories: F) -> BlobResult<Deployment>
    where
        F: FnOnce(Arc<MemoryStorages>) -> ProviderFactories,
    {
        let storages = Arc::new(MemoryStorages::new());
        let repositories = Arc::new(InMemoryRepositories::new());
        let cask = BlobOrchestrator::from_config(
            &CaskConfig::from_toml_str(toml)?,
            factories(Arc::clone(&storages)),
            Arc::clone(&repositories) as Arc<dyn DocumentRepositories>,
            Arc::new(InMemoryTransactionManager::new()),
        )?;
        Ok(Deployment {
            cask,
            storages,
            repositories,
        })
    }

    impl Deployment {
        /// Write `blob` into `xpath` of `doc` and store the resulting
        /// reference on the document.
        fn attach(&self, doc: &mut InMemoryDocument, xpath: &str, blob: NewBlob) -> BlobRef {
            let key = self.cask.write_blob(&blob.clone().into(), doc, xpath).unwrap();
            let mut info = BlobInfo::from_key(key);
            info.mime_type = blob.metadata.mime_type.clone();
            info.length = blob.content.len() as i64;
            let stored = self.cask.read_blob_ref(&info, doc.repository_name()).unwrap();
            doc.set_blob(xpath, stored.clone());
            stored
        }

        fn stored(&self, storage: &str, blob: &BlobRef) -> bool {
            self.storages.storage(storage).contains(blob.local_key())
        }
    }

    const SINGLE: &str = r#"
        [[providers]]
        name = "default"
        kind = "memory"
    "#;

    const MEDIA: &str = r#"
        [[providers]]
        name = "videos"
        kind = "memory"

        [[providers]]
        name = "other"
        kind = "memory"

        [[providers]]
        name = "legacy"
        kind = "memory"

        [[dispatch.rules]]
        clauses = "blob:mime-type~video/*"
        provider = "videos"

        [[dispatch.rules]]
        clauses = "default"
        provider = "other"
    "#;

    const RECORDS: &str = r#"
        [[providers]]
        name = "records"
        kind = "memory"
        properties = { record = "true" }

        [[providers]]
        name = "plain"
        kind = "memory"

        [[dispatch.rules]]
        clauses = "ecm:isRecord=true"
        provider = "records"

        [[dispatch.rules]]
        clauses = "default"
        provider = "plain"
    "#;

    fn text(content: &'static str) -> NewBlob {
        NewBlob::new(content.as_bytes()).with_mime_type("text/plain")
    }

    // -----------------------------------------------------------------------
    // Read / write
    // -----------------------------------------------------------------------

    #[test]
    fn default_configuration_uses_bare_keys() {
        let d = deployment(SINGLE);
        let doc = InMemoryDocument::new("doc", "default");
        let key = d
            .cask
            .write_blob(&text("abc123").into(), &doc, MAIN_BLOB_XPATH)
            .unwrap();

        assert_eq!(key, ContentDigest::compute(b"abc123").to_hex());
        assert!(!key.contains(':'));
        assert_eq!(d.cask.dispatcher().resolve_for_read("default"), "default");
        let content = d
            .cask
            .read_blob(&BlobInfo::from_key(&key), &doc, MAIN_BLOB_XPATH)
            .unwrap();
        assert_eq!(&content[..], b"abc123");
    }

    #[test]
    fn rules_redirect_and_prefix_keys() {
        let d = deployment(MEDIA);
        let mut doc = InMemoryDocument::new("doc", "default");

        let video = d.attach(
            &mut doc,
            MAIN_BLOB_XPATH,
            NewBlob::new(&b"frames"[..]).with_mime_type("video/mp4"),
        );
        assert!(video.key().starts_with("videos:"));
        assert_eq!(video.provider_id(), "videos");
        assert!(d.stored("videos", &video));

        let note = d.attach(&mut doc, "files:files/0/file", text("notes"));
        assert!(note.key().starts_with("other:"));
        assert_eq!(note.provider_id(), "other");
    }

    #[test]
    fn round_trip_preserves_content_and_metadata() {
        let d = deployment(MEDIA);
        let mut doc = InMemoryDocument::new("doc", "default");
        let blob = NewBlob::new(&b"\x00\x01binary\xff"[..])
            .with_mime_type("video/webm")
            .with_filename("clip.webm");
        let stored = d.attach(&mut doc, MAIN_BLOB_XPATH, blob.clone());

        let content = d.cask.read_blob(&stored.info(), &doc, MAIN_BLOB_XPATH).unwrap();
        assert_eq!(content, blob.content);
        let again = d.cask.read_blob_ref(&stored.info(), "default").unwrap();
        assert_eq!(again, stored);
        assert_eq!(again.mime_type(), Some("video/webm"));
    }

    #[test]
    fn rewriting_the_same_blob_keeps_its_key() {
        let d = deployment(MEDIA);
        let mut doc = InMemoryDocument::new("doc", "default");
        let stored = d.attach(&mut doc, MAIN_BLOB_XPATH, text("stable"));

        for _ in 0..3 {
            let key = d
                .cask
                .write_blob(&Blob::Managed(stored.clone()), &doc, MAIN_BLOB_XPATH)
                .unwrap();
            assert_eq!(key, stored.key());
        }
        assert_eq!(d.storages.storage("other").len(), 1);
    }

    #[test]
    fn managed_blob_moves_when_dispatch_changes() {
        let d = deployment(MEDIA);
        let doc = InMemoryDocument::new("doc", "default");
        let stored = d.attach(
            &mut doc.clone(),
            MAIN_BLOB_XPATH,
            NewBlob::new(&b"frames"[..]).with_mime_type("video/mp4"),
        );
        let relabeled = stored.clone().with_metadata(cask_types::BlobMetadata {
            mime_type: Some("text/plain".into()),
            ..Default::default()
        });

        let key = d
            .cask
            .write_blob(&Blob::Managed(relabeled), &doc, MAIN_BLOB_XPATH)
            .unwrap();
        assert_eq!(key, format!("other:{}", stored.local_key()));
        assert!(d.storages.storage("other").contains(stored.local_key()));
    }

    #[test]
    fn external_blobs_are_never_rewritten() {
        let d = deployment(MEDIA);
        let doc = InMemoryDocument::new("doc", "default");
        let legacy = d.cask.registry().get("legacy").unwrap();
        let metadata = cask_types::BlobMetadata::default();
        let local = legacy
            .write_blob(&BlobContext::new(b"old", &metadata, &doc, MAIN_BLOB_XPATH))
            .unwrap();
        let external = BlobRef::new(format!("legacy:{local}"), "legacy");

        let key = d
            .cask
            .write_blob(&Blob::Managed(external.clone()), &doc, MAIN_BLOB_XPATH)
            .unwrap();
        assert_eq!(key, external.key());
        assert!(d.storages.storage("other").is_empty());
    }

    #[test]
    fn transient_blobs_are_always_rewritten() {
        let d = deployment(
            r#"
            [[providers]]
            name = "scratch"
            kind = "memory"
            properties = { transient = "true" }

            [[dispatch.rules]]
            clauses = "default"
            provider = "scratch"
            "#,
        );
        let mut doc = InMemoryDocument::new("doc", "default");
        let stored = d.attach(&mut doc, MAIN_BLOB_XPATH, text("temp"));
        let key = d
            .cask
            .write_blob(&Blob::Managed(stored.clone()), &doc, MAIN_BLOB_XPATH)
            .unwrap();
        assert_ne!(key, stored.key());
        assert!(key.starts_with("scratch:"));
    }

    #[test]
    fn read_failures() {
        let d = deployment(SINGLE);
        let doc = InMemoryDocument::new("doc", "default");
        assert!(matches!(
            d.cask.read_blob(&BlobInfo::from_key("ghost:abc"), &doc, MAIN_BLOB_XPATH),
            Err(BlobError::UnknownProvider(id)) if id == "ghost"
        ));
        assert!(matches!(
            d.cask.read_blob(&BlobInfo::from_key("missing"), &doc, MAIN_BLOB_XPATH),
            Err(BlobError::NotFound(_))
        ));
        assert!(matches!(
            d.cask.read_blob_ref(&BlobInfo::from_key("ghost:abc"), "default"),
            Err(BlobError::UnknownProvider(_))
        ));
    }

    #[test]
    fn set_dispatcher_takes_effect() {
        let d = deployment(MEDIA);
        let doc = InMemoryDocument::new("doc", "default");
        d.cask.set_dispatcher(Arc::new(
            DefaultBlobDispatcher::from_descriptor(
                &DispatchDescriptor::new().with_rule(DEFAULT_CLAUSE, "legacy"),
            )
            .unwrap(),
        ));
        let key = d
            .cask
            .write_blob(
                &NewBlob::new(&b"x"[..]).with_mime_type("video/mp4").into(),
                &doc,
                MAIN_BLOB_XPATH,
            )
            .unwrap();
        assert!(key.starts_with("legacy:"));
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    #[test]
    fn misconfiguration_fails_at_startup() {
        let undeclared = r#"
            [[dispatch.rules]]
            clauses = "a=1"
            provider = "nowhere"

            [[dispatch.rules]]
            clauses = "default"
            provider = "nowhere"
        "#;
        let no_default = r#"
            [[providers]]
            name = "p"
            kind = "memory"

            [[dispatch.rules]]
            clauses = "a=1"
            provider = "p"
        "#;
        let bad_flag = r#"
            [[providers]]
            name = "p"
            kind = "memory"
            properties = { record = "sometimes" }
        "#;
        let bad_kind = r#"
            [[providers]]
            name = "p"
            kind = "s3"
        "#;
        let bad_clause = r#"
            [[providers]]
            name = "p"
            kind = "memory"

            [[dispatch.rules]]
            clauses = "blob:name^(oops"
            provider = "p"

            [[dispatch.rules]]
            clauses = "default"
            provider = "p"
        "#;
        for toml in [undeclared, no_default, bad_flag, bad_kind, bad_clause] {
            let err = try_deployment(toml, ProviderFactories::with_defaults).err().unwrap();
            assert!(matches!(err, BlobError::Configuration(_)), "{err}");
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle notifications
    // -----------------------------------------------------------------------

    const LIFECYCLE: &str = r#"
        [[providers]]
        name = "drafts"
        kind = "memory"
        properties = { record = "true" }

        [[providers]]
        name = "approved"
        kind = "memory"

        [[providers]]
        name = "scratch"
        kind = "memory"

        [[dispatch.rules]]
        clauses = "dc:lifecycle=approved"
        provider = "approved"

        [[dispatch.rules]]
        clauses = "dc:lifecycle=archived"
        provider = "scratch"

        [[dispatch.rules]]
        clauses = "default"
        provider = "drafts"
    "#;

    #[test]
    fn lifecycle_change_migrates_and_drops_record_copy() {
        let d = deployment(LIFECYCLE);
        let mut doc = InMemoryDocument::new("doc", "default").with_property("dc:lifecycle", "project");
        let draft = d.attach(&mut doc, MAIN_BLOB_XPATH, text("the plan"));
        assert_eq!(draft.provider_id(), "drafts");

        doc.set_property("dc:lifecycle", "approved");
        assert_eq!(d.cask.notify_changes(&mut doc, ["dc:lifecycle"]).unwrap(), 1);

        let moved = doc.main_blob().unwrap();
        assert_eq!(moved.provider_id(), "approved");
        assert_eq!(
            moved.key(),
            format!("approved:{}", ContentDigest::compute(b"the plan").to_hex())
        );
        assert!(d.stored("approved", &moved));
        assert!(!d.stored("drafts", &draft));
        let content = d.cask.read_blob(&moved.info(), &doc, MAIN_BLOB_XPATH).unwrap();
        assert_eq!(&content[..], b"the plan");
    }

    #[test]
    fn migration_keeps_copy_in_plain_provider() {
        let d = deployment(LIFECYCLE);
        let mut doc = InMemoryDocument::new("doc", "default").with_property("dc:lifecycle", "approved");
        let approved = d.attach(&mut doc, MAIN_BLOB_XPATH, text("final"));

        doc.set_property("dc:lifecycle", "archived");
        assert_eq!(d.cask.notify_changes(&mut doc, vec!["dc:lifecycle".to_string()]).unwrap(), 1);
        assert_eq!(doc.main_blob().unwrap().provider_id(), "scratch");
        assert!(d.stored("approved", &approved));
    }

    #[test]
    fn unrelated_changes_do_not_redispatch() {
        let d = deployment(LIFECYCLE);
        let mut doc = InMemoryDocument::new("doc", "default").with_property("dc:lifecycle", "project");
        let draft = d.attach(&mut doc, MAIN_BLOB_XPATH, text("the plan"));
        doc.set_property("dc:lifecycle", "approved");

        assert_eq!(d.cask.notify_changes(&mut doc, ["dc:title"]).unwrap(), 0);
        assert_eq!(doc.main_blob().unwrap(), draft);
    }

    #[test]
    fn migration_of_held_document_keeps_record_copy() {
        let d = deployment(LIFECYCLE);
        let mut doc = InMemoryDocument::new("doc", "default").with_property("dc:lifecycle", "project");
        let draft = d.attach(&mut doc, "files:files/0/file", text("attachment"));
        doc.set_under_hold(true);
        doc.set_property("dc:lifecycle", "approved");

        assert_eq!(d.cask.notify_changes(&mut doc, ["dc:lifecycle"]).unwrap(), 1);
        assert_eq!(doc.blob("files:files/0/file").unwrap().provider_id(), "approved");
        assert!(d.stored("drafts", &draft));
    }

    #[test]
    fn make_record_redispatches_main_blob() {
        let d = deployment(RECORDS);
        let mut doc = InMemoryDocument::new("doc", "default");
        let plain = d.attach(&mut doc, MAIN_BLOB_XPATH, text("contract"));
        assert_eq!(plain.provider_id(), "plain");

        doc.set_record(true);
        assert!(d.cask.notify_make_record(&mut doc).unwrap());
        let record = doc.main_blob().unwrap();
        assert_eq!(record.provider_id(), "records");
        assert!(d.stored("records", &record));
        assert!(d.stored("plain", &plain));

        assert!(!d.cask.notify_make_record(&mut doc).unwrap());
    }

    #[test]
    fn held_record_cannot_be_replaced_or_removed() {
        let d = deployment(RECORDS);
        let mut doc = InMemoryDocument::new("doc", "default");
        doc.set_record(true);
        let record = d.attach(&mut doc, MAIN_BLOB_XPATH, text("contract v1"));
        doc.set_under_hold(true);

        let err = d
            .cask
            .write_blob(&text("contract v2").into(), &doc, MAIN_BLOB_XPATH)
            .unwrap_err();
        assert!(matches!(err, BlobError::RetentionViolation(_)));
        assert!(matches!(
            d.cask.notify_before_remove(&doc),
            Err(BlobError::RetentionViolation(_))
        ));
        assert!(d.stored("records", &record));

        // Secondary properties are not protected.
        d.cask
            .write_blob(&text("annex").into(), &doc, "files:files/0/file")
            .unwrap();
    }

    #[test]
    fn held_document_in_plain_provider_is_unaffected() {
        let d = deployment(RECORDS);
        let mut doc = InMemoryDocument::new("doc", "default");
        d.attach(&mut doc, MAIN_BLOB_XPATH, text("memo v1"));
        doc.set_under_hold(true);

        d.cask
            .write_blob(&text("memo v2").into(), &doc, MAIN_BLOB_XPATH)
            .unwrap();
        d.cask.notify_before_remove(&doc).unwrap();
    }

    #[test]
    fn removal_deletes_record_content() {
        let d = deployment(RECORDS);
        let mut doc = InMemoryDocument::new("doc", "default");
        doc.set_record(true);
        let record = d.attach(&mut doc, MAIN_BLOB_XPATH, text("expired contract"));

        d.cask.notify_before_remove(&doc).unwrap();
        assert!(!d.stored("records", &record));
    }

    #[test]
    fn retention_and_hold_are_forwarded_to_the_provider() {
        let d = deployment(RECORDS);
        let mut doc = InMemoryDocument::new("doc", "default");
        doc.set_record(true);
        let record = d.attach(&mut doc, MAIN_BLOB_XPATH, text("contract"));

        d.cask.notify_set_legal_hold(&doc, true).unwrap();
        assert!(matches!(
            d.cask.notify_before_remove(&doc),
            Err(BlobError::RetentionViolation(_))
        ));
        d.cask.notify_set_legal_hold(&doc, false).unwrap();

        let until = Utc::now() + chrono::Duration::days(30);
        d.cask.notify_set_retain_until(&doc, Some(until)).unwrap();
        assert!(d.cask.notify_before_remove(&doc).is_err());
        d.cask.notify_set_retain_until(&doc, None).unwrap();

        d.cask.notify_before_remove(&doc).unwrap();
        assert!(!d.stored("records", &record));

        let bare = InMemoryDocument::new("empty", "default");
        d.cask.notify_set_legal_hold(&bare, true).unwrap();
    }

    #[test]
    fn copy_of_record_gets_its_own_content() {
        let d = deployment(RECORDS);
        let mut original = InMemoryDocument::new("doc", "default");
        original.set_record(true);
        let stored = d.attach(&mut original, MAIN_BLOB_XPATH, text("signed"));

        let mut copy = original.copy_as("doc-copy");
        assert!(d.cask.notify_after_copy(&mut copy).unwrap());
        let copied = copy.main_blob().unwrap();
        assert_eq!(copied.provider_id(), "records");
        assert_ne!(copied.key(), stored.key());

        d.cask.notify_before_remove(&original).unwrap();
        assert!(!d.stored("records", &stored));
        let content = d.cask.read_blob(&copied.info(), &copy, MAIN_BLOB_XPATH).unwrap();
        assert_eq!(&content[..], b"signed");
    }

    #[test]
    fn copy_of_transient_record_gets_its_own_content() {
        let d = deployment(
            r#"
            [[providers]]
            name = "records"
            kind = "memory"
            properties = { record = "true", transient = "true" }

            [[dispatch.rules]]
            clauses = "default"
            provider = "records"
            "#,
        );
        let mut original = InMemoryDocument::new("doc", "default");
        let stored = d.attach(&mut original, MAIN_BLOB_XPATH, text("signed"));

        let mut copy = original.copy_as("doc-copy");
        assert!(d.cask.notify_after_copy(&mut copy).unwrap());
        let copied = copy.main_blob().unwrap();
        assert_ne!(copied.key(), stored.key());

        d.cask.notify_before_remove(&original).unwrap();
        let content = d.cask.read_blob(&copied.info(), &copy, MAIN_BLOB_XPATH).unwrap();
        assert_eq!(&content[..], b"signed");
    }

    #[test]
    fn removing_a_record_keeps_identical_content_of_another() {
        let d = deployment(RECORDS);
        let mut first = InMemoryDocument::new("a", "default");
        first.set_record(true);
        let mut second = InMemoryDocument::new("b", "default");
        second.set_record(true);
        let a = d.attach(&mut first, MAIN_BLOB_XPATH, text("same"));
        let b = d.attach(&mut second, MAIN_BLOB_XPATH, text("same"));
        assert_ne!(a.key(), b.key());

        d.cask.notify_before_remove(&first).unwrap();
        assert!(!d.stored("records", &a));
        let content = d.cask.read_blob(&b.info(), &second, MAIN_BLOB_XPATH).unwrap();
        assert_eq!(&content[..], b"same");
    }

    #[test]
    fn copy_of_plain_blob_shares_content() {
        let d = deployment(SINGLE);
        let mut original = InMemoryDocument::new("doc", "default");
        let stored = d.attach(&mut original, MAIN_BLOB_XPATH, text("shared"));
        let mut copy = original.copy_as("doc-copy");
        assert!(!d.cask.notify_after_copy(&mut copy).unwrap());
        assert_eq!(copy.main_blob().unwrap(), stored);
    }

    /// Memory provider that pins blobs to the document they were frozen for.
    struct Versioned(InMemoryBlobProvider);

    impl BlobProvider for Versioned {
        fn initialize(&mut self, id: &str, properties: &ProviderProperties) -> ProviderResult<()> {
            self.0.initialize(id, properties)
        }

        fn close(&self) {
            self.0.close();
        }

        fn read_blob(&self, info: &BlobInfo) -> ProviderResult<Bytes> {
            self.0.read_blob(info)
        }

        fn write_blob(&self, ctx: &BlobContext<'_>) -> ProviderResult<String> {
            self.0.write_blob(ctx)
        }

        fn delete_blob(&self, ctx: &BlobUpdateContext) -> ProviderResult<()> {
            self.0.delete_blob(ctx)
        }

        fn is_version(&self, blob: &BlobRef) -> bool {
            blob.key().contains('@')
        }

        fn freeze_version(&self, blob: &BlobRef, doc: &dyn Document) -> ProviderResult<Option<BlobRef>> {
            if self.is_version(blob) {
                return Ok(None);
            }
            let key = format!("{}@{}", blob.key(), doc.id());
            Ok(Some(blob.rekeyed(key, blob.provider_id())))
        }
    }

    #[test]
    fn freeze_version_replaces_frozen_blobs() {
        let d = try_deployment(
            r#"
            [[providers]]
            name = "default"
            kind = "versioned"

            [[providers]]
            name = "plain"
            kind = "memory"
            "#,
            |storages| {
                let mut factories = ProviderFactories::with_defaults(Arc::clone(&storages));
                factories.register("versioned", move || {
                    Box::new(Versioned(InMemoryBlobProvider::new(Arc::clone(&storages))))
                });
                factories
            },
        )
        .unwrap();

        let mut doc = InMemoryDocument::new("v1", "default");
        let main = d.attach(&mut doc, MAIN_BLOB_XPATH, text("draft"));
        let plain = BlobRef::new("k", "plain");
        doc.set_blob("files:files/0/file", plain.clone());

        assert_eq!(d.cask.freeze_version(&mut doc).unwrap(), 1);
        assert_eq!(doc.main_blob().unwrap().key(), format!("{}@v1", main.key()));
        assert_eq!(doc.blob("files:files/0/file").unwrap(), plain);
        assert_eq!(d.cask.freeze_version(&mut doc).unwrap(), 0);
    }

    // -----------------------------------------------------------------------
    // Garbage collection
    // -----------------------------------------------------------------------

    #[test]
    fn garbage_collection_keeps_referenced_blobs() {
        let d = deployment(MEDIA);
        let mut doc = InMemoryDocument::new("doc", "default");
        let kept = d.attach(
            &mut doc,
            MAIN_BLOB_XPATH,
            NewBlob::new(&b"frames"[..]).with_mime_type("video/mp4"),
        );
        let mut scratch = InMemoryDocument::new("scratch", "default");
        let dropped = d.attach(&mut scratch, MAIN_BLOB_XPATH, text("discarded"));
        d.repositories.add_document(doc);

        assert!(!d.cask.is_binaries_garbage_collection_in_progress());
        let stats = d.cask.garbage_collect_binaries(true).unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.count_deleted, 1);
        assert!(d.stored("videos", &kept));
        assert!(!d.stored("other", &dropped));

        let again = d.cask.garbage_collect_binaries(true).unwrap();
        assert_eq!(again.count_deleted, 0);
    }

    #[test]
    fn concurrent_collection_is_refused() {
        let d = deployment(SINGLE);
        let collector = d
            .cask
            .registry()
            .get("default")
            .unwrap()
            .garbage_collector()
            .unwrap();
        collector.start().unwrap();

        assert!(d.cask.is_binaries_garbage_collection_in_progress());
        let err = d.cask.garbage_collect_binaries(false).unwrap_err();
        assert!(matches!(err, BlobError::AlreadyRunning));
        assert!(err.is_retryable());

        collector.reset();
        d.cask.garbage_collect_binaries(false).unwrap();
    }

    #[test]
    fn marks_outside_a_cycle_are_harmless() {
        let d = deployment(SINGLE);
        d.cask.mark_referenced_binary("anything", "default");
        assert!(!d.cask.is_binaries_garbage_collection_in_progress());
    }

    #[test]
    fn close_closes_providers() {
        let d = deployment(SINGLE);
        d.cask.close();
        assert!(d.cask.registry().all_ids().is_empty());
    }
}
