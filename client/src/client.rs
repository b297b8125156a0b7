//! Protocol client — owns the transport session and the document registry.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc, oneshot};

use crate::diagnostics::DiagnosticsStore;
use crate::documents::{self, DocumentRegistry, OpenDocument};
use crate::protocol::{self, Incoming, Notification, Request};
use crate::types::{ClientConfig, ClientError, Diagnostic, Position};

/// One JSON-RPC object per message, in each direction.
///
/// The WebSocket (or any other message-oriented pipe) lives on the other side
/// of these channels; the client neither frames nor unframes anything.
pub struct Transport {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

/// Seam between the client and whatever opens its transport.
pub trait Connect {
    fn connect(&mut self) -> impl Future<Output = Result<Transport, ClientError>> + Send;
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<serde_json::Value, ClientError>>>>>;
type ObserverSlot = Arc<std::sync::Mutex<Option<Arc<dyn Fn(&str, &[Diagnostic]) + Send + Sync>>>>;
type SharedDiagnostics = Arc<std::sync::Mutex<DiagnosticsStore>>;

/// Request/notification half of a session, shared with nothing but the
/// reader task's pending map.
struct Wire {
    outbound: mpsc::Sender<String>,
    pending: PendingMap,
    next_id: AtomicU64,
}

impl Wire {
    fn new(outbound: mpsc::Sender<String>) -> Self {
        Self {
            outbound,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    async fn request(
        &self,
        timeout: std::time::Duration,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = serde_json::to_string(&Request::new(id, method, params))?;
        if self.outbound.send(frame).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(ClientError::ConnectionClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                Err(ClientError::ConnectionClosed)
            }
            Err(_) => {
                // Remove the entry so repeated failures don't grow the map.
                self.pending.lock().await.remove(&id);
                Err(ClientError::Timeout)
            }
        }
    }

    async fn notify(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<(), ClientError> {
        let frame = serde_json::to_string(&Notification::new(method, params))?;
        self.outbound
            .send(frame)
            .await
            .map_err(|_| ClientError::ConnectionClosed)
    }
}

struct Session {
    wire: Arc<Wire>,
    documents: DocumentRegistry,
    closed: Arc<AtomicBool>,
    reader: tokio::task::JoinHandle<()>,
}

/// One instance per active project session; owns exactly one transport and
/// the full multi-document registry for that session.
pub struct ProtocolClient<C: Connect> {
    config: ClientConfig,
    connector: C,
    session: Option<Session>,
    diagnostics: SharedDiagnostics,
    observer: ObserverSlot,
    state_listener: Option<Box<dyn Fn(bool) + Send + Sync>>,
}

impl<C: Connect> ProtocolClient<C> {
    #[must_use]
    pub fn new(config: ClientConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            session: None,
            diagnostics: Arc::new(std::sync::Mutex::new(DiagnosticsStore::new())),
            observer: Arc::new(std::sync::Mutex::new(None)),
            state_listener: None,
        }
    }

    /// Observer for server-pushed diagnostics, called with the document uri
    /// and the full replacement set for that uri.
    pub fn set_diagnostics_observer(
        &mut self,
        observer: impl Fn(&str, &[Diagnostic]) + Send + Sync + 'static,
    ) {
        if let Ok(mut slot) = self.observer.lock() {
            *slot = Some(Arc::new(observer));
        }
    }

    /// Listener fired `true` before the initialize handshake and `false`
    /// once it settles, successfully or not. Consumers drive a "waiting"
    /// indicator off it.
    pub fn set_state_listener(&mut self, listener: impl Fn(bool) + Send + Sync + 'static) {
        self.state_listener = Some(Box::new(listener));
    }

    /// Open the transport and run the initialize handshake.
    ///
    /// No-op if the session is already up.
    pub async fn initialize(&mut self) -> Result<(), ClientError> {
        if self.live_session().is_some() {
            return Ok(());
        }

        self.notify_state(true);
        let result = self.open_session().await;
        self.notify_state(false);
        result
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| !s.closed.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn is_document_open(&self, path: &str) -> bool {
        let key = documents::normalize_path(path);
        self.session
            .as_ref()
            .filter(|s| !s.closed.load(Ordering::SeqCst))
            .is_some_and(|s| s.documents.contains(&key))
    }

    /// Open a document at version 0 and announce it to the server.
    ///
    /// No-op if the same (normalized) path is already open.
    pub async fn open_document(&mut self, path: &str, content: &str) -> Result<(), ClientError> {
        let Some(session) = self.live_session() else {
            tracing::debug!(path, "open_document before initialize is a no-op");
            return Ok(());
        };

        let key = documents::normalize_path(path);
        if session.documents.contains(&key) {
            return Ok(());
        }

        let uri = documents::path_to_uri(&key);
        // Registry first, notification second: per-document ordering follows
        // registry state.
        session.documents.insert(
            key,
            OpenDocument {
                uri: uri.clone(),
                version: 0,
                text: content.to_string(),
            },
        );
        let params = protocol::did_open_params(&uri, documents::LANGUAGE_ID, 0, content);
        session
            .wire
            .notify("textDocument/didOpen", Some(params))
            .await
    }

    /// Replace a document's content, announcing the minimal incremental
    /// change. Updating an untracked path opens it instead.
    pub async fn update_document(
        &mut self,
        path: &str,
        new_content: &str,
    ) -> Result<(), ClientError> {
        let key = documents::normalize_path(path);

        let is_open = match self.live_session() {
            Some(session) => session.documents.contains(&key),
            None => {
                tracing::debug!(path, "update_document before initialize is a no-op");
                return Ok(());
            }
        };
        if !is_open {
            // Implicit auto-open: callers may update without opening first.
            return self.open_document(path, new_content).await;
        }

        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let Some(doc) = session.documents.get_mut(&key) else {
            return Ok(());
        };

        let Some(delta) = documents::compute_delta(&doc.text, new_content) else {
            // Unchanged content: no version bump, no notification.
            return Ok(());
        };

        doc.version += 1;
        doc.text = new_content.to_string();
        let params = protocol::did_change_params(&doc.uri, doc.version, delta.range, &delta.text);
        session
            .wire
            .notify("textDocument/didChange", Some(params))
            .await
    }

    /// Close a document and drop it from the registry. No-op if not open.
    pub async fn close_document(&mut self, path: &str) -> Result<(), ClientError> {
        let key = documents::normalize_path(path);
        let Some(session) = self.live_session() else {
            return Ok(());
        };
        let Some(doc) = session.documents.remove(&key) else {
            return Ok(());
        };

        let params = protocol::did_close_params(&doc.uri);
        session
            .wire
            .notify("textDocument/didClose", Some(params))
            .await
    }

    /// Announce a save with the document's current full content. No-op if
    /// not open.
    pub async fn notify_document_saved(&mut self, path: &str) -> Result<(), ClientError> {
        let key = documents::normalize_path(path);
        let Some(session) = self.live_session() else {
            return Ok(());
        };
        let Some(doc) = session.documents.get(&key) else {
            return Ok(());
        };

        let params = protocol::did_save_params(&doc.uri, &doc.text);
        session
            .wire
            .notify("textDocument/didSave", Some(params))
            .await
    }

    /// Hover information at a position, or `None` when nothing is available.
    pub async fn hover(&self, path: &str, line: u32, character: u32) -> Option<serde_json::Value> {
        self.feature_request("textDocument/hover", path, |uri| {
            protocol::position_params(uri, Position { line, character })
        })
        .await
    }

    /// Completion candidates at a position, or `None`.
    pub async fn completion(
        &self,
        path: &str,
        line: u32,
        character: u32,
    ) -> Option<serde_json::Value> {
        self.feature_request("textDocument/completion", path, |uri| {
            protocol::position_params(uri, Position { line, character })
        })
        .await
    }

    /// Signature help at a position, or `None`.
    pub async fn signature_help(
        &self,
        path: &str,
        line: u32,
        character: u32,
    ) -> Option<serde_json::Value> {
        self.feature_request("textDocument/signatureHelp", path, |uri| {
            protocol::position_params(uri, Position { line, character })
        })
        .await
    }

    /// Workspace edits renaming the symbol at a position, or `None`.
    pub async fn rename_edits(
        &self,
        path: &str,
        line: u32,
        character: u32,
        new_name: &str,
    ) -> Option<serde_json::Value> {
        self.feature_request("textDocument/rename", path, |uri| {
            protocol::rename_params(uri, Position { line, character }, new_name)
        })
        .await
    }

    /// Resolve extra detail for a completion item.
    ///
    /// Unless the server is configured as supporting `completionItem/resolve`,
    /// the item is returned unchanged without touching the wire — the Arduino
    /// language server faults on the request.
    pub async fn resolve_completion_item(&self, item: serde_json::Value) -> serde_json::Value {
        if !self.config.supports_completion_resolve {
            return item;
        }
        let Some(session) = self.live_session_ref() else {
            return item;
        };
        match session
            .wire
            .request(
                self.config.request_timeout,
                "completionItem/resolve",
                Some(item.clone()),
            )
            .await
        {
            Ok(value) if !value.is_null() => value,
            Ok(_) => item,
            Err(e) => {
                tracing::debug!("completionItem/resolve degraded to passthrough: {e}");
                item
            }
        }
    }

    /// Latest diagnostics published for a document path.
    #[must_use]
    pub fn diagnostics_for(&self, path: &str) -> Vec<Diagnostic> {
        let uri = documents::path_to_uri(&documents::normalize_path(path));
        self.diagnostics
            .lock()
            .map(|store| store.get(&uri))
            .unwrap_or_default()
    }

    /// Close every open document, then tear down the transport.
    ///
    /// All outstanding requests reject with a connection-closed error.
    /// Subsequent operations are no-ops until [`initialize`](Self::initialize)
    /// is called again.
    pub async fn disconnect(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        for doc in session.documents.drain() {
            let params = protocol::did_close_params(&doc.uri);
            if let Err(e) = session
                .wire
                .notify("textDocument/didClose", Some(params))
                .await
            {
                tracing::debug!("didClose during disconnect not delivered: {e}");
            }
        }

        session.closed.store(true, Ordering::SeqCst);
        session.reader.abort();

        // The reader normally rejects pending requests when the transport
        // closes; after an abort that duty falls to us.
        let mut pending = session.wire.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(ClientError::ConnectionClosed));
        }
        drop(pending);

        if let Ok(mut store) = self.diagnostics.lock() {
            store.clear();
        }
    }

    async fn open_session(&mut self) -> Result<(), ClientError> {
        let transport = self.connector.connect().await?;

        let wire = Arc::new(Wire::new(transport.outbound));
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(
            transport.inbound,
            wire.pending.clone(),
            wire.outbound.clone(),
            self.diagnostics.clone(),
            self.observer.clone(),
            closed.clone(),
        ));

        let root_uri = root_uri_for(&self.config.project_root);
        let handshake = async {
            wire.request(
                self.config.request_timeout,
                "initialize",
                Some(protocol::initialize_params(&root_uri)),
            )
            .await?;
            wire.notify("initialized", Some(serde_json::json!({})))
                .await
        };

        match handshake.await {
            Ok(()) => {
                self.session = Some(Session {
                    wire,
                    documents: DocumentRegistry::new(),
                    closed,
                    reader,
                });
                Ok(())
            }
            Err(e) => {
                // A failed handshake abandons the transport; flag it closed
                // so a later initialize starts clean.
                closed.store(true, Ordering::SeqCst);
                reader.abort();
                Err(e)
            }
        }
    }

    /// The current session, tearing it down lazily if the reader saw the
    /// transport close.
    fn live_session(&mut self) -> Option<&mut Session> {
        let dead = self
            .session
            .as_ref()
            .is_some_and(|s| s.closed.load(Ordering::SeqCst));
        if dead {
            if let Some(session) = self.session.take() {
                session.reader.abort();
            }
            if let Ok(mut store) = self.diagnostics.lock() {
                store.clear();
            }
        }
        self.session.as_mut()
    }

    fn live_session_ref(&self) -> Option<&Session> {
        self.session
            .as_ref()
            .filter(|s| !s.closed.load(Ordering::SeqCst))
    }

    async fn feature_request(
        &self,
        method: &'static str,
        path: &str,
        make_params: impl FnOnce(&str) -> serde_json::Value,
    ) -> Option<serde_json::Value> {
        let session = self.live_session_ref()?;
        let key = documents::normalize_path(path);
        if !session.documents.contains(&key) {
            tracing::trace!(path, method, "feature query for unopened document");
            return None;
        }

        let uri = documents::path_to_uri(&key);
        let params = make_params(&uri);
        match session
            .wire
            .request(self.config.request_timeout, method, Some(params))
            .await
        {
            Ok(serde_json::Value::Null) => None,
            Ok(value) => Some(value),
            Err(e) => {
                // "No information available", never a hard failure.
                tracing::debug!(method, "feature query degraded to empty: {e}");
                None
            }
        }
    }

    fn notify_state(&self, busy: bool) {
        if let Some(listener) = &self.state_listener {
            listener(busy);
        }
    }

    #[cfg(test)]
    pub(crate) async fn pending_count(&self) -> usize {
        match &self.session {
            Some(session) => session.wire.pending.lock().await.len(),
            None => 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn open_document_count(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.documents.len())
    }
}

fn root_uri_for(path: &Path) -> String {
    if path.is_absolute()
        && let Ok(uri) = url::Url::from_file_path(path)
    {
        return uri.to_string();
    }
    documents::path_to_uri(&documents::normalize_path(&path.to_string_lossy()))
}

/// Inbound dispatch: responses to the pending table, diagnostics to the
/// store/observer, server requests answered with method-not-found.
///
/// When the transport closes, every outstanding request is rejected
/// uniformly and the diagnostics store is dropped.
async fn read_loop(
    mut inbound: mpsc::Receiver<String>,
    pending: PendingMap,
    outbound: mpsc::Sender<String>,
    diagnostics: SharedDiagnostics,
    observer: ObserverSlot,
    closed: Arc<AtomicBool>,
) {
    while let Some(text) = inbound.recv().await {
        let frame: serde_json::Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("dropping unparseable message: {e}");
                continue;
            }
        };
        let Some(incoming) = protocol::parse_incoming(&frame) else {
            tracing::trace!("ignoring malformed JSON-RPC message");
            continue;
        };

        match incoming {
            Incoming::Response { id, result, error } => {
                let sender = pending.lock().await.remove(&id);
                let Some(tx) = sender else {
                    tracing::trace!(id, "response for unknown request id dropped");
                    continue;
                };
                let outcome = match error {
                    Some(err) => Err(ClientError::Protocol {
                        code: err.code,
                        message: err.message,
                    }),
                    None => Ok(result.unwrap_or(serde_json::Value::Null)),
                };
                let _ = tx.send(outcome);
            }
            Incoming::ServerRequest { id, method } => {
                // The server may block waiting for an answer; decline rather
                // than stay silent.
                tracing::debug!(%method, "answering server request with method-not-found");
                let reply = protocol::method_not_found(&id, &method);
                let _ = outbound.send(reply.to_string()).await;
            }
            Incoming::Notification { method, params } => {
                if method == "textDocument/publishDiagnostics" {
                    handle_publish_diagnostics(params, &diagnostics, &observer);
                } else {
                    tracing::trace!(%method, "ignoring notification");
                }
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    let mut pending = pending.lock().await;
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(ClientError::ConnectionClosed));
    }
    drop(pending);
    if let Ok(mut store) = diagnostics.lock() {
        store.clear();
    }
}

fn handle_publish_diagnostics(
    params: Option<serde_json::Value>,
    diagnostics: &SharedDiagnostics,
    observer: &ObserverSlot,
) {
    let Some(params) = params else { return };
    match serde_json::from_value::<protocol::PublishDiagnosticsParams>(params) {
        Ok(publish) => {
            let items: Vec<Diagnostic> = publish
                .diagnostics
                .iter()
                .map(protocol::WireDiagnostic::to_diagnostic)
                .collect();
            if let Ok(mut store) = diagnostics.lock() {
                store.replace(publish.uri.clone(), items.clone());
            }
            let callback = observer.lock().ok().and_then(|slot| slot.clone());
            if let Some(callback) = callback {
                callback(&publish.uri, &items);
            }
        }
        Err(e) => {
            tracing::debug!("failed to parse publishDiagnostics: {e}");
        }
    }
}
