use facecheck_core::{
    AnalyzeError, BgrImage, FaceAnalyzer, FaceDetection, InsightPack, ModelInitError, PackConfig,
};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, OnceCell};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("inference panicked: {0}")]
    Panicked(String),
}

/// Builds the analyzer. Runs once, on the engine thread.
pub type AnalyzerLoader =
    Arc<dyn Fn() -> Result<Box<dyn FaceAnalyzer>, ModelInitError> + Send + Sync>;

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Embed {
        image: BgrImage,
        reply: oneshot::Sender<Result<Vec<FaceDetection>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// The thread owns the analyzer exclusively, so concurrent callers are
/// served one at a time in arrival order.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Detect and embed every face in `image`. Empty when there is none.
    pub async fn embed(&self, image: BgrImage) -> Result<Vec<FaceDetection>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Embed {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Whether both handles talk to the same engine thread.
    pub fn same_engine(&self, other: &EngineHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The analyzer is built on that thread so model loading never blocks the
/// async runtime. Resolves once the analyzer is ready, or with the load
/// error if it could not be built.
pub async fn spawn_engine(load: AnalyzerLoader) -> Result<EngineHandle, ModelInitError> {
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), ModelInitError>>();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facecheck-engine".into())
        .spawn(move || {
            let mut analyzer = match load() {
                Ok(analyzer) => analyzer,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            tracing::info!("engine thread started");

            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Embed { image, reply } => {
                        // a panic fails this request only; the thread keeps serving
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| analyzer.analyze(&image)));
                        let result = match outcome {
                            Ok(analyzed) => analyzed.map_err(EngineError::from),
                            Err(payload) => {
                                let message = panic_message(&*payload);
                                tracing::error!(error = %message, "inference panicked");
                                Err(EngineError::Panicked(message))
                            }
                        };
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(|e| ModelInitError::Unavailable(format!("spawn engine thread: {e}")))?;

    ready_rx
        .await
        .map_err(|_| ModelInitError::Unavailable("engine thread exited during init".into()))??;

    Ok(EngineHandle { tx })
}

/// Text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}

/// Lazily builds the engine once per process and hands out its handle.
///
/// Concurrent first callers wait on the single construction. A failed
/// construction is remembered and returned to every later caller; it is
/// not retried.
pub struct ModelProvider {
    cell: OnceCell<Result<EngineHandle, ModelInitError>>,
    loader: AnalyzerLoader,
}

impl ModelProvider {
    pub fn new(
        loader: impl Fn() -> Result<Box<dyn FaceAnalyzer>, ModelInitError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            cell: OnceCell::new(),
            loader: Arc::new(loader),
        }
    }

    /// Provider for the production InsightFace pack.
    pub fn insight(config: PackConfig) -> Self {
        Self::new(move || {
            InsightPack::load(&config).map(|pack| Box::new(pack) as Box<dyn FaceAnalyzer>)
        })
    }

    pub async fn get(&self) -> Result<EngineHandle, ModelInitError> {
        self.cell
            .get_or_init(|| async {
                let started = Instant::now();
                let result = spawn_engine(self.loader.clone()).await;
                match &result {
                    Ok(_) => tracing::info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "face models ready"
                    ),
                    Err(e) => tracing::error!(error = %e, "face model initialization failed"),
                }
                result
            })
            .await
            .clone()
    }

    /// Whether construction has been attempted.
    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{face, solid_image, ScriptedAnalyzer};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_provider(analyzer: ScriptedAnalyzer, loads: Arc<AtomicUsize>) -> ModelProvider {
        ModelProvider::new(move || {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(analyzer.clone()) as Box<dyn FaceAnalyzer>)
        })
    }

    #[tokio::test]
    async fn test_get_twice_returns_cached_handle() {
        let loads = Arc::new(AtomicUsize::new(0));
        let provider = counting_provider(ScriptedAnalyzer::default(), loads.clone());
        assert!(!provider.is_initialized());

        let a = provider.get().await.unwrap();
        let b = provider.get().await.unwrap();

        assert!(a.same_engine(&b));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(provider.is_initialized());
    }

    #[tokio::test]
    async fn test_concurrent_first_calls_build_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let provider = counting_provider(ScriptedAnalyzer::default(), loads.clone());

        let (a, b, c) = tokio::join!(provider.get(), provider.get(), provider.get());
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

        assert!(a.same_engine(&b) && b.same_engine(&c));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_init_failure_is_cached() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let provider = ModelProvider::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ModelInitError::Recognizer("glintr100.onnx missing".into()))
        });

        for _ in 0..3 {
            let err = provider.get().await.err().unwrap();
            assert!(matches!(err, ModelInitError::Recognizer(_)));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_embed_runs_analyzer() {
        let analyzer = ScriptedAnalyzer::default().with(7, vec![face(10.0, 10.0, vec![1.0, 0.0])]);
        let provider = counting_provider(analyzer, Arc::new(AtomicUsize::new(0)));
        let engine = provider.get().await.unwrap();

        let faces = engine.embed(solid_image(7)).await.unwrap();
        assert_eq!(faces.len(), 1);

        let none = engine.embed(solid_image(8)).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_loader_reports_unavailable() {
        let provider = ModelProvider::new(|| panic!("runtime library missing"));
        let err = provider.get().await.err().unwrap();
        assert!(matches!(err, ModelInitError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_inference_panic_fails_one_request_only() {
        let analyzer = ScriptedAnalyzer::default()
            .with(7, vec![face(10.0, 10.0, vec![1.0, 0.0])])
            .panicking_on(9);
        let provider = counting_provider(analyzer, Arc::new(AtomicUsize::new(0)));
        let engine = provider.get().await.unwrap();

        let err = engine.embed(solid_image(9)).await.unwrap_err();
        let EngineError::Panicked(message) = err else {
            panic!("expected panic error, got {err:?}");
        };
        assert!(message.contains("tag 9"), "{message}");

        // same cached handle, same thread, still serving
        let again = provider.get().await.unwrap();
        assert!(again.same_engine(&engine));
        assert_eq!(again.embed(solid_image(7)).await.unwrap().len(), 1);
    }

    /// Records how many `analyze` calls are in flight at once.
    #[derive(Clone, Default)]
    struct OverlapRecorder {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        calls: Arc<AtomicUsize>,
    }

    impl FaceAnalyzer for OverlapRecorder {
        fn analyze(&mut self, _image: &BgrImage) -> Result<Vec<FaceDetection>, AnalyzeError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_embeds_are_serialized() {
        let recorder = OverlapRecorder::default();
        let loaded = recorder.clone();
        let provider =
            ModelProvider::new(move || Ok(Box::new(loaded.clone()) as Box<dyn FaceAnalyzer>));
        let engine = provider.get().await.unwrap();

        let (a, b, c, d, e, f) = tokio::join!(
            engine.embed(solid_image(1)),
            engine.embed(solid_image(2)),
            engine.embed(solid_image(3)),
            engine.embed(solid_image(4)),
            engine.embed(solid_image(5)),
            engine.embed(solid_image(6)),
        );
        for r in [a, b, c, d, e, f] {
            assert!(r.unwrap().is_empty());
        }

        assert_eq!(recorder.calls.load(Ordering::SeqCst), 6);
        assert_eq!(recorder.peak.load(Ordering::SeqCst), 1);
    }
}
