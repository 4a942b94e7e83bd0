//! # Connected Session
//!
//! Purpose: Own one open transport and run exchanges over it, from a blocked
//! caller thread or as a task on the runtime.
//!
//! ## Design Principles
//! 1. **Serialized Exchanges**: The stream sits behind an async mutex, so
//!    overlapping queries run one after another.
//! 2. **Cancel on Teardown**: A watch flag is raised before the stream is
//!    closed; every pending exchange observes it and completes with
//!    `Cancelled`.
//! 3. **No Nested Blocking**: Blocking entry points refuse to run on a thread
//!    that is already driving the runtime.

use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{watch, Mutex};

use hcx_common::{Endpoint, Request, Response, TransportError, TransportResult};

use crate::client::QueryCallback;
use crate::exchange::{exchange, ExchangeLimits};
use crate::observer::{QueryObserver, Stage};
use crate::transport::Transport;

/// Checks that the caller may block on `runtime`.
///
/// Fails with `BlockingContext` when the current thread belongs to a runtime,
/// and with `UnsupportedRuntime` when `runtime` is a current-thread runtime:
/// `Handle::block_on` drives neither its I/O nor its spawned tasks.
pub(crate) fn ensure_blocking_allowed(runtime: &Handle) -> TransportResult<()> {
    if Handle::try_current().is_ok() {
        return Err(TransportError::BlockingContext);
    }
    if runtime.runtime_flavor() == RuntimeFlavor::CurrentThread {
        return Err(TransportError::UnsupportedRuntime);
    }
    Ok(())
}

/// Completes `callback` with `err` on the runtime, never on the caller's stack.
pub(crate) fn reject(runtime: &Handle, callback: QueryCallback, err: TransportError) {
    runtime.spawn(async move { complete(callback, Err(err)) });
}

fn complete(callback: QueryCallback, result: TransportResult<Response>) {
    match result {
        Ok(response) => callback(response, None),
        Err(err) => callback(Response::default(), Some(err)),
    }
}

async fn cancelled(mut flag: watch::Receiver<bool>) {
    loop {
        if *flag.borrow_and_update() {
            return;
        }
        // Sender gone means the session is gone.
        if flag.changed().await.is_err() {
            return;
        }
    }
}

pub(crate) struct Session<S: Transport> {
    stream: Arc<Mutex<Option<S>>>,
    cancel: watch::Sender<bool>,
    runtime: Handle,
    observer: Arc<dyn QueryObserver>,
    limits: ExchangeLimits,
}

impl<S: Transport> Session<S> {
    pub(crate) fn new(
        stream: S,
        runtime: Handle,
        observer: Arc<dyn QueryObserver>,
        limits: ExchangeLimits,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Session {
            stream: Arc::new(Mutex::new(Some(stream))),
            cancel,
            runtime,
            observer,
            limits,
        }
    }

    /// Builds a detached future running one exchange, or `Cancelled` once
    /// teardown begins.
    fn exchange_task(
        &self,
        request: Arc<Request>,
    ) -> impl Future<Output = TransportResult<Response>> + Send + 'static {
        let stream = Arc::clone(&self.stream);
        let observer = Arc::clone(&self.observer);
        let limits = self.limits;
        let flag = self.cancel.subscribe();

        async move {
            let work = async {
                let mut guard = stream.lock().await;
                match guard.as_mut() {
                    Some(stream) => exchange(stream, &request, &limits, observer.as_ref()).await,
                    None => Err(TransportError::NotConnected),
                }
            };
            tokio::select! {
                biased;
                _ = cancelled(flag) => Err(TransportError::Cancelled),
                result = work => result,
            }
        }
    }

    pub(crate) fn query(&self, request: &Request) -> TransportResult<Response> {
        ensure_blocking_allowed(&self.runtime)?;
        let task = self.exchange_task(Arc::new(request.clone()));
        self.runtime.block_on(task)
    }

    pub(crate) fn query_async(&self, request: Arc<Request>, callback: QueryCallback) {
        let task = self.exchange_task(request);
        self.runtime.spawn(async move { complete(callback, task.await) });
    }

    /// Cancels pending exchanges and closes the stream.
    ///
    /// `benign` marks shutdown errors that are not worth reporting. When the
    /// caller may not block (runtime thread, current-thread runtime) the close
    /// is spawned; otherwise it runs to completion before returning.
    pub(crate) fn teardown(self, endpoint: &Endpoint, benign: fn(&io::Error) -> bool) {
        self.observer.disconnected(endpoint);
        self.cancel.send_replace(true);

        let runtime = self.runtime.clone();
        let stream = self.stream;
        let observer = self.observer;
        let close = async move {
            let taken = stream.lock().await.take();
            let Some(stream) = taken else {
                return;
            };
            if let Err(err) = stream.close().await {
                if !benign(&err) {
                    observer.failed(Stage::Shutdown, &TransportError::Shutdown(err));
                }
            }
        };

        if ensure_blocking_allowed(&runtime).is_ok() {
            runtime.block_on(close);
        } else {
            runtime.spawn(close);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use hcx_common::ErrorKind;
    use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
    use tokio::runtime::Runtime;

    impl Transport for DuplexStream {
        async fn close(mut self) -> io::Result<()> {
            self.shutdown().await
        }
    }

    /// Fails every write and counts read attempts.
    struct RejectingStream {
        reads: Arc<AtomicUsize>,
    }

    impl AsyncRead for RejectingStream {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for RejectingStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl Transport for RejectingStream {
        async fn close(self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: AtomicUsize,
        received: AtomicUsize,
        failures: std::sync::Mutex<Vec<Stage>>,
    }

    impl QueryObserver for Recorder {
        fn request_sent(&self, _request: &Request) {
            self.sent.fetch_add(1, Ordering::SeqCst);
        }

        fn response_received(&self, _response: &Response) {
            self.received.fetch_add(1, Ordering::SeqCst);
        }

        fn failed(&self, stage: Stage, _error: &TransportError) {
            self.failures.lock().unwrap().push(stage);
        }
    }

    fn runtime() -> Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap()
    }

    fn never(_: &io::Error) -> bool {
        false
    }

    fn session(rt: &Runtime, stream: DuplexStream, observer: Arc<Recorder>) -> Session<DuplexStream> {
        Session::new(stream, rt.handle().clone(), observer, ExchangeLimits::default())
    }

    #[test]
    fn blocking_query_round_trip() {
        let rt = runtime();
        let (client, mut server) = duplex(1024);
        rt.spawn(async move {
            let mut buf = [0u8; 256];
            let _ = server.read(&mut buf).await;
            let _ = server
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                .await;
        });

        let observer = Arc::new(Recorder::default());
        let session = session(&rt, client, observer.clone());
        let response = session.query(&Request::get("/")).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(observer.sent.load(Ordering::SeqCst), 1);
        assert_eq!(observer.received.load(Ordering::SeqCst), 1);
        session.teardown(&Endpoint::new("mock", 1), never);
    }

    #[test]
    fn write_failure_skips_read() {
        let rt = runtime();
        let (client, server) = duplex(64);
        drop(server);

        let observer = Arc::new(Recorder::default());
        let session = session(&rt, client, observer.clone());
        let err = session.query(&Request::get("/")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Write);
        assert_eq!(observer.sent.load(Ordering::SeqCst), 0);
        assert_eq!(*observer.failures.lock().unwrap(), vec![Stage::Write]);
    }

    #[test]
    fn async_write_failure_never_reads() {
        let rt = runtime();
        let reads = Arc::new(AtomicUsize::new(0));
        let observer = Arc::new(Recorder::default());
        let session = Session::new(
            RejectingStream {
                reads: Arc::clone(&reads),
            },
            rt.handle().clone(),
            observer.clone(),
            ExchangeLimits::default(),
        );

        let (tx, rx) = mpsc::channel();
        session.query_async(
            Arc::new(Request::get("/")),
            Box::new(move |response, err| {
                tx.send((response.is_empty(), err.map(|e| e.kind()))).unwrap();
            }),
        );
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            (true, Some(ErrorKind::Write))
        );
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(reads.load(Ordering::SeqCst), 0);
        assert_eq!(observer.received.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn async_callback_runs_once() {
        let rt = runtime();
        let (client, mut server) = duplex(1024);
        rt.spawn(async move {
            let mut buf = [0u8; 256];
            let _ = server.read(&mut buf).await;
            let _ = server
                .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
                .await;
        });

        let session = session(&rt, client, Arc::new(Recorder::default()));
        let (tx, rx) = mpsc::channel();
        session.query_async(
            Arc::new(Request::get("/")),
            Box::new(move |response, err| {
                tx.send((response.status, err.is_none())).unwrap();
            }),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), (204, true));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn teardown_cancels_pending_query() {
        let rt = runtime();
        // Peer reads the request but never answers.
        let (client, mut server) = duplex(1024);
        let (seen_tx, seen_rx) = mpsc::channel();
        rt.spawn(async move {
            let mut buf = [0u8; 256];
            let _ = server.read(&mut buf).await;
            let _ = seen_tx.send(());
            let _ = server.read(&mut buf).await;
        });

        let session = session(&rt, client, Arc::new(Recorder::default()));
        let (tx, rx) = mpsc::channel();
        session.query_async(
            Arc::new(Request::get("/slow")),
            Box::new(move |response, err| {
                tx.send((response.is_empty(), err.map(|e| e.kind()))).unwrap();
            }),
        );
        seen_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        session.teardown(&Endpoint::new("mock", 1), never);
        let (empty, kind) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(empty);
        assert_eq!(kind, Some(ErrorKind::Cancelled));
    }

    #[test]
    fn blocking_query_refused_on_runtime_thread() {
        let rt = runtime();
        let (client, _server) = duplex(64);
        let session = session(&rt, client, Arc::new(Recorder::default()));
        let err = rt.block_on(async { session.query(&Request::get("/")) }).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BlockingContext);
    }

    #[test]
    fn current_thread_runtime_refuses_blocking_and_teardown_returns() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (client, _server) = duplex(64);
        let session = Session::new(
            client,
            rt.handle().clone(),
            Arc::new(Recorder::default()),
            ExchangeLimits::default(),
        );

        let err = session.query(&Request::get("/")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedRuntime);
        // Must not park the caller on a runtime nobody drives.
        session.teardown(&Endpoint::new("mock", 1), never);
    }

    #[test]
    fn async_read_failure_reports_once() {
        let rt = runtime();
        let (client, mut server) = duplex(1024);
        rt.spawn(async move {
            let mut buf = [0u8; 256];
            let _ = server.read(&mut buf).await;
            let _ = server
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nshort")
                .await;
        });

        let observer = Arc::new(Recorder::default());
        let session = session(&rt, client, observer.clone());
        let (tx, rx) = mpsc::channel();
        session.query_async(
            Arc::new(Request::get("/")),
            Box::new(move |response, err| {
                tx.send((response.is_empty(), err.map(|e| e.kind()))).unwrap();
            }),
        );
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            (true, Some(ErrorKind::Read))
        );
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(observer.sent.load(Ordering::SeqCst), 1);
        assert_eq!(*observer.failures.lock().unwrap(), vec![Stage::Read]);
    }

    #[test]
    fn reject_reports_through_callback() {
        let rt = runtime();
        let (tx, rx) = mpsc::channel();
        reject(
            rt.handle(),
            Box::new(move |response, err| {
                tx.send((response.is_empty(), err.map(|e| e.kind()))).unwrap();
            }),
            TransportError::NotConnected,
        );
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            (true, Some(ErrorKind::NotConnected))
        );
    }
}
