//! Realtime Session
//!
//! [`SessionController`] owns one logical session with the realtime service.
//! It runs a single event loop that multiplexes connection events, outbound
//! messages from every producer, the reconnect timer, device faults and
//! shutdown. Each connection attempt runs in its own task that owns the
//! socket, so every outbound frame is written by exactly one writer.
//!
//! Lifecycle:
//!
//! ```text
//! Disconnected -> Connecting -> Active -> (close | error) -> Disconnected
//!                                              |
//!                          attempts < max: retry after the delay
//!                          otherwise:      Exhausted (terminal)
//! ```

use crate::config::RealtimeConfig;
use crate::dispatch::Dispatcher;
use crate::error::{SessionError, TransportError};
use crate::pipeline::AudioPipeline;
use crate::transport::{Connector, FrameSink, FrameStream, Inbound};
use futures::{SinkExt, StreamExt};
use openai_realtime_types::ClientEvent;
use parley_core::{
    ConversationMachine, Lifecycle, SessionState, TranscriptSink,
    audio::{AudioInput, AudioOutput},
};
use std::future::{Future, pending};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, instrument, trace, warn};

const OUTBOUND_QUEUE: usize = 256;
const CONNECTION_EVENT_QUEUE: usize = 256;

/// Cloneable front door to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    state: SessionState,
    outbound: mpsc::Sender<ClientEvent>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Queues an event for the open connection.
    ///
    /// Fails with [`TransportError::NotConnected`] unless the session is
    /// active, and with [`TransportError::Closed`] once it has shut down.
    pub async fn send(&self, event: ClientEvent) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        if self.state.lifecycle() != Lifecycle::Active {
            return Err(TransportError::NotConnected);
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TransportError::Closed),
            sent = self.outbound.send(event) => sent.map_err(|_| TransportError::Closed),
        }
    }

    /// Requests a graceful shutdown. Safe to call any number of times.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!("session shutdown requested");
            self.cancel.cancel();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug)]
enum ConnectionEvent {
    Opened,
    Message(String),
    Closed { code: Option<u16>, reason: String },
    Failed(TransportError),
}

/// One connection attempt and the task that owns its socket.
struct Connection {
    writer: mpsc::Sender<String>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Connection {
    /// Closes the socket if still open and waits for the task.
    async fn close(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "connection task ended abnormally");
        }
    }
}

pub struct SessionController<C: Connector, I: AudioInput> {
    config: RealtimeConfig,
    connector: Arc<C>,
    state: SessionState,
    handle: SessionHandle,
    outbound_rx: mpsc::Receiver<ClientEvent>,
    pipeline: AudioPipeline<I>,
    dispatcher: Dispatcher,
}

impl<C: Connector, I: AudioInput> SessionController<C, I> {
    /// Builds the session and opens the output device.
    ///
    /// Must be called within a Tokio runtime. Fails when the output device
    /// cannot be opened.
    pub fn new<O: AudioOutput>(
        config: RealtimeConfig,
        connector: C,
        input: I,
        output: O,
        transcripts: Arc<dyn TranscriptSink>,
    ) -> Result<(Self, SessionHandle), SessionError> {
        let state = SessionState::new();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let handle = SessionHandle {
            state: state.clone(),
            outbound,
            cancel: CancellationToken::new(),
        };

        let pipeline = AudioPipeline::start(
            input,
            output,
            handle.clone(),
            config.idle_capture,
            config.frame_queue,
        )?;

        let machine = ConversationMachine::new(
            state.clone(),
            config.wake_words.clone(),
            config.termination_words.clone(),
        );
        let dispatcher = Dispatcher::new(machine, state.clone(), pipeline.playback(), transcripts);

        let controller = Self {
            config,
            connector: Arc::new(connector),
            state,
            handle: handle.clone(),
            outbound_rx,
            pipeline,
            dispatcher,
        };
        Ok((controller, handle))
    }

    /// Runs the session until shutdown, reconnect exhaustion or a fatal
    /// device error.
    #[instrument(name = "session", skip_all)]
    pub async fn run(mut self) -> Result<(), SessionError> {
        let (events_tx, mut events_rx) = mpsc::channel(CONNECTION_EVENT_QUEUE);
        let cancel = self.handle.cancel.clone();
        let mut connection = Some(self.connect(&events_tx));
        let mut retry: Option<Pin<Box<Sleep>>> = None;

        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                Some(fault) = self.pipeline.next_fault() => {
                    error!(direction = %fault.direction(), error = %fault, "audio device failed");
                    break Err(fault.into());
                }
                () = fire(&mut retry) => {
                    retry = None;
                    connection = Some(self.connect(&events_tx));
                }
                Some(event) = events_rx.recv() => match event {
                    ConnectionEvent::Opened => {
                        if let Err(e) = self.on_open(connection.as_ref()).await {
                            break Err(e);
                        }
                    }
                    ConnectionEvent::Message(raw) => {
                        if let Some(reply) = self.dispatcher.dispatch(&raw).await {
                            write(connection.as_ref(), reply);
                        }
                    }
                    ConnectionEvent::Closed { code, reason } => {
                        info!(?code, %reason, "connection closed");
                        if let Some(closed) = connection.take() {
                            closed.close().await;
                        }
                        match self.schedule_reconnect().await {
                            Ok(timer) => retry = Some(timer),
                            Err(e) => break Err(e),
                        }
                    }
                    ConnectionEvent::Failed(e) => {
                        warn!(error = %e, "connection failed");
                        if let Some(failed) = connection.take() {
                            failed.close().await;
                        }
                        match self.schedule_reconnect().await {
                            Ok(timer) => retry = Some(timer),
                            Err(e) => break Err(e),
                        }
                    }
                },
                Some(event) = self.outbound_rx.recv() => write(connection.as_ref(), event),
            }
        };

        // Unblocks a connection task waiting to deliver an event
        drop(events_rx);
        self.teardown(connection, retry).await;
        result
    }

    fn connect(&self, events: &mpsc::Sender<ConnectionEvent>) -> Connection {
        self.state.set_lifecycle(Lifecycle::Connecting);
        let attempt = self.state.reconnect_attempts();
        info!(url = %self.config.url(), attempt, "connecting to realtime service");

        let (writer, writes) = mpsc::channel(OUTBOUND_QUEUE);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            run_connection(self.connector.clone(), events.clone(), writes, cancel.clone())
                .instrument(info_span!("connection", attempt)),
        );
        Connection {
            writer,
            cancel,
            task,
        }
    }

    async fn on_open(&mut self, connection: Option<&Connection>) -> Result<(), SessionError> {
        self.state.mark_connected();
        info!("connected to realtime service");
        write(connection, self.config.session_update());
        self.pipeline.start_capture().await?;
        Ok(())
    }

    /// Stops capture and abandons any response in flight, whose remaining
    /// audio will never arrive, then arms the retry timer.
    async fn schedule_reconnect(&mut self) -> Result<Pin<Box<Sleep>>, SessionError> {
        self.pipeline.stop_capture().await;
        self.pipeline.interrupt_playback();
        let max = self.config.max_reconnect_attempts;
        match self.state.begin_reconnect(max) {
            Some(attempt) => {
                info!(
                    attempt,
                    max,
                    delay_ms = self.config.reconnect_delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                Ok(Box::pin(tokio::time::sleep(self.config.reconnect_delay)))
            }
            None => {
                error!(attempts = max, "reconnect attempts exhausted");
                Err(SessionError::Exhausted { attempts: max })
            }
        }
    }

    /// Stops capture, then playback, then the socket, then the retry timer,
    /// then waits for the pipeline tasks.
    async fn teardown(mut self, connection: Option<Connection>, retry: Option<Pin<Box<Sleep>>>) {
        self.handle.cancel.cancel();
        self.pipeline.stop_capture().await;
        self.pipeline.stop_playback().await;
        if let Some(connection) = connection {
            connection.close().await;
        }
        drop(retry);
        self.pipeline.shutdown().await;
        if self.state.lifecycle() != Lifecycle::Exhausted {
            self.state.set_lifecycle(Lifecycle::Disconnected);
        }
        info!("session stopped");
    }
}

/// Resolves when the retry timer fires; never while none is armed.
fn fire(timer: &mut Option<Pin<Box<Sleep>>>) -> impl Future<Output = ()> + '_ {
    async move {
        match timer {
            Some(timer) => timer.as_mut().await,
            None => pending().await,
        }
    }
}

/// Hands an encoded event to the connection task without waiting.
fn write(connection: Option<&Connection>, event: ClientEvent) {
    let Some(connection) = connection else {
        debug!(kind = event.kind(), "no open connection, dropping event");
        return;
    };
    let frame = match event.encode() {
        Ok(frame) => frame,
        Err(e) => {
            error!(error = %e, kind = event.kind(), "failed to encode client event");
            return;
        }
    };
    trace!(kind = event.kind(), "queueing client event");
    match connection.writer.try_send(frame) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(kind = event.kind(), "socket write queue full, dropping event");
        }
        Err(TrySendError::Closed(_)) => {
            debug!(kind = event.kind(), "connection closed, dropping event");
        }
    }
}

async fn run_connection<C: Connector>(
    connector: Arc<C>,
    events: mpsc::Sender<ConnectionEvent>,
    writes: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    let connected = tokio::select! {
        _ = cancel.cancelled() => return,
        connected = connector.connect() => connected,
    };
    let (sink, stream) = match connected {
        Ok(link) => link,
        Err(e) => {
            let _ = events.send(ConnectionEvent::Failed(e)).await;
            return;
        }
    };
    if events.send(ConnectionEvent::Opened).await.is_err() {
        return;
    }

    let outcome = pump(sink, stream, writes, &events, &cancel).await;
    if let Some(event) = outcome {
        let _ = events.send(event).await;
    }
}

/// Moves frames in both directions until the socket ends or the attempt is
/// cancelled. Returns the event describing how the socket ended, if it did.
async fn pump(
    mut sink: FrameSink,
    mut stream: FrameStream,
    mut writes: mpsc::Receiver<String>,
    events: &mpsc::Sender<ConnectionEvent>,
    cancel: &CancellationToken,
) -> Option<ConnectionEvent> {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if let Err(e) = sink.close().await {
                    debug!(error = %e, "error closing socket");
                }
                return None;
            }
            frame = writes.recv() => {
                // The controller holds the sender for the life of the attempt
                let Some(frame) = frame else { return None };
                if let Err(e) = sink.send(frame).await {
                    return Some(ConnectionEvent::Failed(e));
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Inbound::Text(text))) => {
                    if events.send(ConnectionEvent::Message(text)).await.is_err() {
                        return None;
                    }
                }
                Some(Ok(Inbound::Close { code, reason })) => {
                    return Some(ConnectionEvent::Closed { code, reason });
                }
                Some(Err(e)) => return Some(ConnectionEvent::Failed(e)),
                None => {
                    return Some(ConnectionEvent::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    });
                }
            },
        }
    }
}
